//! cardctl — requests card images from cardd, one stream per card.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use cardstream_core::config::CardstreamConfig;
use cardstream_core::wire::RequestItem;
use cardstream_services::BatchClient;

mod sink;

use sink::ImageWriter;

#[derive(Parser)]
#[command(name = "cardctl")]
#[command(about = "Fetch card images from a cardd server")]
struct Args {
    /// Server host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Card names to request
    #[arg(short, long, num_args = 1.., action = ArgAction::Append)]
    name: Vec<String>,

    /// Number of random cards to request
    #[arg(short, long, default_value_t = 0)]
    random: usize,

    /// Directory to write received faces to as PNG
    #[arg(long)]
    out: Option<PathBuf>,

    /// Batch deadline in seconds (0 waits forever)
    #[arg(long)]
    timeout: Option<u64>,
}

impl Args {
    /// Named cards first, then the random draws.
    fn requests(&self) -> Vec<RequestItem> {
        self.name
            .iter()
            .cloned()
            .map(RequestItem::Named)
            .chain(std::iter::repeat(RequestItem::Random).take(self.random))
            .collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = CardstreamConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CardstreamConfig::default()
    });
    let mut settings = config.client;
    if let Some(host) = args.host.clone() {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(timeout) = args.timeout {
        settings.batch_timeout_secs = timeout;
    }
    if let Some(out) = args.out.clone() {
        settings.output_dir = Some(out);
    }

    if let Some(dir) = &settings.output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let requests = args.requests();
    tracing::info!(
        host = %settings.host,
        port = settings.port,
        named = args.name.len(),
        random = args.random,
        "starting batch"
    );

    let client = BatchClient::connect(&settings.host, settings.port, &settings)
        .await
        .with_context(|| format!("failed to connect to cardd at {}:{}", settings.host, settings.port))?;

    let mut writer = ImageWriter::new(settings.output_dir.clone());
    let result = client.run_batch(requests, &mut writer).await;
    client.close().await;

    let report = result.context("batch failed")?;
    tracing::info!(
        images = writer.images(),
        errors = writer.errors(),
        files = writer.written().len(),
        "batch summary"
    );
    println!("Elapsed time: {:.3}s", report.elapsed.as_secs_f64());
    Ok(())
}
