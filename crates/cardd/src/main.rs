//! cardd — serves card images over QUIC, one stream per request.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use quinn::Endpoint;

use cardstream_core::config::CardstreamConfig;
use cardstream_services::{serve, server_config, CardCatalog, HttpImageSource, RequestHandler};

#[derive(Parser)]
#[command(name = "cardd")]
#[command(about = "Serve card images over QUIC")]
struct Args {
    /// PEM certificate chain presented to clients
    #[arg(short, long)]
    certificate: Option<PathBuf>,

    /// PEM private key (defaults to the certificate file)
    #[arg(short = 'k', long)]
    private_key: Option<PathBuf>,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Card catalog JSON
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Allow double-faced cards in random draws
    #[arg(long)]
    include_multiface_in_random: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if let Err(e) = CardstreamConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CardstreamConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CardstreamConfig::default()
    });

    let mut settings = config.server;
    if let Some(certificate) = args.certificate {
        settings.certificate = Some(certificate);
    }
    if let Some(private_key) = args.private_key {
        settings.private_key = Some(private_key);
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(catalog) = args.catalog {
        settings.catalog_path = catalog;
    }
    if let Some(include) = args.include_multiface_in_random {
        settings.include_multiface_in_random = include;
    }

    let certificate = settings
        .certificate
        .clone()
        .context("no certificate configured (pass --certificate or set server.certificate)")?;

    let catalog = CardCatalog::load(&settings.catalog_path).context("failed to load card catalog")?;
    let images = HttpImageSource::new(&config.images.user_agent, config.images.fetch_timeout())
        .context("failed to build image client")?;
    let handler = Arc::new(RequestHandler::new(
        Arc::new(catalog),
        Arc::new(images),
        settings.include_multiface_in_random,
    ));

    let tls = server_config(
        &certificate,
        settings.private_key.as_deref(),
        settings.max_concurrent_streams,
    )
    .context("failed to set up TLS")?;

    let ip: IpAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.bind_addr))?;
    let addr = SocketAddr::new(ip, settings.port);
    let endpoint = Endpoint::server(tls, addr).with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        include_multiface_in_random = settings.include_multiface_in_random,
        max_concurrent_streams = settings.max_concurrent_streams,
        "cardd listening"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let server = tokio::spawn(serve(
        endpoint,
        handler,
        settings.max_request_bytes,
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    server.await.context("server task failed")?;
    Ok(())
}
