//! cardstream integration test harness.
//!
//! Every test starts its own cardd-equivalent server on a loopback port
//! with the fixture certificate and a stub image source, then talks to it
//! through the real client over QUIC:
//!
//!   cargo test --test integration
//!
//! Stub image urls decide what the source does: `hang-*` never returns,
//! `broken-*` fails, anything else yields a face filled with the url's
//! first byte.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quinn::Endpoint;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cardstream_core::config::ClientSettings;
use cardstream_core::wire::SINGLE_IMAGE_LEN;
use cardstream_services::{
    serve, server_config, BatchClient, CardCatalog, CatalogEntry, FetchError, ImageSource,
    RequestHandler,
};

mod batches;
mod failures;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const MAX_REQUEST_BYTES: usize = 1024;

pub struct StubImages;

#[async_trait]
impl ImageSource for StubImages {
    async fn fetch_rgb(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.starts_with("hang") {
            std::future::pending::<()>().await;
        }
        if url.starts_with("broken") {
            return Err(FetchError::Decode("stub upstream failure".into()));
        }
        Ok(vec![url.as_bytes()[0]; SINGLE_IMAGE_LEN])
    }
}

/// Every entry answers promptly.
pub fn catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::single("Counterspell", "c-counterspell"),
        CatalogEntry::single("Lightning Bolt", "l-bolt"),
        CatalogEntry::double("Huntmaster of the Fells", "f-huntmaster", "b-ravager"),
        CatalogEntry::single("Broken Card", "broken-card"),
    ]
}

/// Adds entries whose images never arrive.
pub fn slow_catalog() -> Vec<CatalogEntry> {
    let mut entries = catalog();
    entries.push(CatalogEntry::single("Slow Card", "hang-slow"));
    entries.push(CatalogEntry::single("Slower Card", "hang-slower"));
    entries
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(entries: Vec<CatalogEntry>, max_concurrent_streams: u32) -> Result<Self> {
        let handler = Arc::new(RequestHandler::new(
            Arc::new(CardCatalog::from_entries(entries)),
            Arc::new(StubImages),
            true,
        ));
        let tls = server_config(
            &fixture("cert.pem"),
            Some(fixture("key.pem").as_path()),
            max_concurrent_streams,
        )
        .context("fixture tls")?;
        let endpoint = Endpoint::server(tls, "127.0.0.1:0".parse()?)?;
        let addr = endpoint.local_addr()?;

        let (shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(serve(endpoint, handler, MAX_REQUEST_BYTES, shutdown.subscribe()));
        Ok(Self { addr, shutdown, task })
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            batch_timeout_secs: 30,
            stream_open_timeout_ms: 2_000,
            output_dir: None,
        }
    }

    pub async fn client(&self) -> Result<BatchClient> {
        self.client_with(self.settings()).await
    }

    pub async fn client_with(&self, settings: ClientSettings) -> Result<BatchClient> {
        let client = BatchClient::connect(&settings.host, settings.port, &settings).await?;
        Ok(client)
    }
}

/// Upper bound for anything that should finish promptly on loopback.
pub const PROMPTLY: Duration = Duration::from_secs(15);
