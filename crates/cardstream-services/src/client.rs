//! Batch client: one QUIC connection, many concurrent request streams.

use std::net::SocketAddr;
use std::time::Duration;

use quinn::{Connection, Endpoint, VarInt};
use tokio::time::Instant;

use cardstream_core::config::ClientSettings;
use cardstream_core::wire::{RequestItem, BATCH_ABORTED_CODE, CLOSE_OK_CODE};

use crate::dispatch::dispatch_batch;
use crate::session::{BatchReport, ClientSession, PayloadSink, SessionError};
use crate::tls::{insecure_client_config, TlsError};
use crate::transport::{event_channel, spawn_close_watcher, QuicTransport};

pub struct BatchClient {
    endpoint: Endpoint,
    connection: Connection,
    batch_timeout: Option<Duration>,
    stream_open_timeout: Duration,
}

impl BatchClient {
    pub async fn connect(host: &str, port: u16, settings: &ClientSettings) -> Result<Self, ClientError> {
        let remote = tokio::net::lookup_host((host, port))
            .await
            .map_err(ClientError::Resolve)?
            .next()
            .ok_or_else(|| ClientError::NoAddress(host.to_string()))?;

        let local: SocketAddr = if remote.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint = Endpoint::client(local).map_err(ClientError::Endpoint)?;
        endpoint.set_default_client_config(insecure_client_config()?);

        let connection = endpoint.connect(remote, host)?.await?;
        tracing::info!(%remote, "connected");

        Ok(Self {
            endpoint,
            connection,
            batch_timeout: settings.batch_timeout(),
            stream_open_timeout: settings.stream_open_timeout(),
        })
    }

    /// Send every item on its own stream and deliver each response to
    /// `sink` as its stream finishes. Resolves once every stream has
    /// finished, or with the first batch-level failure.
    pub async fn run_batch<S>(&self, items: Vec<RequestItem>, sink: &mut S) -> Result<BatchReport, SessionError>
    where
        S: PayloadSink + ?Sized,
    {
        let (events_tx, mut events) = event_channel();
        let watcher = spawn_close_watcher(self.connection.clone(), events_tx.clone());
        let mut transport = QuicTransport::new(self.connection.clone(), events_tx, self.stream_open_timeout);

        let (mut session, handle) = ClientSession::new();
        let deadline = self.batch_timeout.map(|t| Instant::now() + t);

        let dispatched = tokio::select! {
            result = dispatch_batch(&mut session, &mut transport, items) => result.map(|_| ()),
            _ = expire(deadline) => Err(self.deadline_error()),
        };

        if let Err(e) = dispatched {
            self.abort(&mut session, e);
        }

        while !session.is_resolved() {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = session.handle_event(event, &mut *sink) {
                            tracing::warn!(error = %e, "ignoring invalid transport event");
                        }
                    }
                    None => {
                        session.abort(SessionError::Cancelled);
                    }
                },
                _ = expire(deadline) => {
                    let error = self.deadline_error();
                    self.abort(&mut session, error);
                }
            }
        }

        transport.shutdown();
        watcher.abort();

        let report = handle.wait().await?;
        tracing::info!(responses = report.responses, elapsed = ?report.elapsed, "batch finished");
        Ok(report)
    }

    /// Close the connection and wait for the peer to acknowledge.
    pub async fn close(self) {
        self.connection.close(VarInt::from_u32(CLOSE_OK_CODE), b"done");
        self.endpoint.wait_idle().await;
    }

    fn deadline_error(&self) -> SessionError {
        SessionError::DeadlineExceeded(self.batch_timeout.unwrap_or_default())
    }

    /// Fail the batch. Deadline and allocation failures also tear down the
    /// connection so the server stops working on abandoned streams.
    fn abort(&self, session: &mut ClientSession, error: SessionError) {
        let close = matches!(
            error,
            SessionError::DeadlineExceeded(_) | SessionError::ResourceExhausted(_)
        );
        session.abort(error.clone());
        if close {
            self.connection
                .close(VarInt::from_u32(BATCH_ABORTED_CODE), error.to_string().as_bytes());
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to resolve server address: {0}")]
    Resolve(std::io::Error),
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("failed to bind client endpoint: {0}")]
    Endpoint(std::io::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("failed to start connection: {0}")]
    Connect(#[from] quinn::ConnectError),
    #[error("connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),
}
