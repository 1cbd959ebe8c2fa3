//! Transport events and the dispatch seam.
//!
//! The receiving side of a connection sees the transport only as a
//! sequence of [`TransportEvent`]s, delivered one at a time to the task
//! that owns the session state. The sending side sees it as a
//! [`StreamTransport`].

use async_trait::async_trait;
use bytes::Bytes;

use crate::session::SessionError;

/// Connection-scoped stream handle assigned by the transport.
pub type StreamId = u64;

/// Everything the transport can tell the session about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes arrived on `stream`. `end` means no more bytes will follow.
    BytesArrived {
        stream: StreamId,
        data: Bytes,
        end: bool,
    },
    /// The peer abandoned `stream` before finishing it.
    StreamReset { stream: StreamId, error_code: u64 },
    /// The connection is gone; no further events will arrive.
    ConnectionClosed { reason: String },
}

impl TransportEvent {
    pub fn stream(&self) -> Option<StreamId> {
        match self {
            TransportEvent::BytesArrived { stream, .. } => Some(*stream),
            TransportEvent::StreamReset { stream, .. } => Some(*stream),
            TransportEvent::ConnectionClosed { .. } => None,
        }
    }
}

/// Outgoing half of a connection, as the request dispatcher needs it.
#[async_trait]
pub trait StreamTransport: Send {
    /// Open a new bidirectional stream.
    ///
    /// Fails with `ResourceExhausted` when no stream can be allocated.
    async fn open_stream(&mut self) -> Result<StreamId, SessionError>;

    /// Write `data` to `stream`, closing the write side when `end_stream`.
    async fn send(
        &mut self,
        stream: StreamId,
        data: Bytes,
        end_stream: bool,
    ) -> Result<(), SessionError>;

    /// Push any queued data to the wire.
    async fn transmit(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}
