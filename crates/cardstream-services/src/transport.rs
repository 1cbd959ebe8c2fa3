//! Turns quinn streams into [`TransportEvent`]s.
//!
//! Every receive stream gets a pump task that forwards what it reads to
//! the connection's event channel. The channel has exactly one consumer,
//! the task that owns the session state, so events for one connection
//! are processed one at a time.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use quinn::{Connection, ReadError, RecvStream, SendStream, VarInt, WriteError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{StreamId, StreamTransport, TransportEvent};
use crate::session::SessionError;

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub fn stream_id(send: &SendStream) -> StreamId {
    VarInt::from(send.id()).into_inner()
}

/// Forward everything read from `recv` as events until the stream ends.
pub fn spawn_pump(stream: StreamId, recv: RecvStream, events: EventSender) -> JoinHandle<()> {
    tokio::spawn(pump(stream, recv, events, None))
}

/// Like [`spawn_pump`], but once more than `limit` bytes have arrived the
/// pump forwards the chunk that crossed the limit, asks the peer to stop
/// sending with `code` and reports the stream as reset.
pub fn spawn_capped_pump(
    stream: StreamId,
    recv: RecvStream,
    events: EventSender,
    limit: usize,
    code: VarInt,
) -> JoinHandle<()> {
    tokio::spawn(pump(stream, recv, events, Some((limit, code))))
}

async fn pump(stream: StreamId, mut recv: RecvStream, events: EventSender, cap: Option<(usize, VarInt)>) {
    let mut received = 0usize;
    loop {
        let event = match recv.read_chunk(usize::MAX, true).await {
            Ok(Some(chunk)) => {
                received = received.saturating_add(chunk.bytes.len());
                TransportEvent::BytesArrived {
                    stream,
                    data: chunk.bytes,
                    end: false,
                }
            }
            Ok(None) => TransportEvent::BytesArrived {
                stream,
                data: Bytes::new(),
                end: true,
            },
            Err(ReadError::Reset(code)) => TransportEvent::StreamReset {
                stream,
                error_code: code.into_inner(),
            },
            Err(ReadError::ConnectionLost(e)) => TransportEvent::ConnectionClosed {
                reason: e.to_string(),
            },
            Err(e) => {
                tracing::debug!(stream, error = %e, "stream read ended");
                TransportEvent::StreamReset {
                    stream,
                    error_code: 0,
                }
            }
        };

        let last = !matches!(event, TransportEvent::BytesArrived { end: false, .. });
        if events.send(event).is_err() || last {
            return;
        }

        if let Some((limit, code)) = cap {
            if over_limit(received, limit) {
                tracing::debug!(stream, received, limit, "stopping oversized stream");
                let _ = recv.stop(code);
                let _ = events.send(TransportEvent::StreamReset {
                    stream,
                    error_code: code.into_inner(),
                });
                return;
            }
        }
    }
}

fn over_limit(received: usize, limit: usize) -> bool {
    received > limit
}

/// Emit `ConnectionClosed` once the connection goes away.
pub fn spawn_close_watcher(connection: Connection, events: EventSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = connection.closed().await;
        let _ = events.send(TransportEvent::ConnectionClosed {
            reason: reason.to_string(),
        });
    })
}

/// Client-side [`StreamTransport`] over a quinn connection.
pub struct QuicTransport {
    connection: Connection,
    events: EventSender,
    open_timeout: Duration,
    send_streams: HashMap<StreamId, SendStream>,
    pumps: Vec<JoinHandle<()>>,
}

impl QuicTransport {
    pub fn new(connection: Connection, events: EventSender, open_timeout: Duration) -> Self {
        Self {
            connection,
            events,
            open_timeout,
            send_streams: HashMap::new(),
            pumps: Vec::new(),
        }
    }

    /// Stop every pump task.
    pub fn shutdown(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.send_streams.clear();
    }
}

impl Drop for QuicTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl StreamTransport for QuicTransport {
    async fn open_stream(&mut self) -> Result<StreamId, SessionError> {
        let (send, recv) = match tokio::time::timeout(self.open_timeout, self.connection.open_bi()).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(SessionError::ConnectionClosed(e.to_string())),
            Err(_) => {
                return Err(SessionError::ResourceExhausted(format!(
                    "no stream credit within {:?} ({} streams open)",
                    self.open_timeout,
                    self.send_streams.len()
                )))
            }
        };

        let stream = stream_id(&send);
        self.pumps.push(spawn_pump(stream, recv, self.events.clone()));
        self.send_streams.insert(stream, send);
        Ok(stream)
    }

    async fn send(&mut self, stream: StreamId, data: Bytes, end_stream: bool) -> Result<(), SessionError> {
        let send = self.send_streams.get_mut(&stream).ok_or(SessionError::ProtocolViolation {
            stream,
            reason: "write to a stream that was never opened",
        })?;
        match send.write_all(&data).await {
            Ok(()) => {}
            // The peer has seen enough to answer; its response still arrives.
            Err(WriteError::Stopped(code)) => {
                tracing::debug!(stream, code = code.into_inner(), "peer stopped reading request");
                self.send_streams.remove(&stream);
                return Ok(());
            }
            Err(e) => return Err(SessionError::ConnectionClosed(e.to_string())),
        }
        if end_stream {
            send.finish()
                .map_err(|e| SessionError::ConnectionClosed(e.to_string()))?;
            // quinn keeps retransmitting a finished stream after the handle is dropped.
            self.send_streams.remove(&stream);
        }
        Ok(())
    }
}
