//! Client session: reassembles responses for one batch of requests.
//!
//! The session owns the stream buffer table and the pending request set
//! and is driven by exactly one task, one [`TransportEvent`] at a time.
//! Both tables are mutated inside the same `&mut self` call, so no
//! observer can see a stream present in one and absent from the other.
//!
//! Completion is explicit: the batch resolves once it has been sealed
//! (every request dispatched) and the pending set is empty, or as soon as
//! it is aborted. It resolves exactly once.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use cardstream_core::wire::{classify, ClassifiedPayload, RequestItem, WireError};

use crate::buffers::StreamBufferTable;
use crate::event::{StreamId, TransportEvent};

// ── Results ───────────────────────────────────────────────────────────────────

/// One finished stream, attributed to the request that opened it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedResponse {
    pub stream: StreamId,
    pub request: RequestItem,
    pub outcome: Result<ClassifiedPayload, StreamFailure>,
}

/// Summary handed back when a batch resolves successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Wall-clock time from the start of dispatch to the last completion.
    pub elapsed: Duration,
    /// Streams that finished, successfully or not.
    pub responses: usize,
}

/// Receives each response as soon as its stream finishes.
pub trait PayloadSink {
    fn deliver(&mut self, response: CompletedResponse);
}

impl PayloadSink for Vec<CompletedResponse> {
    fn deliver(&mut self, response: CompletedResponse) {
        self.push(response);
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

type Completion = oneshot::Sender<Result<BatchReport, SessionError>>;

pub struct ClientSession {
    buffers: StreamBufferTable,
    /// Pending request set, keyed by stream, carrying the originating request.
    pending: HashMap<StreamId, RequestItem>,
    started_at: Instant,
    completed: usize,
    sealed: bool,
    completion: Option<Completion>,
}

/// The caller's side of the completion detector.
pub struct BatchHandle {
    rx: oneshot::Receiver<Result<BatchReport, SessionError>>,
}

impl BatchHandle {
    /// Wait for the batch to resolve. A session dropped without resolving
    /// counts as cancelled.
    pub async fn wait(self) -> Result<BatchReport, SessionError> {
        self.rx.await.unwrap_or(Err(SessionError::Cancelled))
    }
}

impl ClientSession {
    /// Start a batch. The clock for [`BatchReport::elapsed`] starts here.
    pub fn new() -> (Self, BatchHandle) {
        let (tx, rx) = oneshot::channel();
        let session = Self {
            buffers: StreamBufferTable::new(),
            pending: HashMap::new(),
            started_at: Instant::now(),
            completed: 0,
            sealed: false,
            completion: Some(tx),
        };
        (session, BatchHandle { rx })
    }

    /// Track a freshly opened stream. Must happen before any of its
    /// response bytes are processed.
    pub fn register(&mut self, stream: StreamId, request: RequestItem) -> Result<(), SessionError> {
        if self.is_resolved() {
            return Err(SessionError::Cancelled);
        }
        if self.pending.contains_key(&stream) || !self.buffers.open(stream) {
            return Err(SessionError::DuplicateStream(stream));
        }
        self.pending.insert(stream, request);
        Ok(())
    }

    /// Mark dispatch as finished. An empty batch resolves here.
    pub fn seal(&mut self) {
        self.sealed = true;
        self.try_resolve();
    }

    /// Feed one transport event into the session.
    ///
    /// Per-stream problems are delivered to `sink` as failed responses.
    /// An `Err` means the event itself was invalid; the session state is
    /// left untouched in that case.
    pub fn handle_event<S>(&mut self, event: TransportEvent, sink: &mut S) -> Result<(), SessionError>
    where
        S: PayloadSink + ?Sized,
    {
        if self.is_resolved() {
            tracing::debug!(stream = ?event.stream(), "event after batch resolved, ignoring");
            return Ok(());
        }

        match event {
            TransportEvent::BytesArrived { stream, data, end } => {
                if !self.buffers.append(stream, &data) {
                    return Err(SessionError::ProtocolViolation {
                        stream,
                        reason: "bytes arrived for an untracked stream",
                    });
                }
                if end {
                    self.finish_stream(stream, sink)?;
                }
            }
            TransportEvent::StreamReset { stream, error_code } => {
                let request = self.untrack(stream)?;
                tracing::warn!(stream, error_code, request = %request, "response stream reset");
                self.completed += 1;
                sink.deliver(CompletedResponse {
                    stream,
                    request,
                    outcome: Err(StreamFailure::Reset(error_code)),
                });
                self.try_resolve();
            }
            TransportEvent::ConnectionClosed { reason } => {
                self.abort(SessionError::ConnectionClosed(reason));
            }
        }
        Ok(())
    }

    /// Resolve the batch with `error`, releasing every buffer.
    /// Returns how many streams were abandoned.
    pub fn abort(&mut self, error: SessionError) -> usize {
        let abandoned = self.pending.len();
        let released = self.buffers.clear();
        self.pending.clear();

        if let Some(tx) = self.completion.take() {
            tracing::warn!(error = %error, abandoned, released, "batch aborted");
            let _ = tx.send(Err(error));
        }
        abandoned
    }

    pub fn is_resolved(&self) -> bool {
        self.completion.is_none()
    }

    /// Streams dispatched but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Streams that currently hold a reassembly buffer.
    pub fn buffered_streams(&self) -> usize {
        self.buffers.len()
    }

    fn finish_stream<S>(&mut self, stream: StreamId, sink: &mut S) -> Result<(), SessionError>
    where
        S: PayloadSink + ?Sized,
    {
        let buffer = self.buffers.take(stream).ok_or(SessionError::ProtocolViolation {
            stream,
            reason: "stream ended with no buffer",
        })?;
        let request = self.pending.remove(&stream).ok_or(SessionError::ProtocolViolation {
            stream,
            reason: "stream ended without a pending request",
        })?;

        let len = buffer.len();
        let outcome = classify(Bytes::from(buffer)).map_err(StreamFailure::from);
        match &outcome {
            Ok(payload) => tracing::debug!(
                stream,
                request = %request,
                kind = payload.kind(),
                bytes = len,
                "response complete"
            ),
            Err(e) => tracing::warn!(stream, request = %request, error = %e, "undecodable response"),
        }

        self.completed += 1;
        sink.deliver(CompletedResponse {
            stream,
            request,
            outcome,
        });
        self.try_resolve();
        Ok(())
    }

    /// Remove a stream from both tables at once.
    fn untrack(&mut self, stream: StreamId) -> Result<RequestItem, SessionError> {
        if !self.buffers.contains(stream) {
            return Err(SessionError::ProtocolViolation {
                stream,
                reason: "reset for an untracked stream",
            });
        }
        self.buffers.take(stream);
        self.pending.remove(&stream).ok_or(SessionError::ProtocolViolation {
            stream,
            reason: "reset without a pending request",
        })
    }

    fn try_resolve(&mut self) {
        if !self.sealed || !self.pending.is_empty() {
            return;
        }
        if let Some(tx) = self.completion.take() {
            let report = BatchReport {
                elapsed: self.started_at.elapsed(),
                responses: self.completed,
            };
            tracing::debug!(responses = report.responses, elapsed = ?report.elapsed, "batch complete");
            let _ = tx.send(Ok(report));
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Batch-level and event-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("protocol violation on stream {stream}: {reason}")]
    ProtocolViolation {
        stream: StreamId,
        reason: &'static str,
    },

    #[error("stream {0} is already tracked")]
    DuplicateStream(StreamId),

    #[error("stream allocation exhausted: {0}")]
    ResourceExhausted(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("batch did not complete within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("batch cancelled")]
    Cancelled,
}

/// Why one stream produced no usable payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamFailure {
    #[error(transparent)]
    Decode(#[from] WireError),

    #[error("stream reset by peer (code {0})")]
    Reset(u64),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
