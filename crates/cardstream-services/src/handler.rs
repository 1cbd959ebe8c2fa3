//! Server request handling.
//!
//! [`RequestAssembler`] tracks each inbound stream through two phases,
//! AwaitingRequest → Responding, and yields a request once its stream has
//! ended. [`RequestHandler`] turns a request into the full response blob.
//! Every failure becomes an error-text response for that stream alone.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use cardstream_core::wire::{error_response, not_found_message, RequestItem, SINGLE_IMAGE_LEN};

use crate::catalog::{CardCatalog, CardFaces, CatalogEntry};
use crate::event::{StreamId, TransportEvent};
use crate::image_source::{FetchError, ImageSource};

const INVALID_UTF8_TEXT: &str = "Request was not valid UTF-8";
const NO_RANDOM_TEXT: &str = "No cards available for a random draw...";

// ── Assembler ─────────────────────────────────────────────────────────────────

enum StreamPhase {
    AwaitingRequest(BytesMut),
    /// A response is already on its way; remaining bytes are ignored.
    Responding,
}

/// What the connection driver should do about a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRequest {
    /// The complete request arrived.
    Ready { stream: StreamId, request: Bytes },
    /// The request outgrew the limit; answer with an error now.
    Oversized { stream: StreamId, limit: usize },
    /// The client reset the stream before finishing its request.
    Abandoned { stream: StreamId },
}

pub struct RequestAssembler {
    streams: HashMap<StreamId, StreamPhase>,
    max_request_bytes: usize,
}

impl RequestAssembler {
    pub fn new(max_request_bytes: usize) -> Self {
        Self {
            streams: HashMap::new(),
            max_request_bytes,
        }
    }

    pub fn on_event(&mut self, event: TransportEvent) -> Option<InboundRequest> {
        match event {
            TransportEvent::BytesArrived { stream, data, end } => {
                let limit = self.max_request_bytes;
                let phase = self
                    .streams
                    .entry(stream)
                    .or_insert_with(|| StreamPhase::AwaitingRequest(BytesMut::new()));

                let outcome = match &mut *phase {
                    StreamPhase::Responding => None,
                    StreamPhase::AwaitingRequest(buffer) => {
                        if buffer.len() + data.len() > limit {
                            *phase = StreamPhase::Responding;
                            Some(InboundRequest::Oversized { stream, limit })
                        } else {
                            buffer.extend_from_slice(&data);
                            if end {
                                let request = std::mem::take(buffer).freeze();
                                Some(InboundRequest::Ready { stream, request })
                            } else {
                                None
                            }
                        }
                    }
                };

                if end {
                    self.streams.remove(&stream);
                }
                outcome
            }
            TransportEvent::StreamReset { stream, .. } => match self.streams.remove(&stream) {
                Some(StreamPhase::AwaitingRequest(_)) => Some(InboundRequest::Abandoned { stream }),
                _ => None,
            },
            TransportEvent::ConnectionClosed { .. } => {
                self.streams.clear();
                None
            }
        }
    }

    /// Streams still being tracked.
    pub fn active(&self) -> usize {
        self.streams.len()
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

pub struct RequestHandler {
    catalog: Arc<CardCatalog>,
    images: Arc<dyn ImageSource>,
    include_multiface_in_random: bool,
}

impl RequestHandler {
    pub fn new(
        catalog: Arc<CardCatalog>,
        images: Arc<dyn ImageSource>,
        include_multiface_in_random: bool,
    ) -> Self {
        Self {
            catalog,
            images,
            include_multiface_in_random,
        }
    }

    /// Build the response for a raw request.
    pub async fn respond(&self, raw: &[u8]) -> Bytes {
        match RequestItem::decode(raw) {
            Ok(request) => self.resolve(&request).await,
            Err(e) => {
                tracing::warn!(error = %e, bytes = raw.len(), "undecodable request");
                error_response(INVALID_UTF8_TEXT)
            }
        }
    }

    /// Error response for a request that outgrew `limit`.
    pub fn oversized(&self, limit: usize) -> Bytes {
        tracing::warn!(limit, "request too large");
        error_response(&format!("Request exceeds {limit} bytes"))
    }

    /// Build the response for a decoded request.
    pub async fn resolve(&self, request: &RequestItem) -> Bytes {
        let entry = match request {
            RequestItem::Random => {
                match self.catalog.sample(self.include_multiface_in_random) {
                    Some(entry) => {
                        tracing::info!(card = %entry.name, "sending random card");
                        entry
                    }
                    None => {
                        tracing::warn!(
                            include_multiface = self.include_multiface_in_random,
                            "no card eligible for a random draw"
                        );
                        return error_response(NO_RANDOM_TEXT);
                    }
                }
            }
            RequestItem::Named(name) => {
                tracing::info!(card = %name, "searching for card");
                match self.catalog.lookup(name) {
                    Some(entry) => entry,
                    None => {
                        tracing::info!(card = %name, "card not found");
                        return error_response(&not_found_message(name));
                    }
                }
            }
        };

        match self.render(entry).await {
            Ok(bytes) => {
                tracing::info!(card = %entry.name, bytes = bytes.len(), "card served");
                bytes
            }
            Err(e) => {
                tracing::warn!(card = %entry.name, error = %e, "image fetch failed");
                error_response(&format!("Failed to fetch image for '{}': {e}", entry.name))
            }
        }
    }

    async fn render(&self, entry: &CatalogEntry) -> Result<Bytes, FetchError> {
        match &entry.faces {
            CardFaces::Single(url) => {
                let face = checked_face(self.images.fetch_rgb(url).await?)?;
                Ok(Bytes::from(face))
            }
            CardFaces::Double { front, back } => {
                let (front, back) =
                    tokio::try_join!(self.images.fetch_rgb(front), self.images.fetch_rgb(back))?;
                let mut faces = checked_face(front)?;
                faces.extend_from_slice(&checked_face(back)?);
                Ok(Bytes::from(faces))
            }
        }
    }
}

/// A face must be exactly one image long or the client would misread it.
fn checked_face(face: Vec<u8>) -> Result<Vec<u8>, FetchError> {
    if face.len() != SINGLE_IMAGE_LEN {
        return Err(FetchError::Decode(format!(
            "face is {} bytes, expected {SINGLE_IMAGE_LEN}",
            face.len()
        )));
    }
    Ok(face)
}
