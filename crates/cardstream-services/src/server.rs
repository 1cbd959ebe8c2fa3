//! Server connection driver.
//!
//! Accepts connections until shutdown. Each connection is owned by one
//! task that accepts streams, assembles requests from their events and
//! hands every ready request to its own response task, so a slow fetch
//! on one stream never holds up another.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use quinn::{Connection, Endpoint, SendStream, VarInt};
use tokio::sync::broadcast;

use cardstream_core::wire::{CLOSE_OK_CODE, REQUEST_TOO_LARGE_CODE};

use crate::event::{StreamId, TransportEvent};
use crate::handler::{InboundRequest, RequestAssembler, RequestHandler};
use crate::transport::{event_channel, spawn_capped_pump, spawn_close_watcher, stream_id};

/// Reset code for streams the client gave up on.
const REQUEST_ABANDONED: VarInt = VarInt::from_u32(0x02);

/// Serve connections on `endpoint` until `shutdown` fires.
pub async fn serve(
    endpoint: Endpoint,
    handler: Arc<RequestHandler>,
    max_request_bytes: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("server shutting down");
                break;
            }

            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else {
                    tracing::info!("endpoint closed");
                    break;
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let remote = incoming.remote_address();
                    match incoming.await {
                        Ok(connection) => {
                            tracing::info!(%remote, "connection established");
                            drive_connection(connection, handler, max_request_bytes).await;
                        }
                        Err(e) => tracing::warn!(%remote, error = %e, "handshake failed"),
                    }
                });
            }
        }
    }

    endpoint.close(VarInt::from_u32(CLOSE_OK_CODE), b"server shutting down");
    endpoint.wait_idle().await;
}

async fn drive_connection(connection: Connection, handler: Arc<RequestHandler>, max_request_bytes: usize) {
    let remote = connection.remote_address();
    let (events_tx, mut events) = event_channel();
    let watcher = spawn_close_watcher(connection.clone(), events_tx.clone());

    let mut assembler = RequestAssembler::new(max_request_bytes);
    let mut send_streams: HashMap<StreamId, SendStream> = HashMap::new();
    let mut served = 0usize;

    loop {
        tokio::select! {
            accepted = connection.accept_bi() => match accepted {
                Ok((send, recv)) => {
                    let stream = stream_id(&send);
                    tracing::debug!(%remote, stream, "stream accepted");
                    send_streams.insert(stream, send);
                    spawn_capped_pump(
                        stream,
                        recv,
                        events_tx.clone(),
                        max_request_bytes,
                        VarInt::from_u32(REQUEST_TOO_LARGE_CODE),
                    );
                }
                Err(e) => {
                    tracing::info!(%remote, reason = %e, served, "connection closed");
                    break;
                }
            },

            Some(event) = events.recv() => {
                let closed = matches!(event, TransportEvent::ConnectionClosed { .. });
                match assembler.on_event(event) {
                    Some(InboundRequest::Ready { stream, request }) => {
                        if let Some(send) = send_streams.remove(&stream) {
                            served += 1;
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                let response = handler.respond(&request).await;
                                write_response(stream, send, response).await;
                            });
                        }
                    }
                    Some(InboundRequest::Oversized { stream, limit }) => {
                        if let Some(send) = send_streams.remove(&stream) {
                            let response = handler.oversized(limit);
                            tokio::spawn(write_response(stream, send, response));
                        }
                    }
                    Some(InboundRequest::Abandoned { stream }) => {
                        if let Some(mut send) = send_streams.remove(&stream) {
                            tracing::debug!(%remote, stream, "request abandoned by client");
                            let _ = send.reset(REQUEST_ABANDONED);
                        }
                    }
                    None => {}
                }
                if closed {
                    tracing::info!(%remote, served, "connection closed");
                    break;
                }
            }
        }
    }

    watcher.abort();
}

/// Write the whole response in one go and finish the stream. Failures are
/// confined to this stream.
async fn write_response(stream: StreamId, mut send: SendStream, response: Bytes) {
    let len = response.len();
    if let Err(e) = send.write_all(&response).await {
        tracing::warn!(stream, error = %e, "failed to write response");
        return;
    }
    if let Err(e) = send.finish() {
        tracing::warn!(stream, error = %e, "failed to finish response stream");
        return;
    }
    tracing::debug!(stream, bytes = len, "response sent");
}
