//! Request dispatcher. One stream per request.
//!
//! Each request is written in full with FIN set, so the stream is
//! half-closed for writing as soon as it is dispatched. The stream is
//! registered with the session before its request is sent, so a response
//! can never arrive for a stream the session doesn't know about.

use cardstream_core::wire::RequestItem;

use crate::event::StreamTransport;
use crate::session::{ClientSession, SessionError};

/// Dispatch every item, then seal the batch.
///
/// Any failure aborts the batch: the session resolves with the error and
/// releases whatever it had buffered. Returns the number of streams opened.
pub async fn dispatch_batch<T>(
    session: &mut ClientSession,
    transport: &mut T,
    items: Vec<RequestItem>,
) -> Result<usize, SessionError>
where
    T: StreamTransport + ?Sized,
{
    let count = items.len();
    match dispatch_all(session, transport, items).await {
        Ok(()) => {
            session.seal();
            tracing::debug!(requests = count, "batch dispatched");
            Ok(count)
        }
        Err(e) => {
            session.abort(e.clone());
            Err(e)
        }
    }
}

async fn dispatch_all<T>(
    session: &mut ClientSession,
    transport: &mut T,
    items: Vec<RequestItem>,
) -> Result<(), SessionError>
where
    T: StreamTransport + ?Sized,
{
    for item in items {
        let stream = transport.open_stream().await?;
        session.register(stream, item.clone())?;
        transport.send(stream, item.encode(), true).await?;
        transport.transmit().await?;
        tracing::debug!(stream, request = %item, "request dispatched");
    }
    Ok(())
}
