//! cardstream-services — the client session, the server request path and
//! the QUIC plumbing both sides share.

pub mod buffers;
pub mod catalog;
pub mod client;
pub mod dispatch;
pub mod event;
pub mod handler;
pub mod image_source;
pub mod server;
pub mod session;
pub mod tls;
pub mod transport;

pub use buffers::StreamBufferTable;
pub use catalog::{CardCatalog, CardFaces, CatalogEntry, CatalogError};
pub use client::{BatchClient, ClientError};
pub use dispatch::dispatch_batch;
pub use event::{StreamId, StreamTransport, TransportEvent};
pub use handler::{InboundRequest, RequestAssembler, RequestHandler};
pub use image_source::{FetchError, HttpImageSource, ImageSource};
pub use server::serve;
pub use session::{
    BatchHandle, BatchReport, ClientSession, CompletedResponse, PayloadSink, SessionError, StreamFailure,
};
pub use tls::{insecure_client_config, server_config, TlsError};
pub use transport::QuicTransport;
