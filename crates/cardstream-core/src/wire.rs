//! cardstream wire format — request and response payloads.
//!
//! Framing is the transport's job. Every request is one UTF-8 string sent
//! on its own stream with FIN set; every response is one opaque blob sent
//! back on the same stream. There is no type tag on the response: the
//! receiver classifies it purely by length (see [`classify`]).
//!
//! Changing any constant here is a breaking protocol change.

use bytes::Bytes;

// ── Image geometry ────────────────────────────────────────────────────────────

/// Width of one card face in pixels.
pub const FACE_WIDTH: u32 = 672;

/// Height of one card face in pixels.
pub const FACE_HEIGHT: u32 = 936;

/// Bytes per pixel (24-bit RGB, no alpha).
pub const BYTES_PER_PIXEL: usize = 3;

/// Length of one raw RGB face: 672 × 936 × 3 = 1,886,976 bytes.
pub const SINGLE_IMAGE_LEN: usize = FACE_WIDTH as usize * FACE_HEIGHT as usize * BYTES_PER_PIXEL;

/// Length of a front face followed by a back face: 3,773,952 bytes.
pub const DUAL_IMAGE_LEN: usize = 2 * SINGLE_IMAGE_LEN;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Request string meaning "pick a random card".
pub const RANDOM_SENTINEL: &str = "-r";

/// ALPN identifier negotiated by client and server.
pub const ALPN: &[u8] = b"cardstream/1";

/// Application error code used when the client gives up on a batch.
pub const BATCH_ABORTED_CODE: u32 = 0x01;

/// Application error code for a clean client-side close.
pub const CLOSE_OK_CODE: u32 = 0x00;

/// Stop-sending code the server uses once a request outgrows its limit.
pub const REQUEST_TOO_LARGE_CODE: u32 = 0x03;

// ── Requests ──────────────────────────────────────────────────────────────────

/// One logical request. Consumed once by the dispatcher to produce one stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestItem {
    /// Exact card name.
    Named(String),
    /// Random draw from the catalog.
    Random,
}

impl RequestItem {
    /// Encode as the request bytes written to the stream.
    pub fn encode(&self) -> Bytes {
        match self {
            RequestItem::Named(name) => Bytes::copy_from_slice(name.as_bytes()),
            RequestItem::Random => Bytes::from_static(RANDOM_SENTINEL.as_bytes()),
        }
    }

    /// Decode a complete request received on a stream.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(WireError::InvalidUtf8)?;
        Ok(Self::from_text(text))
    }

    fn from_text(text: &str) -> Self {
        if text == RANDOM_SENTINEL {
            RequestItem::Random
        } else {
            RequestItem::Named(text.to_string())
        }
    }
}

impl std::fmt::Display for RequestItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestItem::Named(name) => write!(f, "{name}"),
            RequestItem::Random => write!(f, "<random>"),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// A complete response blob, interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedPayload {
    /// Raw RGB pixels for one face, exactly [`SINGLE_IMAGE_LEN`] bytes.
    SingleImage(Bytes),
    /// Front and back faces, each exactly [`SINGLE_IMAGE_LEN`] bytes.
    DualImage { front: Bytes, back: Bytes },
    /// Human-readable error text from the server.
    ErrorText(String),
}

impl ClassifiedPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifiedPayload::SingleImage(_) => "single_image",
            ClassifiedPayload::DualImage { .. } => "dual_image",
            ClassifiedPayload::ErrorText(_) => "error_text",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, ClassifiedPayload::ErrorText(_))
    }
}

/// Classify a complete response by its length.
///
/// Total over every length: the two image cases are exact-length matches
/// and everything else is error text. Text whose length happens to equal
/// one of the image lengths would be misread as pixels; servers prevent
/// that with [`error_response`].
pub fn classify(mut bytes: Bytes) -> Result<ClassifiedPayload, WireError> {
    match bytes.len() {
        SINGLE_IMAGE_LEN => Ok(ClassifiedPayload::SingleImage(bytes)),
        DUAL_IMAGE_LEN => {
            let back = bytes.split_off(SINGLE_IMAGE_LEN);
            Ok(ClassifiedPayload::DualImage { front: bytes, back })
        }
        _ => {
            let text = std::str::from_utf8(&bytes).map_err(WireError::InvalidUtf8)?;
            Ok(ClassifiedPayload::ErrorText(text.to_string()))
        }
    }
}

/// Encode error text as a response, padded by one space if its length
/// collides with an image length.
pub fn error_response(text: &str) -> Bytes {
    let mut bytes = text.as_bytes().to_vec();
    if bytes.len() == SINGLE_IMAGE_LEN || bytes.len() == DUAL_IMAGE_LEN {
        bytes.push(b' ');
    }
    Bytes::from(bytes)
}

/// The lookup-miss message for `name`, before padding.
pub fn not_found_message(name: &str) -> String {
    format!("No card by the name '{name}' found...")
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(std::str::Utf8Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
