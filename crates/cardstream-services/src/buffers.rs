//! Per-stream reassembly of response bytes.
//!
//! A buffer exists for a stream if and only if the stream was opened and
//! the receiver has not finished with it. Bytes for a stream without a
//! buffer are a protocol violation, never an implicit insert.

use std::collections::HashMap;

use bytes::BytesMut;

use crate::event::StreamId;

#[derive(Debug, Default)]
pub struct StreamBufferTable {
    buffers: HashMap<StreamId, BytesMut>,
}

impl StreamBufferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer. Returns false if one already exists.
    pub fn open(&mut self, stream: StreamId) -> bool {
        if self.buffers.contains_key(&stream) {
            return false;
        }
        self.buffers.insert(stream, BytesMut::new());
        true
    }

    /// Append bytes to an existing buffer. Returns false if untracked.
    pub fn append(&mut self, stream: StreamId, data: &[u8]) -> bool {
        match self.buffers.get_mut(&stream) {
            Some(buffer) => {
                buffer.extend_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Take ownership of a buffer, removing it from the table.
    pub fn take(&mut self, stream: StreamId) -> Option<BytesMut> {
        self.buffers.remove(&stream)
    }

    pub fn contains(&self, stream: StreamId) -> bool {
        self.buffers.contains_key(&stream)
    }

    /// Drop every buffer. Returns how many were released.
    pub fn clear(&mut self) -> usize {
        let released = self.buffers.len();
        self.buffers.clear();
        released
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
