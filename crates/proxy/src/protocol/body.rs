//! Body accumulation for a single stream direction.
//!
//! A [`BodyBuffer`] is allocated lazily the first time a stopped filter asks
//! the pipeline to keep data around. From then on it is the single
//! accumulation point for its direction until the stream is torn down, even
//! while it is empty.

use bytes::{Bytes, BytesMut};

/// Append-only byte accumulator owned by a stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BodyBuffer {
    inner: BytesMut,
}

impl BodyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { inner: BytesMut::with_capacity(capacity) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Copies `data` to the end of the buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Moves every byte of `chunk` to the end of the buffer, leaving `chunk` empty.
    ///
    /// When the buffer is empty the chunk's storage is adopted without copying.
    pub fn drain_from(&mut self, chunk: &mut BytesMut) {
        let taken = chunk.split();
        if self.inner.is_empty() {
            self.inner = taken;
        } else {
            self.inner.unsplit(taken);
        }
    }

    /// Takes the accumulated bytes out, leaving the buffer allocated but empty.
    pub fn take(&mut self) -> BytesMut {
        self.inner.split()
    }

    /// Puts previously [taken](Self::take) bytes back in front of anything
    /// appended since.
    pub fn restore(&mut self, mut data: BytesMut) {
        let appended = self.inner.split();
        data.unsplit(appended);
        self.inner = data;
    }

    /// Returns a cheap immutable copy of the current content.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

impl AsRef<[u8]> for BodyBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl From<&[u8]> for BodyBuffer {
    fn from(value: &[u8]) -> Self {
        Self { inner: BytesMut::from(value) }
    }
}
