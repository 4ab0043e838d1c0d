//! Handles let a filter reach its stream after a callback returned.
//!
//! A handle holds a weak reference to the stream plus the index of the filter
//! it belongs to. Every call is queued on the stream and applied under the
//! stream's lock, either right away when the stream is idle or by whoever
//! currently holds the lock. Calls made after the stream is gone are dropped.

use std::fmt;
use std::sync::Weak;

use bytes::{Bytes, BytesMut};
use http::StatusCode;
use tracing::debug;

use crate::protocol::ResetReason;
use crate::stream::{Command, Shared};

/// Resumption handle of a decoder filter.
#[derive(Clone)]
pub struct DecoderFilterHandle {
    shared: Weak<Shared>,
    index: usize,
    stream_id: u64,
}

impl DecoderFilterHandle {
    pub(crate) fn new(shared: Weak<Shared>, index: usize, stream_id: u64) -> Self {
        Self { shared, index, stream_id }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns false once the stream has been dropped.
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    /// Resumes the decoder chain right after this filter.
    pub fn continue_decoding(&self) {
        self.submit(Command::ContinueDecoding(self.index));
    }

    /// Adds data to the request body on behalf of this filter.
    pub fn add_decoded_data(&self, data: BytesMut, streaming: bool) {
        self.submit(Command::AddDecodedData { index: self.index, data, streaming });
    }

    /// Answers the request locally. Nothing reaches the upstream after this.
    pub fn send_local_reply(&self, status: StatusCode, body: Option<Bytes>) {
        self.submit(Command::LocalReply { status, body });
    }

    pub fn reset_stream(&self) {
        self.submit(Command::Reset(ResetReason::LocalReset));
    }

    fn submit(&self, command: Command) {
        match self.shared.upgrade() {
            Some(shared) => shared.submit(command),
            None => debug!(stream_id = self.stream_id, index = self.index, ?command, "stream gone, dropping command"),
        }
    }
}

impl fmt::Debug for DecoderFilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderFilterHandle")
            .field("stream_id", &self.stream_id)
            .field("index", &self.index)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Resumption handle of an encoder filter.
#[derive(Clone)]
pub struct EncoderFilterHandle {
    shared: Weak<Shared>,
    index: usize,
    stream_id: u64,
}

impl EncoderFilterHandle {
    pub(crate) fn new(shared: Weak<Shared>, index: usize, stream_id: u64) -> Self {
        Self { shared, index, stream_id }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns false once the stream has been dropped.
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    /// Resumes the encoder chain right after this filter.
    pub fn continue_encoding(&self) {
        self.submit(Command::ContinueEncoding(self.index));
    }

    /// Adds data to the response body on behalf of this filter.
    pub fn add_encoded_data(&self, data: BytesMut, streaming: bool) {
        self.submit(Command::AddEncodedData { index: self.index, data, streaming });
    }

    pub fn reset_stream(&self) {
        self.submit(Command::Reset(ResetReason::LocalReset));
    }

    fn submit(&self, command: Command) {
        match self.shared.upgrade() {
            Some(shared) => shared.submit(command),
            None => debug!(stream_id = self.stream_id, index = self.index, ?command, "stream gone, dropping command"),
        }
    }
}

impl fmt::Debug for EncoderFilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderFilterHandle")
            .field("stream_id", &self.stream_id)
            .field("index", &self.index)
            .field("alive", &self.is_alive())
            .finish()
    }
}
