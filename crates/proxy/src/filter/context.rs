//! What a filter can do from inside one of its callbacks.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};

use super::{DecoderFilterHandle, DownstreamWatermarkCallbacks, EncoderFilterHandle};
use crate::connection::Connection;
use crate::protocol::{BodyBuffer, RequestHeader, RequestInfo, ResetReason, ResponseHead};
use crate::route::Route;
use crate::stream::{Command, StreamCore};

/// Callback context of a decoder filter.
///
/// Requests that would re-enter the filter itself, like
/// [`continue_decoding`](Self::continue_decoding), are queued and run once the
/// callback returned.
pub struct DecoderFilterContext<'a> {
    core: &'a mut StreamCore,
    index: usize,
}

impl<'a> DecoderFilterContext<'a> {
    pub(crate) fn new(core: &'a mut StreamCore, index: usize) -> Self {
        Self { core, index }
    }

    pub fn stream_id(&self) -> u64 {
        self.core.stream_id
    }

    /// Position of the current filter in the decoder chain.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn route(&self) -> Option<&dyn Route> {
        self.core.route.as_deref()
    }

    pub fn connection(&self) -> Option<&dyn Connection> {
        self.core.connection.as_deref()
    }

    pub fn request_info(&self) -> &RequestInfo {
        &self.core.request_info
    }

    /// The request body buffered so far, if any filter asked for buffering.
    pub fn decoding_buffer(&self) -> Option<&BodyBuffer> {
        self.core.request.body.as_ref()
    }

    /// A handle to resume this filter later, from any thread.
    pub fn handle(&self) -> DecoderFilterHandle {
        DecoderFilterHandle::new(Weak::clone(&self.core.shared), self.index, self.core.stream_id)
    }

    /// Resumes the chain after this filter once the callback returned.
    pub fn continue_decoding(&mut self) {
        self.core.defer(Command::ContinueDecoding(self.index));
    }

    /// Adds data to the request body on behalf of this filter.
    ///
    /// From a header or data callback the data is only buffered; from a
    /// trailer callback it is passed to the following filters right away.
    pub fn add_decoded_data(&mut self, data: &mut BytesMut, streaming: bool) {
        let data = data.split();
        self.core.add_decoded_data(self.index, data, streaming);
    }

    /// Starts the local response with `head`. Nothing reaches the upstream
    /// after this.
    pub fn encode_headers(&mut self, head: ResponseHead, end_stream: bool) {
        self.core.encode_local_headers(head, end_stream);
    }

    pub fn encode_data(&mut self, data: BytesMut, end_stream: bool) {
        self.core.encode_local_data(data, end_stream);
    }

    pub fn encode_trailers(&mut self, trailers: HeaderMap) {
        self.core.encode_local_trailers(trailers);
    }

    /// Answers the request locally with `status` and an optional body.
    pub fn send_local_reply(&mut self, status: StatusCode, body: Option<Bytes>) {
        self.core.send_local_reply(status, body);
    }

    pub fn reset_stream(&mut self) {
        self.core.reset_stream(ResetReason::LocalReset);
    }

    pub fn on_decoder_filter_above_write_buffer_high_watermark(&mut self) {
        self.core.above_write_buffer_high_watermark();
    }

    pub fn on_decoder_filter_below_write_buffer_low_watermark(&mut self) {
        self.core.below_write_buffer_low_watermark();
    }

    pub fn add_downstream_watermark_callbacks(&mut self, callbacks: Arc<dyn DownstreamWatermarkCallbacks>) {
        self.core.add_watermark_callbacks(callbacks);
    }

    pub fn remove_downstream_watermark_callbacks(&mut self, callbacks: &Arc<dyn DownstreamWatermarkCallbacks>) {
        self.core.remove_watermark_callbacks(callbacks);
    }

    pub fn set_decoder_buffer_limit(&mut self, limit: u32) {
        self.core.decoder_buffer_limit = limit;
    }

    pub fn decoder_buffer_limit(&self) -> u32 {
        self.core.decoder_buffer_limit
    }
}

impl fmt::Debug for DecoderFilterContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderFilterContext")
            .field("stream_id", &self.core.stream_id)
            .field("index", &self.index)
            .field("stage", &self.core.stage)
            .finish()
    }
}

/// Callback context of an encoder filter.
pub struct EncoderFilterContext<'a> {
    core: &'a mut StreamCore,
    index: usize,
}

impl<'a> EncoderFilterContext<'a> {
    pub(crate) fn new(core: &'a mut StreamCore, index: usize) -> Self {
        Self { core, index }
    }

    pub fn stream_id(&self) -> u64 {
        self.core.stream_id
    }

    /// Position of the current filter in the encoder chain.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn route(&self) -> Option<&dyn Route> {
        self.core.route.as_deref()
    }

    pub fn connection(&self) -> Option<&dyn Connection> {
        self.core.connection.as_deref()
    }

    pub fn request_info(&self) -> &RequestInfo {
        &self.core.request_info
    }

    /// The request headers, unless the response is being encoded from inside
    /// the request header phase.
    pub fn request_header(&self) -> Option<&RequestHeader> {
        self.core.request.headers.as_ref()
    }

    /// The response body buffered so far, if any filter asked for buffering.
    pub fn encoding_buffer(&self) -> Option<&BodyBuffer> {
        self.core.response.body.as_ref()
    }

    /// A handle to resume this filter later, from any thread.
    pub fn handle(&self) -> EncoderFilterHandle {
        EncoderFilterHandle::new(Weak::clone(&self.core.shared), self.index, self.core.stream_id)
    }

    /// Resumes the chain after this filter once the callback returned.
    pub fn continue_encoding(&mut self) {
        self.core.defer(Command::ContinueEncoding(self.index));
    }

    /// Adds data to the response body on behalf of this filter.
    ///
    /// From a header or data callback the data is only buffered; from a
    /// trailer callback it is passed to the following filters right away.
    pub fn add_encoded_data(&mut self, data: &mut BytesMut, streaming: bool) {
        let data = data.split();
        self.core.add_encoded_data(self.index, data, streaming);
    }

    pub fn reset_stream(&mut self) {
        self.core.reset_stream(ResetReason::LocalReset);
    }

    /// Notifies the registered downstream watermark callbacks.
    pub fn on_encoder_filter_above_write_buffer_high_watermark(&mut self) {
        self.core.above_write_buffer_high_watermark();
    }

    pub fn on_encoder_filter_below_write_buffer_low_watermark(&mut self) {
        self.core.below_write_buffer_low_watermark();
    }

    pub fn set_encoder_buffer_limit(&mut self, limit: u32) {
        self.core.encoder_buffer_limit = limit;
    }

    pub fn encoder_buffer_limit(&self) -> u32 {
        self.core.encoder_buffer_limit
    }
}

impl fmt::Debug for EncoderFilterContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderFilterContext")
            .field("stream_id", &self.core.stream_id)
            .field("index", &self.index)
            .field("stage", &self.core.stage)
            .finish()
    }
}
