use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use tracing::{debug, trace, warn};

use super::stage::FilterStage;
use super::wrapper::{DecoderWrapper, EncoderWrapper, FilterWrapper};
use super::{Shared, StreamSnapshot};
use crate::connection::Connection;
use crate::filter::{
    DecoderFilterContext, DecoderFilterHandle, DownstreamWatermarkCallbacks, EncoderFilterContext,
    EncoderFilterHandle, StreamDecoderFilter, StreamEncoderFilter,
};
use crate::protocol::{BodyBuffer, RequestHeader, RequestInfo, ResetReason, ResponseHead, local_reply_head};
use crate::route::Route;
use crate::sink::{DownstreamResponse, UpstreamRequest};

/// Work submitted to a stream. Every entry point of the pipeline, from the
/// proxy core or from a filter handle, is turned into one of these and applied
/// while the stream is locked.
#[derive(Debug)]
pub(crate) enum Command {
    DecodeHeaders { header: RequestHeader, end_stream: bool },
    DecodeData { data: BytesMut, end_stream: bool },
    DecodeTrailers(HeaderMap),
    DownstreamRecvDone,
    EncodeHeaders { head: ResponseHead, end_stream: bool },
    EncodeData { data: BytesMut, end_stream: bool },
    EncodeTrailers(HeaderMap),
    ContinueDecoding(usize),
    ContinueEncoding(usize),
    AddDecodedData { index: usize, data: BytesMut, streaming: bool },
    AddEncodedData { index: usize, data: BytesMut, streaming: bool },
    LocalReply { status: StatusCode, body: Option<Bytes> },
    Reset(ResetReason),
}

/// Where the payload of a data phase comes from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum DataSource {
    /// A chunk that just arrived. It is appended to the body buffer when kept.
    Chunk,
    /// The content of the body buffer itself, taken out for a replay. It is put
    /// back in front of the buffer unless the chain let it through.
    Buffered,
}

/// How a phase invocation ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PhaseOutcome {
    /// The chain was exhausted and the payload left the pipeline.
    Completed,
    /// A filter stopped iteration, or the stream became terminal.
    Stopped,
    /// A stopped filter let the payload through and its resumption took over.
    Resumed,
    /// The phase did not run at all.
    Skipped,
}

/// Headers, body and trailers of one direction.
pub(crate) struct MessageParts<H> {
    pub(crate) headers: Option<H>,
    pub(crate) body: Option<BodyBuffer>,
    pub(crate) trailers: Option<HeaderMap>,
    pub(crate) streaming: bool,
}

impl<H> Default for MessageParts<H> {
    fn default() -> Self {
        Self { headers: None, body: None, trailers: None, streaming: false }
    }
}

impl<H> MessageParts<H> {
    /// Whether a resumption has body data to replay. An emptied buffer is only
    /// replayed when it has to carry the end of the stream.
    pub(crate) fn has_replay_data(&self, ends_stream: bool) -> bool {
        self.body.as_ref().is_some_and(|body| !body.is_empty() || ends_stream)
    }

    /// Keeps `data` in the body buffer, allocating the buffer on first use.
    pub(crate) fn buffer(&mut self, mut data: BytesMut, source: DataSource) {
        let body = self.body.get_or_insert_default();
        match source {
            DataSource::Chunk => body.drain_from(&mut data),
            DataSource::Buffered => body.restore(data),
        }
    }
}

/// Everything a stream owns. Only ever touched through `&mut` while the
/// stream's lock is held.
pub(crate) struct StreamCore {
    pub(crate) stream_id: u64,
    pub(crate) decoders: Vec<DecoderWrapper>,
    pub(crate) encoders: Vec<EncoderWrapper>,
    pub(crate) request: MessageParts<RequestHeader>,
    pub(crate) response: MessageParts<ResponseHead>,
    pub(crate) stage: FilterStage,
    pub(crate) downstream_recv_done: bool,
    pub(crate) local_process_done: bool,
    pub(crate) reset: Option<ResetReason>,
    released: bool,
    pub(crate) decoder_buffer_limit: u32,
    pub(crate) encoder_buffer_limit: u32,
    watermark_callbacks: Vec<Arc<dyn DownstreamWatermarkCallbacks>>,
    pub(crate) route: Option<Arc<dyn Route>>,
    pub(crate) connection: Option<Arc<dyn Connection>>,
    pub(crate) request_info: RequestInfo,
    pub(crate) upstream: Box<dyn UpstreamRequest>,
    pub(crate) downstream: Box<dyn DownstreamResponse>,
    pub(crate) shared: Weak<Shared>,
    deferred: VecDeque<Command>,
}

pub(crate) struct CoreParts {
    pub(crate) stream_id: u64,
    pub(crate) decoders: Vec<Box<dyn StreamDecoderFilter>>,
    pub(crate) encoders: Vec<Box<dyn StreamEncoderFilter>>,
    pub(crate) route: Option<Arc<dyn Route>>,
    pub(crate) connection: Option<Arc<dyn Connection>>,
    pub(crate) request_info: RequestInfo,
    pub(crate) decoder_buffer_limit: u32,
    pub(crate) encoder_buffer_limit: u32,
    pub(crate) upstream: Box<dyn UpstreamRequest>,
    pub(crate) downstream: Box<dyn DownstreamResponse>,
}

impl StreamCore {
    /// Wraps the filters in chain order and hands each one its handle.
    pub(crate) fn new(parts: CoreParts, shared: &Weak<Shared>) -> Self {
        let stream_id = parts.stream_id;

        let decoders = parts
            .decoders
            .into_iter()
            .enumerate()
            .map(|(index, mut filter)| {
                filter.set_decoder_filter_handle(DecoderFilterHandle::new(Weak::clone(shared), index, stream_id));
                FilterWrapper::new(index, filter)
            })
            .collect();

        let encoders = parts
            .encoders
            .into_iter()
            .enumerate()
            .map(|(index, mut filter)| {
                filter.set_encoder_filter_handle(EncoderFilterHandle::new(Weak::clone(shared), index, stream_id));
                FilterWrapper::new(index, filter)
            })
            .collect();

        Self {
            stream_id,
            decoders,
            encoders,
            request: MessageParts::default(),
            response: MessageParts::default(),
            stage: FilterStage::empty(),
            downstream_recv_done: false,
            local_process_done: false,
            reset: None,
            released: false,
            decoder_buffer_limit: parts.decoder_buffer_limit,
            encoder_buffer_limit: parts.encoder_buffer_limit,
            watermark_callbacks: Vec::new(),
            route: parts.route,
            connection: parts.connection,
            request_info: parts.request_info,
            upstream: parts.upstream,
            downstream: parts.downstream,
            shared: Weak::clone(shared),
            deferred: VecDeque::new(),
        }
    }

    /// Queues work raised from inside a filter callback. It runs once the
    /// command being applied has finished.
    pub(crate) fn defer(&mut self, command: Command) {
        if self.reset.is_some() {
            return;
        }
        self.deferred.push_back(command);
    }

    pub(crate) fn next_deferred(&mut self) -> Option<Command> {
        self.deferred.pop_front()
    }

    pub(crate) fn apply(&mut self, command: Command) {
        if let Some(reason) = self.reset {
            debug!(stream_id = self.stream_id, %reason, ?command, "stream already reset, dropping command");
            return;
        }

        trace!(stream_id = self.stream_id, ?command, "applying command");
        match command {
            Command::DecodeHeaders { header, end_stream } => self.on_decode_headers(header, end_stream),
            Command::DecodeData { data, end_stream } => self.on_decode_data(data, end_stream),
            Command::DecodeTrailers(trailers) => self.on_decode_trailers(trailers),
            Command::DownstreamRecvDone => self.downstream_recv_done = true,
            Command::EncodeHeaders { head, end_stream } => self.on_encode_headers(head, end_stream),
            Command::EncodeData { data, end_stream } => self.on_encode_data(data, end_stream),
            Command::EncodeTrailers(trailers) => self.on_encode_trailers(trailers),
            Command::ContinueDecoding(index) => self.continue_decoding(index),
            Command::ContinueEncoding(index) => self.continue_encoding(index),
            Command::AddDecodedData { index, data, streaming } => self.add_decoded_data(index, data, streaming),
            Command::AddEncodedData { index, data, streaming } => self.add_encoded_data(index, data, streaming),
            Command::LocalReply { status, body } => self.send_local_reply(status, body),
            Command::Reset(reason) => self.reset_stream(reason),
        }

        if self.reset.is_some() {
            self.release();
        }
    }

    /// Marks the stream terminal. Phases stop at the next filter boundary and
    /// the filters are released once the current command unwinds.
    pub(crate) fn reset_stream(&mut self, reason: ResetReason) {
        if self.reset.is_some() {
            return;
        }
        warn!(stream_id = self.stream_id, %reason, stage = ?self.stage, "stream reset");
        self.reset = Some(reason);
        self.request_info.set_reset_reason(reason);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let reason = self.reset.unwrap_or(ResetReason::LocalReset);

        for wrapper in &mut self.decoders {
            wrapper.destroy();
        }
        for wrapper in &mut self.encoders {
            wrapper.destroy();
        }
        self.decoders.clear();
        self.encoders.clear();
        self.request.body = None;
        self.response.body = None;
        self.deferred.clear();
        self.watermark_callbacks.clear();

        self.upstream.on_reset(reason);
        self.downstream.on_reset(reason);
        debug!(stream_id = self.stream_id, %reason, "stream released");
    }

    #[inline]
    pub(crate) fn is_terminated(&self) -> bool {
        self.reset.is_some()
    }

    /// Runs one decoder callback with the stage bit of its phase set.
    ///
    /// Returns `None` when the filter is not available, which happens when it
    /// is already inside a callback of its own.
    pub(crate) fn invoke_decoder<R>(
        &mut self,
        index: usize,
        stage: FilterStage,
        invoke: impl FnOnce(&mut dyn StreamDecoderFilter, &mut DecoderFilterContext<'_>) -> R,
    ) -> Option<R> {
        let Some(mut filter) = self.decoders.get_mut(index).and_then(FilterWrapper::take_filter) else {
            warn!(stream_id = self.stream_id, index, ?stage, "decoder filter unavailable, skipping callback");
            return None;
        };

        let previous = self.stage.enter(stage);
        let result = invoke(&mut *filter, &mut DecoderFilterContext::new(self, index));
        self.stage = previous;

        if let Some(wrapper) = self.decoders.get_mut(index) {
            wrapper.put_filter(filter);
        }
        Some(result)
    }

    /// Runs one encoder callback with the stage bit of its phase set.
    pub(crate) fn invoke_encoder<R>(
        &mut self,
        index: usize,
        stage: FilterStage,
        invoke: impl FnOnce(&mut dyn StreamEncoderFilter, &mut EncoderFilterContext<'_>) -> R,
    ) -> Option<R> {
        let Some(mut filter) = self.encoders.get_mut(index).and_then(FilterWrapper::take_filter) else {
            warn!(stream_id = self.stream_id, index, ?stage, "encoder filter unavailable, skipping callback");
            return None;
        };

        let previous = self.stage.enter(stage);
        let result = invoke(&mut *filter, &mut EncoderFilterContext::new(self, index));
        self.stage = previous;

        if let Some(wrapper) = self.encoders.get_mut(index) {
            wrapper.put_filter(filter);
        }
        Some(result)
    }

    /// Answers the downstream client locally. Decoding stops for good.
    pub(crate) fn send_local_reply(&mut self, status: StatusCode, body: Option<Bytes>) {
        if self.response.headers.is_some() {
            warn!(stream_id = self.stream_id, %status, "response already started, dropping local reply");
            return;
        }
        debug!(stream_id = self.stream_id, %status, "sending local reply");

        let head = local_reply_head(status, body.as_ref().map(Bytes::len));
        self.encode_local_headers(head, body.is_none());
        if let Some(body) = body {
            self.encode_local_data(BytesMut::from(body), true);
        }
    }

    pub(crate) fn encode_local_headers(&mut self, head: ResponseHead, end_stream: bool) {
        self.local_process_done = true;
        self.on_encode_headers(head, end_stream);
    }

    pub(crate) fn encode_local_data(&mut self, data: BytesMut, end_stream: bool) {
        self.local_process_done = true;
        self.on_encode_data(data, end_stream);
    }

    pub(crate) fn encode_local_trailers(&mut self, trailers: HeaderMap) {
        self.local_process_done = true;
        self.on_encode_trailers(trailers);
    }

    pub(crate) fn above_write_buffer_high_watermark(&self) {
        debug!(stream_id = self.stream_id, callbacks = self.watermark_callbacks.len(), "above write buffer high watermark");
        for callbacks in &self.watermark_callbacks {
            callbacks.on_above_write_buffer_high_watermark();
        }
    }

    pub(crate) fn below_write_buffer_low_watermark(&self) {
        debug!(stream_id = self.stream_id, callbacks = self.watermark_callbacks.len(), "below write buffer low watermark");
        for callbacks in &self.watermark_callbacks {
            callbacks.on_below_write_buffer_low_watermark();
        }
    }

    pub(crate) fn add_watermark_callbacks(&mut self, callbacks: Arc<dyn DownstreamWatermarkCallbacks>) {
        self.watermark_callbacks.push(callbacks);
    }

    pub(crate) fn remove_watermark_callbacks(&mut self, callbacks: &Arc<dyn DownstreamWatermarkCallbacks>) {
        let target = Arc::as_ptr(callbacks).cast::<()>();
        self.watermark_callbacks.retain(|registered| Arc::as_ptr(registered).cast::<()>() != target);
    }

    pub(crate) fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            stream_id: self.stream_id,
            stage: self.stage,
            downstream_recv_done: self.downstream_recv_done,
            local_process_done: self.local_process_done,
            reset: self.reset,
            decoders: self.decoders.iter().map(|wrapper| wrapper.state).collect(),
            encoders: self.encoders.iter().map(|wrapper| wrapper.state).collect(),
            decoding_buffer: self.request.body.as_ref().map(BodyBuffer::to_bytes),
            encoding_buffer: self.response.body.as_ref().map(BodyBuffer::to_bytes),
            decoder_streaming: self.request.streaming,
            encoder_streaming: self.response.streaming,
            decoder_buffer_limit: self.decoder_buffer_limit,
            encoder_buffer_limit: self.encoder_buffer_limit,
            request_info: self.request_info.clone(),
        }
    }
}

impl Drop for StreamCore {
    fn drop(&mut self) {
        for wrapper in &mut self.decoders {
            wrapper.destroy();
        }
        for wrapper in &mut self.encoders {
            wrapper.destroy();
        }
    }
}

impl fmt::Debug for StreamCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCore")
            .field("stream_id", &self.stream_id)
            .field("stage", &self.stage)
            .field("decoders", &self.decoders)
            .field("encoders", &self.encoders)
            .field("downstream_recv_done", &self.downstream_recv_done)
            .field("local_process_done", &self.local_process_done)
            .field("reset", &self.reset)
            .finish_non_exhaustive()
    }
}
