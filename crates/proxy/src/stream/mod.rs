//! A single proxied exchange and the filter chains it runs through.
//!
//! A [`Stream`] owns everything one request/response exchange needs: the
//! decoder and encoder chains, the request and response headers, bodies and
//! trailers, the [`FilterStage`] register and the terminal flags.
//!
//! # Serialization
//!
//! All entry points, whether the proxy core pushing payloads or a filter
//! resuming the chain through its handle from another thread, are turned into
//! commands and queued on the stream. Whoever acquires the stream's lock
//! drains the queue, so a stream is only ever mutated by one thread at a
//! time and a command issued while another one is running (including from
//! inside a filter callback) runs right after it instead of interleaving.
//!
//! # Example
//!
//! ```
//! use bytes::{Bytes, BytesMut};
//! use http::{HeaderMap, StatusCode};
//! use micro_proxy::filter::{DecoderFilterContext, StreamDecoderFilter};
//! use micro_proxy::protocol::{FilterStatus, RequestHeader, ResponseHead};
//! use micro_proxy::sink::{DownstreamResponse, UpstreamRequest};
//! use micro_proxy::stream::Stream;
//!
//! struct Upstream;
//!
//! impl UpstreamRequest for Upstream {
//!     fn send_headers(&mut self, header: &RequestHeader, end_stream: bool) {
//!         println!("-> {} {} end_stream={end_stream}", header.method(), header.uri());
//!     }
//!
//!     fn send_data(&mut self, data: Bytes, end_stream: bool) {
//!         println!("-> {} bytes end_stream={end_stream}", data.len());
//!     }
//!
//!     fn send_trailers(&mut self, _trailers: &HeaderMap) {}
//! }
//!
//! struct Downstream;
//!
//! impl DownstreamResponse for Downstream {
//!     fn write_headers(&mut self, head: &ResponseHead, _end_stream: bool) {
//!         println!("<- {}", head.status());
//!     }
//!
//!     fn write_data(&mut self, _data: Bytes, _end_stream: bool) {}
//!
//!     fn write_trailers(&mut self, _trailers: &HeaderMap) {}
//! }
//!
//! struct Deny;
//!
//! impl StreamDecoderFilter for Deny {
//!     fn decode_headers(
//!         &mut self,
//!         header: &mut RequestHeader,
//!         _end_stream: bool,
//!         cx: &mut DecoderFilterContext<'_>,
//!     ) -> FilterStatus {
//!         if header.uri().path().starts_with("/admin") {
//!             cx.send_local_reply(StatusCode::FORBIDDEN, None);
//!             return FilterStatus::StopIteration;
//!         }
//!         FilterStatus::Continue
//!     }
//! }
//!
//! let stream = Stream::builder(1, Upstream, Downstream).decoder_filter(Deny).build();
//! stream.decode_headers(RequestHeader::default(), false);
//! stream.decode_data(BytesMut::from("hello"), true);
//! assert!(!stream.snapshot().local_process_done());
//! ```

mod decode;
mod encode;
mod inner;
mod stage;
mod wrapper;

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use tracing::debug;

pub(crate) use self::inner::{Command, StreamCore};
pub use stage::FilterStage;
pub use wrapper::FilterState;

use self::inner::CoreParts;
use crate::connection::Connection;
use crate::filter::{
    DecoderFilterHandle, EncoderFilterHandle, FilterChainFactory, FilterChainFactoryCallbacks, StreamDecoderFilter,
    StreamEncoderFilter,
};
use crate::protocol::{RequestHeader, RequestInfo, ResetReason, ResponseHead, TransportError};
use crate::route::Route;
use crate::sink::{DownstreamResponse, UpstreamRequest};

/// Buffer limit a stream starts with unless configured otherwise.
pub const DEFAULT_BUFFER_LIMIT: u32 = 1024 * 1024;

/// The lock-protected stream plus the queue of commands waiting for it.
pub(crate) struct Shared {
    core: Mutex<StreamCore>,
    pending: Mutex<VecDeque<Command>>,
}

impl Shared {
    /// Queues `command` and drains the queue unless another thread already is.
    pub(crate) fn submit(&self, command: Command) {
        self.pending.lock().push_back(command);
        self.drain();
    }

    fn drain(&self) {
        loop {
            let Some(mut core) = self.core.try_lock() else {
                return;
            };

            loop {
                let next = match core.next_deferred() {
                    Some(command) => Some(command),
                    None => self.pending.lock().pop_front(),
                };
                let Some(command) = next else {
                    break;
                };
                core.apply(command);
            }
            drop(core);

            // a command queued between the last pop and the unlock has no one
            // left to run it
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn inspect<R>(&self, f: impl FnOnce(&StreamCore) -> R) -> R {
        let result = f(&self.core.lock());
        self.drain();
        result
    }
}

/// One proxied request/response exchange.
///
/// Dropping the stream releases its filters; handles the filters still hold
/// turn into no-ops.
pub struct Stream {
    shared: Arc<Shared>,
    stream_id: u64,
}

impl Stream {
    /// Starts building a stream whose request goes to `upstream` and whose
    /// response is written to `downstream`.
    pub fn builder<U, D>(stream_id: u64, upstream: U, downstream: D) -> StreamBuilder
    where
        U: UpstreamRequest + 'static,
        D: DownstreamResponse + 'static,
    {
        StreamBuilder::new(stream_id, Box::new(upstream), Box::new(downstream))
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Pushes the downstream request headers through the decoder chain.
    pub fn decode_headers(&self, header: RequestHeader, end_stream: bool) {
        self.shared.submit(Command::DecodeHeaders { header, end_stream });
    }

    /// Pushes a downstream request body chunk through the decoder chain.
    pub fn decode_data(&self, data: BytesMut, end_stream: bool) {
        self.shared.submit(Command::DecodeData { data, end_stream });
    }

    /// Pushes the downstream request trailers through the decoder chain. The
    /// request is complete afterwards.
    pub fn decode_trailers(&self, trailers: HeaderMap) {
        self.shared.submit(Command::DecodeTrailers(trailers));
    }

    /// Records that the whole downstream request has been received without
    /// delivering a payload.
    pub fn mark_downstream_recv_done(&self) {
        self.shared.submit(Command::DownstreamRecvDone);
    }

    /// Pushes the upstream response headers through the encoder chain.
    pub fn encode_headers(&self, head: ResponseHead, end_stream: bool) {
        self.shared.submit(Command::EncodeHeaders { head, end_stream });
    }

    /// Pushes an upstream response body chunk through the encoder chain.
    pub fn encode_data(&self, data: BytesMut, end_stream: bool) {
        self.shared.submit(Command::EncodeData { data, end_stream });
    }

    /// Pushes the upstream response trailers through the encoder chain.
    pub fn encode_trailers(&self, trailers: HeaderMap) {
        self.shared.submit(Command::EncodeTrailers(trailers));
    }

    /// Resumes the decoder chain after the decoder at `index`.
    pub fn continue_decoding(&self, index: usize) {
        self.shared.submit(Command::ContinueDecoding(index));
    }

    /// Resumes the encoder chain after the encoder at `index`.
    pub fn continue_encoding(&self, index: usize) {
        self.shared.submit(Command::ContinueEncoding(index));
    }

    /// Answers the downstream client without involving the upstream.
    pub fn send_local_reply(&self, status: StatusCode, body: Option<Bytes>) {
        self.shared.submit(Command::LocalReply { status, body });
    }

    /// Resets the stream. Nothing runs through its filters afterwards.
    pub fn reset(&self, reason: ResetReason) {
        self.shared.submit(Command::Reset(reason));
    }

    /// Applies an error of the transport underneath the stream.
    ///
    /// Returns true if the error reset the stream.
    pub fn on_transport_error(&self, error: &TransportError) -> bool {
        match error.reset_reason() {
            Some(reason) => {
                debug!(stream_id = self.stream_id, cause = %error, %reason, "transport error resets stream");
                self.reset(reason);
                true
            }
            None => false,
        }
    }

    /// A handle on the decoder at `index`, as the filter itself would hold.
    ///
    /// Blocks while another thread runs the stream; never call it from inside
    /// a filter callback of the same stream.
    pub fn decoder_handle(&self, index: usize) -> Option<DecoderFilterHandle> {
        let len = self.shared.inspect(|core| core.decoders.len());
        (index < len).then(|| DecoderFilterHandle::new(Arc::downgrade(&self.shared), index, self.stream_id))
    }

    /// A handle on the encoder at `index`, as the filter itself would hold.
    ///
    /// Blocks while another thread runs the stream; never call it from inside
    /// a filter callback of the same stream.
    pub fn encoder_handle(&self, index: usize) -> Option<EncoderFilterHandle> {
        let len = self.shared.inspect(|core| core.encoders.len());
        (index < len).then(|| EncoderFilterHandle::new(Arc::downgrade(&self.shared), index, self.stream_id))
    }

    /// A copy of the stream state.
    ///
    /// Blocks while another thread runs the stream; never call it from inside
    /// a filter callback of the same stream.
    pub fn snapshot(&self) -> StreamSnapshot {
        self.shared.inspect(StreamCore::snapshot)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("stream_id", &self.stream_id).finish_non_exhaustive()
    }
}

/// Builder of a [`Stream`].
pub struct StreamBuilder {
    stream_id: u64,
    decoders: Vec<Box<dyn StreamDecoderFilter>>,
    encoders: Vec<Box<dyn StreamEncoderFilter>>,
    route: Option<Arc<dyn Route>>,
    connection: Option<Arc<dyn Connection>>,
    request_info: Option<RequestInfo>,
    decoder_buffer_limit: u32,
    encoder_buffer_limit: u32,
    upstream: Box<dyn UpstreamRequest>,
    downstream: Box<dyn DownstreamResponse>,
}

impl StreamBuilder {
    fn new(stream_id: u64, upstream: Box<dyn UpstreamRequest>, downstream: Box<dyn DownstreamResponse>) -> Self {
        Self {
            stream_id,
            decoders: Vec::new(),
            encoders: Vec::new(),
            route: None,
            connection: None,
            request_info: None,
            decoder_buffer_limit: DEFAULT_BUFFER_LIMIT,
            encoder_buffer_limit: DEFAULT_BUFFER_LIMIT,
            upstream,
            downstream,
        }
    }

    /// Appends a decoder filter to the chain.
    #[must_use]
    pub fn decoder_filter<F>(mut self, filter: F) -> Self
    where
        F: StreamDecoderFilter + 'static,
    {
        self.decoders.push(Box::new(filter));
        self
    }

    /// Appends an encoder filter to the chain.
    #[must_use]
    pub fn encoder_filter<F>(mut self, filter: F) -> Self
    where
        F: StreamEncoderFilter + 'static,
    {
        self.encoders.push(Box::new(filter));
        self
    }

    /// Appends the filters `factory` creates.
    #[must_use]
    pub fn filter_chain(mut self, factory: &dyn FilterChainFactory) -> Self {
        factory.create_filter_chain(&mut self);
        self
    }

    #[must_use]
    pub fn route(mut self, route: Arc<dyn Route>) -> Self {
        self.route = Some(route);
        self
    }

    #[must_use]
    pub fn connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    #[must_use]
    pub fn request_info(mut self, request_info: RequestInfo) -> Self {
        self.request_info = Some(request_info);
        self
    }

    #[must_use]
    pub fn decoder_buffer_limit(mut self, limit: u32) -> Self {
        self.decoder_buffer_limit = limit;
        self
    }

    #[must_use]
    pub fn encoder_buffer_limit(mut self, limit: u32) -> Self {
        self.encoder_buffer_limit = limit;
        self
    }

    pub fn build(self) -> Stream {
        let stream_id = self.stream_id;
        let parts = CoreParts {
            stream_id,
            decoders: self.decoders,
            encoders: self.encoders,
            route: self.route,
            connection: self.connection,
            request_info: self.request_info.unwrap_or_default(),
            decoder_buffer_limit: self.decoder_buffer_limit,
            encoder_buffer_limit: self.encoder_buffer_limit,
            upstream: self.upstream,
            downstream: self.downstream,
        };

        let shared = Arc::new_cyclic(|weak| Shared {
            core: Mutex::new(StreamCore::new(parts, weak)),
            pending: Mutex::new(VecDeque::new()),
        });
        debug!(stream_id, "stream created");
        Stream { shared, stream_id }
    }
}

impl FilterChainFactoryCallbacks for StreamBuilder {
    fn add_stream_decoder_filter(&mut self, filter: Box<dyn StreamDecoderFilter>) {
        self.decoders.push(filter);
    }

    fn add_stream_encoder_filter(&mut self, filter: Box<dyn StreamEncoderFilter>) {
        self.encoders.push(filter);
    }
}

impl fmt::Debug for StreamBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuilder")
            .field("stream_id", &self.stream_id)
            .field("decoders", &self.decoders.len())
            .field("encoders", &self.encoders.len())
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a stream's state.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    stream_id: u64,
    stage: FilterStage,
    downstream_recv_done: bool,
    local_process_done: bool,
    reset: Option<ResetReason>,
    decoders: Vec<FilterState>,
    encoders: Vec<FilterState>,
    decoding_buffer: Option<Bytes>,
    encoding_buffer: Option<Bytes>,
    decoder_streaming: bool,
    encoder_streaming: bool,
    decoder_buffer_limit: u32,
    encoder_buffer_limit: u32,
    request_info: RequestInfo,
}

impl StreamSnapshot {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn stage(&self) -> FilterStage {
        self.stage
    }

    pub fn downstream_recv_done(&self) -> bool {
        self.downstream_recv_done
    }

    pub fn local_process_done(&self) -> bool {
        self.local_process_done
    }

    pub fn reset_reason(&self) -> Option<ResetReason> {
        self.reset
    }

    pub fn decoders(&self) -> &[FilterState] {
        &self.decoders
    }

    pub fn encoders(&self) -> &[FilterState] {
        &self.encoders
    }

    /// The request body buffer, `None` while it was never allocated.
    pub fn decoding_buffer(&self) -> Option<&Bytes> {
        self.decoding_buffer.as_ref()
    }

    /// The response body buffer, `None` while it was never allocated.
    pub fn encoding_buffer(&self) -> Option<&Bytes> {
        self.encoding_buffer.as_ref()
    }

    pub fn decoder_streaming(&self) -> bool {
        self.decoder_streaming
    }

    pub fn encoder_streaming(&self) -> bool {
        self.encoder_streaming
    }

    pub fn decoder_buffer_limit(&self) -> u32 {
        self.decoder_buffer_limit
    }

    pub fn encoder_buffer_limit(&self) -> u32 {
        self.encoder_buffer_limit
    }

    pub fn request_info(&self) -> &RequestInfo {
        &self.request_info
    }
}
