use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Request};
use micro_proxy::filter::{DecoderFilterContext, StreamDecoderFilter};
use micro_proxy::protocol::{FilterStatus, RequestHeader, ResponseHead};
use micro_proxy::sink::{DownstreamResponse, UpstreamRequest};
use micro_proxy::stream::{Stream, StreamBuilder};

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    body: TestBody,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, body: TestBody) -> Self {
        Self { name, group, body }
    }

    pub fn small(name: &'static str, body: TestBody) -> Self {
        Self::new(name, TestGroup::Small, body)
    }

    pub fn normal(name: &'static str, body: TestBody) -> Self {
        Self::new(name, TestGroup::Normal, body)
    }

    pub fn large(name: &'static str, body: TestBody) -> Self {
        Self::new(name, TestGroup::Large, body)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn body(&self) -> &TestBody {
        &self.body
    }

    /// How many filters the chain under test has in each direction.
    pub fn filters(&self) -> usize {
        match self.group {
            TestGroup::Small => 1,
            TestGroup::Normal => 4,
            TestGroup::Large => 16,
        }
    }
}

/// A request body sent as `chunks` copies of `chunk`.
#[derive(Debug, Copy, Clone)]
pub struct TestBody {
    chunk: &'static str,
    chunks: usize,
}

impl TestBody {
    pub const fn new(chunk: &'static str, chunks: usize) -> Self {
        Self { chunk, chunks }
    }

    pub fn chunk(&self) -> &'static str {
        self.chunk
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunk.len() * self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}

/// A decoder that lets everything through.
#[derive(Debug)]
pub struct PassThrough;

impl StreamDecoderFilter for PassThrough {}

/// A decoder holding the whole body, the way a buffering filter does.
#[derive(Debug, Default)]
pub struct HoldBody;

impl StreamDecoderFilter for HoldBody {
    fn decode_data(&mut self, _data: &mut BytesMut, end_stream: bool, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        if end_stream { FilterStatus::Continue } else { FilterStatus::StopIterationAndBuffer }
    }
}

/// Sinks dropping everything they are handed.
#[derive(Debug)]
pub struct NullUpstream;

impl UpstreamRequest for NullUpstream {
    fn send_headers(&mut self, _header: &RequestHeader, _end_stream: bool) {}

    fn send_data(&mut self, data: Bytes, _end_stream: bool) {
        std::hint::black_box(data);
    }

    fn send_trailers(&mut self, _trailers: &HeaderMap) {}
}

#[derive(Debug)]
pub struct NullDownstream;

impl DownstreamResponse for NullDownstream {
    fn write_headers(&mut self, _head: &ResponseHead, _end_stream: bool) {}

    fn write_data(&mut self, data: Bytes, _end_stream: bool) {
        std::hint::black_box(data);
    }

    fn write_trailers(&mut self, _trailers: &HeaderMap) {}
}

pub fn stream_builder() -> StreamBuilder {
    Stream::builder(1, NullUpstream, NullDownstream)
}

/// A stream with `filters` pass-through decoders.
pub fn pass_through_stream(filters: usize) -> Stream {
    (0..filters).fold(stream_builder(), |builder, _| builder.decoder_filter(PassThrough)).build()
}

/// A stream whose first decoder buffers the body, followed by pass-through decoders.
pub fn buffering_stream(filters: usize) -> Stream {
    (1..filters).fold(stream_builder().decoder_filter(HoldBody), |builder, _| builder.decoder_filter(PassThrough)).build()
}

pub fn request() -> RequestHeader {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header("accept-encoding", "gzip")
        .header("content-type", "text/plain")
        .body(())
        .map(RequestHeader::from)
        .unwrap_or_default()
}

/// Pushes a full request with `body` through `stream`.
pub fn send_request(stream: &Stream, body: &TestBody) {
    stream.decode_headers(request(), body.is_empty());
    for i in 0..body.chunks() {
        stream.decode_data(BytesMut::from(body.chunk()), i + 1 == body.chunks());
    }
}
