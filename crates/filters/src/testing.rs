//! Recording sinks shared by the filter tests.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Uri};
use micro_proxy::protocol::{RequestHeader, ResetReason, ResponseHead};
use micro_proxy::sink::{DownstreamResponse, UpstreamRequest};
use micro_proxy::stream::{Stream, StreamBuilder};
use parking_lot::Mutex;

/// The request head as it was sent upstream.
#[derive(Debug, Clone)]
pub(crate) struct SentRequest {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    UpstreamHeaders { end_stream: bool },
    UpstreamData { data: Bytes, end_stream: bool },
    UpstreamTrailers,
    DownstreamHeaders { status: u16, end_stream: bool },
    DownstreamData { data: Bytes, end_stream: bool },
    DownstreamTrailers,
    Reset(ResetReason),
}

/// Collects what reaches both ends of a stream, plus the last header seen on
/// each side.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    request: Arc<Mutex<Option<SentRequest>>>,
    response: Arc<Mutex<Option<HeaderMap>>>,
}

impl Recorder {
    pub(crate) fn stream(&self, stream_id: u64) -> StreamBuilder {
        Stream::builder(stream_id, RecordingUpstream(self.clone()), RecordingDownstream(self.clone()))
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Every body byte written downstream, in order.
    pub(crate) fn downstream_body(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::DownstreamData { data, .. } => Some(data.clone()),
                _ => None,
            })
            .flat_map(|data| data.to_vec())
            .collect()
    }

    pub(crate) fn upstream_request(&self) -> Option<SentRequest> {
        self.request.lock().clone()
    }

    pub(crate) fn downstream_headers(&self) -> Option<HeaderMap> {
        self.response.lock().clone()
    }
}

struct RecordingUpstream(Recorder);

impl UpstreamRequest for RecordingUpstream {
    fn send_headers(&mut self, header: &RequestHeader, end_stream: bool) {
        *self.0.request.lock() = Some(SentRequest {
            method: header.method().clone(),
            uri: header.uri().clone(),
            headers: header.headers().clone(),
        });
        self.0.events.lock().push(Event::UpstreamHeaders { end_stream });
    }

    fn send_data(&mut self, data: Bytes, end_stream: bool) {
        self.0.events.lock().push(Event::UpstreamData { data, end_stream });
    }

    fn send_trailers(&mut self, _trailers: &HeaderMap) {
        self.0.events.lock().push(Event::UpstreamTrailers);
    }

    fn on_reset(&mut self, reason: ResetReason) {
        self.0.events.lock().push(Event::Reset(reason));
    }
}

struct RecordingDownstream(Recorder);

impl DownstreamResponse for RecordingDownstream {
    fn write_headers(&mut self, head: &ResponseHead, end_stream: bool) {
        *self.0.response.lock() = Some(head.headers().clone());
        self.0.events.lock().push(Event::DownstreamHeaders { status: head.status().as_u16(), end_stream });
    }

    fn write_data(&mut self, data: Bytes, end_stream: bool) {
        self.0.events.lock().push(Event::DownstreamData { data, end_stream });
    }

    fn write_trailers(&mut self, _trailers: &HeaderMap) {
        self.0.events.lock().push(Event::DownstreamTrailers);
    }
}

/// A `GET /` request carrying the given headers.
pub(crate) fn request(headers: &[(&'static str, &'static str)]) -> RequestHeader {
    let mut builder = Request::builder().method(Method::GET).uri("/");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).unwrap().into()
}
