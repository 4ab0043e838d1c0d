//! Whole-body request buffering.
//!
//! [`BufferFilter`] holds the request headers and every body chunk until the
//! request is complete, then lets the chain continue with the full body in a
//! single data call and a `content-length` matching it. Requests larger than
//! the configured limit are answered with `413 Payload Too Large`.

use bytes::BytesMut;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderValue, StatusCode};
use micro_proxy::filter::{DecoderFilterContext, StreamDecoderFilter};
use micro_proxy::protocol::{FilterStatus, RequestHeader};
use tracing::{debug, warn};

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct BufferFilter {
    max_request_bytes: usize,
    received: usize,
    headers_held: bool,
}

impl BufferFilter {
    pub fn new(max_request_bytes: usize) -> Self {
        Self { max_request_bytes, received: 0, headers_held: false }
    }

    fn reject(&self, cx: &mut DecoderFilterContext<'_>, len: usize) -> FilterStatus {
        warn!(stream_id = cx.stream_id(), len, max = self.max_request_bytes, "request body too large");
        cx.send_local_reply(StatusCode::PAYLOAD_TOO_LARGE, None);
        FilterStatus::StopIterationNoBuffer
    }
}

impl Default for BufferFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUEST_BYTES)
    }
}

impl StreamDecoderFilter for BufferFilter {
    fn decode_headers(&mut self, header: &mut RequestHeader, end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        if self.headers_held {
            // replayed once the body is complete
            if let Some(buffer) = cx.decoding_buffer() {
                let headers = header.headers_mut();
                headers.remove(TRANSFER_ENCODING);
                headers.insert(CONTENT_LENGTH, HeaderValue::from(buffer.len()));
            }
            return FilterStatus::Continue;
        }

        if end_stream {
            return FilterStatus::Continue;
        }

        let declared = header
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());
        if let Some(len) = declared.filter(|len| *len > self.max_request_bytes) {
            return self.reject(cx, len);
        }

        debug!(stream_id = cx.stream_id(), index = cx.index(), "holding request headers until the body is complete");
        self.headers_held = true;
        FilterStatus::StopIteration
    }

    fn decode_data(&mut self, data: &mut BytesMut, end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        self.received += data.len();
        if self.received > self.max_request_bytes {
            return self.reject(cx, self.received);
        }

        if end_stream { FilterStatus::Continue } else { FilterStatus::StopIterationAndBuffer }
    }
}
