//! Response body compression.
//!
//! [`CompressionFilter`] negotiates a content coding from the request's
//! `Accept-Encoding` header and compresses text-like response bodies chunk by
//! chunk as they pass through the encoder chain. Responses that are already
//! encoded, declared smaller than the configured minimum, or whose media type
//! does not compress well are left untouched.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use http::{HeaderMap, HeaderValue, StatusCode};
use micro_proxy::filter::{EncoderFilterContext, StreamEncoderFilter};
use micro_proxy::protocol::{FilterStatus, ResponseHead};
use mime::Mime;
use tracing::{debug, error};

mod encoder;

pub use encoder::ContentEncoding;
use encoder::Encoder;

pub const DEFAULT_MIN_LENGTH: usize = 1024;

// inspired by from actix-http
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Which responses get compressed, and with what.
#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    min_length: usize,
    encodings: Vec<ContentEncoding>,
}

impl CompressionPolicy {
    /// `encodings` are tried in the given order against what the client accepts.
    pub fn new(min_length: usize, encodings: Vec<ContentEncoding>) -> Self {
        Self { min_length, encodings }
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn encodings(&self) -> &[ContentEncoding] {
        &self.encodings
    }

    fn is_compressible(content_type: &Mime) -> bool {
        content_type.type_() == mime::TEXT
            || matches!(content_type.subtype().as_str(), "json" | "javascript" | "xml" | "wasm")
            || content_type.suffix().is_some_and(|suffix| suffix == mime::JSON || suffix == mime::XML)
    }

    /// Picks the coding for a response, `None` leaves the body alone.
    fn negotiate(&self, head: &ResponseHead, accept_encodings: Option<&HeaderValue>) -> Option<ContentEncoding> {
        let status = head.status();
        if status == StatusCode::NO_CONTENT
            || status == StatusCode::SWITCHING_PROTOCOLS
            || status == StatusCode::NOT_MODIFIED
        {
            return None;
        }

        let headers = head.headers();
        // response has already encoded
        if headers.contains_key(CONTENT_ENCODING) {
            return None;
        }

        let declared_len = header_str(headers, CONTENT_LENGTH).and_then(|len| len.parse::<usize>().ok());
        if declared_len.is_some_and(|len| len < self.min_length) {
            return None;
        }

        let content_type = header_str(headers, CONTENT_TYPE)?.parse::<Mime>().ok()?;
        if !Self::is_compressible(&content_type) {
            return None;
        }

        ContentEncoding::select(accept_encodings?.to_str().ok()?, &self.encodings)
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LENGTH, ContentEncoding::ALL.to_vec())
    }
}

fn header_str(headers: &HeaderMap, name: http::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Compresses response bodies on their way downstream.
pub struct CompressionFilter {
    policy: Arc<CompressionPolicy>,
    encoder: Option<Encoder>,
}

impl CompressionFilter {
    pub fn new(policy: Arc<CompressionPolicy>) -> Self {
        Self { policy, encoder: None }
    }

    fn fail(&mut self, cx: &mut EncoderFilterContext<'_>, err: &io::Error) -> FilterStatus {
        error!(stream_id = cx.stream_id(), cause = %err, "compressing response body failed, resetting stream");
        self.encoder = None;
        cx.reset_stream();
        FilterStatus::StopIterationNoBuffer
    }
}

impl StreamEncoderFilter for CompressionFilter {
    fn encode_headers(&mut self, head: &mut ResponseHead, end_stream: bool, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        if end_stream {
            return FilterStatus::Continue;
        }

        let accept_encodings = cx.request_header().and_then(|req| req.headers().get(ACCEPT_ENCODING));
        let Some(encoding) = self.policy.negotiate(head, accept_encodings) else {
            return FilterStatus::Continue;
        };

        match Encoder::new(encoding) {
            Ok(encoder) => self.encoder = Some(encoder),
            Err(e) => {
                error!(stream_id = cx.stream_id(), encoding = encoding.as_str(), cause = %e, "failed to create encoder, sending identity");
                return FilterStatus::Continue;
            }
        }

        debug!(stream_id = cx.stream_id(), encoding = encoding.as_str(), "compressing response body");
        let headers = head.headers_mut();
        headers.remove(CONTENT_LENGTH);
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
        headers.append(VARY, HeaderValue::from_static("accept-encoding"));
        FilterStatus::Continue
    }

    fn encode_data(&mut self, data: &mut BytesMut, end_stream: bool, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        let Some(encoder) = self.encoder.as_mut() else {
            return FilterStatus::Continue;
        };

        if let Err(e) = encoder.write(data) {
            return self.fail(cx, &e);
        }
        let compressed = encoder.take();
        data.clear();
        data.extend_from_slice(&compressed);

        if end_stream && let Some(encoder) = self.encoder.take() {
            match encoder.finish() {
                Ok(rest) => data.extend_from_slice(&rest),
                Err(e) => return self.fail(cx, &e),
            }
        }
        FilterStatus::Continue
    }

    fn encode_trailers(&mut self, _trailers: &mut HeaderMap, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        if let Some(encoder) = self.encoder.take() {
            match encoder.finish() {
                Ok(rest) => cx.add_encoded_data(&mut BytesMut::from(&rest[..]), false),
                Err(e) => return self.fail(cx, &e),
            }
        }
        FilterStatus::Continue
    }

    fn on_destroy(&mut self) {
        self.encoder = None;
    }
}

impl std::fmt::Debug for CompressionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionFilter")
            .field("policy", &self.policy)
            .field("encoding", &self.encoder.as_ref().map(Encoder::encoding))
            .finish()
    }
}
