//! Where payloads go once a filter chain is exhausted.
//!
//! When every decoder filter let a phase through, the payload is handed to the
//! [`UpstreamRequest`]; when every encoder filter let a phase through, it is
//! written to the [`DownstreamResponse`]. Both sinks are owned by the stream
//! and only called while the stream is locked, so implementations never race
//! with the pipeline.

use bytes::Bytes;
use http::HeaderMap;

use crate::protocol::{RequestHeader, ResetReason, ResponseHead};

/// The request being generated towards the upstream host.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamRequest: Send {
    fn send_headers(&mut self, header: &RequestHeader, end_stream: bool);

    fn send_data(&mut self, data: Bytes, end_stream: bool);

    fn send_trailers(&mut self, trailers: &HeaderMap);

    /// Called once when the stream is reset.
    fn on_reset(&mut self, reason: ResetReason) {
        let _ = reason;
    }
}

/// The response being written back to the downstream client.
#[cfg_attr(test, mockall::automock)]
pub trait DownstreamResponse: Send {
    fn write_headers(&mut self, head: &ResponseHead, end_stream: bool);

    fn write_data(&mut self, data: Bytes, end_stream: bool);

    fn write_trailers(&mut self, trailers: &HeaderMap);

    /// Called once when the stream is reset.
    fn on_reset(&mut self, reason: ResetReason) {
        let _ = reason;
    }
}
