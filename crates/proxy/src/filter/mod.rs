//! Stream filter abstractions.
//!
//! A filter observes and transforms one direction of a proxied stream. Decoder
//! filters see the request on its way from the downstream client to the
//! upstream host; encoder filters see the response on its way back.
//!
//! # Callbacks
//!
//! Every callback receives the payload of its phase mutably and a context
//! ([`DecoderFilterContext`] / [`EncoderFilterContext`]) which is valid for the
//! duration of the call. The returned [`FilterStatus`] decides whether the
//! next filter in the chain sees the payload.
//!
//! # Asynchronous work
//!
//! A filter that needs to wait for something (an external lookup, a timer)
//! returns a stop status and keeps the handle it received through
//! [`StreamDecoderFilter::set_decoder_filter_handle`]. Calling
//! [`DecoderFilterHandle::continue_decoding`] later, from any thread, resumes
//! the chain right after the filter. The handle only holds a weak reference to
//! the stream, so it never keeps a finished stream alive.
//!
//! # Chain construction
//!
//! Filters are created per stream by a [`FilterChainFactory`], which adds them
//! through [`FilterChainFactoryCallbacks`] in chain order.

mod context;
mod handle;

use bytes::BytesMut;
use http::HeaderMap;

pub use context::DecoderFilterContext;
pub use context::EncoderFilterContext;
pub use handle::DecoderFilterHandle;
pub use handle::EncoderFilterHandle;

use crate::protocol::{FilterStatus, RequestHeader, ResponseHead};

/// A filter on the request path.
///
/// Every callback defaults to [`FilterStatus::Continue`].
pub trait StreamDecoderFilter: Send {
    /// Hands the filter the handle it can resume the chain with later.
    fn set_decoder_filter_handle(&mut self, handle: DecoderFilterHandle) {
        let _ = handle;
    }

    fn decode_headers(
        &mut self,
        header: &mut RequestHeader,
        end_stream: bool,
        cx: &mut DecoderFilterContext<'_>,
    ) -> FilterStatus {
        let _ = (header, end_stream, cx);
        FilterStatus::Continue
    }

    fn decode_data(&mut self, data: &mut BytesMut, end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        let _ = (data, end_stream, cx);
        FilterStatus::Continue
    }

    fn decode_trailers(&mut self, trailers: &mut HeaderMap, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        let _ = (trailers, cx);
        FilterStatus::Continue
    }

    /// Called once when the stream is released, either after a reset or when
    /// the stream is dropped.
    fn on_destroy(&mut self) {}
}

/// A filter on the response path.
///
/// Every callback defaults to [`FilterStatus::Continue`].
pub trait StreamEncoderFilter: Send {
    /// Hands the filter the handle it can resume the chain with later.
    fn set_encoder_filter_handle(&mut self, handle: EncoderFilterHandle) {
        let _ = handle;
    }

    fn encode_headers(
        &mut self,
        head: &mut ResponseHead,
        end_stream: bool,
        cx: &mut EncoderFilterContext<'_>,
    ) -> FilterStatus {
        let _ = (head, end_stream, cx);
        FilterStatus::Continue
    }

    fn encode_data(&mut self, data: &mut BytesMut, end_stream: bool, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        let _ = (data, end_stream, cx);
        FilterStatus::Continue
    }

    fn encode_trailers(&mut self, trailers: &mut HeaderMap, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        let _ = (trailers, cx);
        FilterStatus::Continue
    }

    /// Called once when the stream is released, either after a reset or when
    /// the stream is dropped.
    fn on_destroy(&mut self) {}
}

/// Notified when the downstream write buffer crosses its watermarks.
pub trait DownstreamWatermarkCallbacks: Send + Sync {
    fn on_above_write_buffer_high_watermark(&self);

    fn on_below_write_buffer_low_watermark(&self);
}

/// Creates the filters of every new stream.
pub trait FilterChainFactory: Send + Sync {
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainFactoryCallbacks);
}

/// Receives the filters a [`FilterChainFactory`] creates, in chain order.
pub trait FilterChainFactoryCallbacks {
    fn add_stream_decoder_filter(&mut self, filter: Box<dyn StreamDecoderFilter>);

    fn add_stream_encoder_filter(&mut self, filter: Box<dyn StreamEncoderFilter>);
}
