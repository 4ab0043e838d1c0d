//! The stream filter pipeline of a micro proxy
//!
//! This crate implements how a single proxied stream's headers, body and
//! trailers are pushed through an ordered, stateful chain of filters in each
//! direction: decoder filters on the way from the downstream client to the
//! upstream host, encoder filters on the way back.
//!
//! # Features
//!
//! - Ordered decoder and encoder chains built per stream
//! - Filters may stop iteration at any phase and resume the chain later
//! - Lazy per-direction body buffering with exact replay on resumption
//! - Resumption from any thread through weak filter handles
//! - Local replies that short-circuit the upstream request
//! - Stream reset releasing every filter exactly once
//!
//! Reading bytes off sockets, TLS and upstream host selection are not part of
//! this crate: a [`Stream`](stream::Stream) consumes already decoded payloads
//! and hands exhausted phases to an [`UpstreamRequest`](sink::UpstreamRequest)
//! and a [`DownstreamResponse`](sink::DownstreamResponse).
//!
//! # Architecture
//!
//! - [`protocol`]: Payload types, filter status, body buffer and errors
//! - [`filter`]: Filter traits, callback contexts and resumption handles
//! - [`stream`]: The stream state machine driving both chains
//! - [`sink`]: Where exhausted phases are delivered
//! - [`connection`] and [`route`]: Read-only collaborators exposed to filters
//!
//! # Example
//!
//! ```
//! use bytes::{Bytes, BytesMut};
//! use http::HeaderMap;
//! use micro_proxy::filter::{DecoderFilterContext, StreamDecoderFilter};
//! use micro_proxy::protocol::{FilterStatus, RequestHeader, ResponseHead};
//! use micro_proxy::sink::{DownstreamResponse, UpstreamRequest};
//! use micro_proxy::stream::Stream;
//!
//! #[derive(Default)]
//! struct Collect(Vec<u8>);
//!
//! impl UpstreamRequest for Collect {
//!     fn send_headers(&mut self, _header: &RequestHeader, _end_stream: bool) {}
//!
//!     fn send_data(&mut self, data: Bytes, end_stream: bool) {
//!         self.0.extend_from_slice(&data);
//!         if end_stream {
//!             println!("upstream body: {}", String::from_utf8_lossy(&self.0));
//!         }
//!     }
//!
//!     fn send_trailers(&mut self, _trailers: &HeaderMap) {}
//! }
//!
//! struct Discard;
//!
//! impl DownstreamResponse for Discard {
//!     fn write_headers(&mut self, _head: &ResponseHead, _end_stream: bool) {}
//!
//!     fn write_data(&mut self, _data: Bytes, _end_stream: bool) {}
//!
//!     fn write_trailers(&mut self, _trailers: &HeaderMap) {}
//! }
//!
//! /// Holds the body until it is complete.
//! struct BufferAll;
//!
//! impl StreamDecoderFilter for BufferAll {
//!     fn decode_data(&mut self, _data: &mut BytesMut, end_stream: bool, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
//!         if end_stream { FilterStatus::Continue } else { FilterStatus::StopIterationAndBuffer }
//!     }
//! }
//!
//! let stream = Stream::builder(7, Collect::default(), Discard).decoder_filter(BufferAll).build();
//! stream.decode_headers(RequestHeader::default(), false);
//! stream.decode_data(BytesMut::from("hello "), false);
//! stream.decode_data(BytesMut::from("world"), true);
//! ```

pub mod connection;
pub mod filter;
pub mod protocol;
pub mod route;
pub mod sink;
pub mod stream;
