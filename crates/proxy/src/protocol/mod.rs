//! Core protocol types shared by the filter pipeline.
//!
//! This module provides the vocabulary every filter and every collaborator of a
//! proxied stream speaks: the payload types flowing through the chains, the
//! status a filter answers with, and the errors and reset reasons that end a
//! stream early.
//!
//! # Architecture
//!
//! - **Request Processing** ([`request`]): Request header handling
//!   - [`RequestHeader`]: Wraps HTTP request headers handed to decoder filters
//!
//! - **Response Processing** ([`response`]): Response header handling
//!   - [`ResponseHead`]: Type alias for response headers handed to encoder filters
//!
//! - **Body Buffering** ([`body`]): Per-direction body accumulation
//!   - [`BodyBuffer`]: Append-only buffer a stopped filter accumulates into
//!
//! - **Filter Status** ([`status`]): The control-flow answer of a filter callback
//!   - [`FilterStatus`]: Continue, or one of the stop variants
//!
//! - **Stream Accounting** ([`request_info`]): Per-stream bookkeeping
//!   - [`RequestInfo`]: Timing, byte counters, response code and reset reason
//!
//! - **Error Handling** ([`error`]): Terminal conditions
//!   - [`ResetReason`]: Why a stream was reset
//!   - [`TransportError`]: Errors reported by the secure transport underneath a stream

mod body;
mod error;
mod request;
mod request_info;
mod response;
mod status;

pub use body::BodyBuffer;
pub use error::ResetReason;
pub use error::TransportError;
pub use request::RequestHeader;
pub use request_info::RequestInfo;
pub use response::ResponseHead;
pub use response::local_reply_head;
pub use status::FilterStatus;
