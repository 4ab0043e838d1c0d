//! HTTP response header handling implementation.
//!
//! This module provides type definitions for HTTP response headers.
//! It uses the standard `http::Response` type with an empty body placeholder
//! to represent response headers before the actual response body is attached.

use http::{HeaderValue, Response, StatusCode, header};

/// Type alias for HTTP response headers.
///
/// This type represents the header portion of an HTTP response, using
/// `http::Response<()>` with an empty body placeholder. Encoder filters
/// receive it mutably and may rewrite status and headers in place.
pub type ResponseHead = Response<()>;

/// Builds the head of a locally generated response.
///
/// A `content-length` header is set when the reply carries a body.
pub fn local_reply_head(status: StatusCode, body_len: Option<usize>) -> ResponseHead {
    let mut head = ResponseHead::new(());
    *head.status_mut() = status;
    if let Some(len) = body_len {
        head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    head
}
