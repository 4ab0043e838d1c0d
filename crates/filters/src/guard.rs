//! Rejecting requests by method and headers before they reach the upstream.
//!
//! A [`RequestGuard`] holds the methods a request may use and the headers it
//! must carry. [`MatchMode::All`] asks for an allowed method and every header,
//! [`MatchMode::Any`] for an allowed method or any one of the headers. A guard
//! with no rules lets everything through.
//!
//! [`HeaderGuardFilter`] evaluates one shared guard per request and answers
//! the requests it refuses with a local reply.
//!
//! ```
//! use micro_filters::config::MatchMode;
//! use micro_filters::guard::RequestGuard;
//!
//! let mut guard = RequestGuard::new(MatchMode::All);
//! guard.allow_method("GET").unwrap().require_header("x-tenant", "acme").unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

use http::{HeaderName, HeaderValue, Method, StatusCode};
use micro_proxy::filter::{DecoderFilterContext, StreamDecoderFilter};
use micro_proxy::protocol::{FilterStatus, RequestHeader};
use tracing::debug;

use crate::ConfigError;
use crate::config::{HeaderGuardConfig, MatchMode};

#[derive(Debug, Clone)]
pub struct RequestGuard {
    mode: MatchMode,
    /// Any method when empty.
    methods: Vec<Method>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl RequestGuard {
    pub fn new(mode: MatchMode) -> Self {
        Self { mode, methods: Vec::new(), headers: Vec::new() }
    }

    pub fn from_config(config: &HeaderGuardConfig) -> Result<Self, ConfigError> {
        let mut guard = Self::new(config.mode);
        for method in &config.methods {
            guard.allow_method(method)?;
        }
        for rule in &config.headers {
            guard.require_header(&rule.name, &rule.value)?;
        }
        Ok(guard)
    }

    /// Adds a method, given by name as found in configuration.
    pub fn allow_method(&mut self, method: &str) -> Result<&mut Self, ConfigError> {
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ConfigError::invalid_method(method))?;
        self.methods.push(method);
        Ok(self)
    }

    pub fn require_header(&mut self, name: &str, value: &str) -> Result<&mut Self, ConfigError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| ConfigError::invalid_header_name(name))?;
        let value = HeaderValue::from_str(value).map_err(|_| ConfigError::invalid_header_value(&name))?;
        self.headers.push((name, value));
        Ok(self)
    }

    pub fn allows(&self, req: &RequestHeader) -> bool {
        let method_listed = self.methods.contains(req.method());
        let mut headers = self.headers.iter().map(|(name, value)| req.headers().get(name) == Some(value));

        match self.mode {
            MatchMode::All => (self.methods.is_empty() || method_listed) && headers.all(|found| found),
            MatchMode::Any => {
                (self.methods.is_empty() && self.headers.is_empty()) || method_listed || headers.any(|found| found)
            }
        }
    }
}

/// Rejects requests its guard does not allow.
pub struct HeaderGuardFilter {
    guard: Arc<RequestGuard>,
    deny_status: StatusCode,
}

impl HeaderGuardFilter {
    pub fn new(guard: Arc<RequestGuard>, deny_status: StatusCode) -> Self {
        Self { guard, deny_status }
    }
}

impl StreamDecoderFilter for HeaderGuardFilter {
    fn decode_headers(&mut self, header: &mut RequestHeader, _end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        if self.guard.allows(header) {
            return FilterStatus::Continue;
        }

        debug!(stream_id = cx.stream_id(), index = cx.index(), method = %header.method(), uri = %header.uri(), "request rejected by header guard");
        cx.send_local_reply(self.deny_status, None);
        FilterStatus::StopIteration
    }
}

impl fmt::Debug for HeaderGuardFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderGuardFilter").field("guard", &self.guard).field("deny_status", &self.deny_status).finish()
    }
}
