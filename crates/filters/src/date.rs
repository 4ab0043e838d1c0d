//! HTTP date header value management.
//!
//! Formatting the `Date` header on every response is wasteful when thousands
//! of responses are written per second, so [`DateService`] keeps the
//! formatted value and only renders a new one once the cached value is older
//! than its update interval. Readers never block: the value lives in an
//! [`ArcSwap`] and is refreshed by whichever reader notices it went stale.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use http::header::DATE;
use micro_proxy::filter::{EncoderFilterContext, StreamEncoderFilter};
use micro_proxy::protocol::{FilterStatus, ResponseHead};
use once_cell::sync::Lazy;

struct CachedDate {
    rendered_at: Instant,
    value: HeaderValue,
}

impl CachedDate {
    fn now() -> Option<Self> {
        let mut buf = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut buf);
        let value = HeaderValue::from_maybe_shared(Bytes::from_owner(buf)).ok()?;
        Some(Self { rendered_at: Instant::now(), value })
    }
}

/// Keeps the current HTTP date string.
pub struct DateService {
    current: ArcSwap<Option<CachedDate>>,
    update_interval: Duration,
}

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::new_with_update_interval(Duration::from_millis(800)));

impl DateService {
    /// Returns a reference to the global singleton instance of `DateService`.
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    pub fn new_with_update_interval(update_interval: Duration) -> Self {
        DateService { current: ArcSwap::from_pointee(CachedDate::now()), update_interval }
    }

    /// Returns the current date header value, rendering a new one if the
    /// cached value is stale.
    pub fn http_date(&self) -> Option<HeaderValue> {
        let cached = self.current.load();
        if let Some(date) = (**cached).as_ref()
            && date.rendered_at.elapsed() < self.update_interval
        {
            return Some(date.value.clone());
        }

        let fresh = CachedDate::now();
        let value = fresh.as_ref().map(|date| date.value.clone());
        self.current.store(Arc::new(fresh));
        value
    }
}

impl std::fmt::Debug for DateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateService").field("update_interval", &self.update_interval).finish_non_exhaustive()
    }
}

/// Stamps responses lacking a `Date` header.
#[derive(Debug)]
pub struct DateFilter {
    service: &'static DateService,
}

impl DateFilter {
    pub fn new() -> Self {
        Self { service: DateService::get_global_instance() }
    }
}

impl Default for DateFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEncoderFilter for DateFilter {
    fn encode_headers(&mut self, head: &mut ResponseHead, _end_stream: bool, _cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        if !head.headers().contains_key(DATE)
            && let Some(date) = self.service.http_date()
        {
            head.headers_mut().insert(DATE, date);
        }
        FilterStatus::Continue
    }
}
