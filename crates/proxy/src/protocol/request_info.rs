use std::time::{Duration, SystemTime};

use http::{StatusCode, Version};

use super::ResetReason;

/// Per-stream bookkeeping, updated by the pipeline as payloads cross it.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    start_time: SystemTime,
    protocol: Option<Version>,
    bytes_received: u64,
    bytes_sent: u64,
    response_code: Option<StatusCode>,
    reset_reason: Option<ResetReason>,
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self::new(SystemTime::now())
    }
}

impl RequestInfo {
    pub fn new(start_time: SystemTime) -> Self {
        Self { start_time, protocol: None, bytes_received: 0, bytes_sent: 0, response_code: None, reset_reason: None }
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// Time elapsed since the stream started, zero if the clock went backwards.
    pub fn duration(&self) -> Duration {
        self.start_time.elapsed().unwrap_or_default()
    }

    pub fn protocol(&self) -> Option<Version> {
        self.protocol
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn response_code(&self) -> Option<StatusCode> {
        self.response_code
    }

    pub fn reset_reason(&self) -> Option<ResetReason> {
        self.reset_reason
    }

    pub(crate) fn set_protocol(&mut self, protocol: Version) {
        self.protocol = Some(protocol);
    }

    pub(crate) fn add_bytes_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    pub(crate) fn add_bytes_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn set_response_code(&mut self, code: StatusCode) {
        self.response_code = Some(code);
    }

    pub(crate) fn set_reset_reason(&mut self, reason: ResetReason) {
        self.reset_reason = Some(reason);
    }
}
