//! Filter chain configuration.
//!
//! A chain is described in JSON as an ordered list of filters, each tagged
//! with its `type`:
//!
//! ```json
//! {
//!   "filters": [
//!     { "type": "header_guard", "methods": ["GET", "POST"], "headers": [{ "name": "x-tenant", "value": "acme" }] },
//!     { "type": "ext_authz", "header": "x-api-key", "keys": ["secret"] },
//!     { "type": "buffer", "max_request_bytes": 65536 },
//!     { "type": "compression", "min_length": 1024, "encodings": ["zstd", "gzip"] },
//!     { "type": "date" }
//!   ]
//! }
//! ```
//!
//! Decoder filters run in the listed order on the request, encoder filters in
//! the listed order on the response.

use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::buffer::DEFAULT_MAX_REQUEST_BYTES;
use crate::compression::DEFAULT_MIN_LENGTH;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChainConfig {
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

impl FilterChainConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_slice(json: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    HeaderGuard(HeaderGuardConfig),
    Buffer(BufferConfig),
    Compression(CompressionConfig),
    Date,
    ExtAuthz(ExtAuthzConfig),
}

/// How the rules of a header guard combine.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderGuardConfig {
    /// Allowed methods, any method when empty.
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub headers: Vec<HeaderRule>,
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default = "default_guard_status")]
    pub deny_status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    /// Codings in preference order.
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAuthzConfig {
    #[serde(default = "default_key_header")]
    pub header: String,
    pub keys: Vec<String>,
    #[serde(default = "default_authz_status")]
    pub deny_status: u16,
}

fn default_guard_status() -> u16 {
    403
}

fn default_authz_status() -> u16 {
    401
}

fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

fn default_min_length() -> usize {
    DEFAULT_MIN_LENGTH
}

fn default_encodings() -> Vec<String> {
    ["zstd", "br", "gzip", "deflate"].into_iter().map(String::from).collect()
}

fn default_key_header() -> String {
    "x-api-key".to_owned()
}
