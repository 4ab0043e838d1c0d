//! Errors raised while turning a filter chain configuration into filters.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid filter chain json: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid header name: {name}")]
    InvalidHeaderName { name: String },

    #[error("invalid header value for {name}")]
    InvalidHeaderValue { name: String },

    #[error("invalid method: {method}")]
    InvalidMethod { method: String },

    #[error("invalid status code: {code}")]
    InvalidStatusCode { code: u16 },

    #[error("unsupported content encoding: {encoding}")]
    UnsupportedEncoding { encoding: String },
}

impl ConfigError {
    pub fn invalid_header_name<S: ToString>(name: S) -> Self {
        Self::InvalidHeaderName { name: name.to_string() }
    }

    pub fn invalid_header_value<S: ToString>(name: S) -> Self {
        Self::InvalidHeaderValue { name: name.to_string() }
    }

    pub fn invalid_method<S: ToString>(method: S) -> Self {
        Self::InvalidMethod { method: method.to_string() }
    }

    pub fn invalid_status_code(code: u16) -> Self {
        Self::InvalidStatusCode { code }
    }

    pub fn unsupported_encoding<S: ToString>(encoding: S) -> Self {
        Self::UnsupportedEncoding { encoding: encoding.to_string() }
    }
}
