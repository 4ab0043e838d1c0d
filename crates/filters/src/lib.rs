//! Ready made stream filters for the micro proxy
//!
//! This crate provides filters built on the [`micro_proxy`] filter traits and
//! a [`ConfiguredFilterChain`] that assembles them from JSON configuration.
//!
//! # Filters
//!
//! - [`guard::HeaderGuardFilter`]: Rejects requests failing its method/header rules
//! - [`buffer::BufferFilter`]: Buffers whole request bodies, with a size limit
//! - [`ext_authz::ExtAuthzFilter`]: Authorizes requests asynchronously on tokio
//! - [`compression::CompressionFilter`]: Compresses response bodies (zstd, br, gzip, deflate)
//! - [`date::DateFilter`]: Stamps responses with a cached `Date` header
//!
//! # Example
//!
//! ```
//! use micro_filters::ConfiguredFilterChain;
//!
//! let chain = ConfiguredFilterChain::from_json(r#"{
//!     "filters": [
//!         { "type": "header_guard", "methods": ["GET"] },
//!         { "type": "compression", "encodings": ["gzip"] },
//!         { "type": "date" }
//!     ]
//! }"#).unwrap();
//!
//! assert_eq!(chain.config().filters.len(), 3);
//! ```

mod error;
mod factory;

pub mod buffer;
pub mod compression;
pub mod config;
pub mod date;
pub mod ext_authz;
pub mod guard;

#[cfg(test)]
mod testing;

pub use config::FilterChainConfig;
pub use config::FilterConfig;
pub use error::ConfigError;
pub use factory::ConfiguredFilterChain;
