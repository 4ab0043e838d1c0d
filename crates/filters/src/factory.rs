//! A filter chain factory driven by configuration.
//!
//! [`ConfiguredFilterChain`] validates a [`FilterChainConfig`] once, keeps the
//! compiled result behind an [`ArcSwap`] and instantiates fresh filters from
//! it for every stream. Replacing the configuration with
//! [`ConfiguredFilterChain::update`] affects streams created afterwards only;
//! streams already running keep the filters they were built with.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http::{HeaderName, StatusCode};
use micro_proxy::filter::{FilterChainFactory, FilterChainFactoryCallbacks};
use tracing::info;

use crate::buffer::BufferFilter;
use crate::compression::{CompressionFilter, CompressionPolicy, ContentEncoding};
use crate::config::{FilterChainConfig, FilterConfig};
use crate::date::DateFilter;
use crate::ext_authz::{Authorizer, ExtAuthzFilter, StaticKeyAuthorizer};
use crate::guard::{HeaderGuardFilter, RequestGuard};
use crate::ConfigError;

/// A validated filter, ready to be instantiated per stream.
enum FilterTemplate {
    HeaderGuard { guard: Arc<RequestGuard>, deny_status: StatusCode },
    Buffer { max_request_bytes: usize },
    Compression { policy: Arc<CompressionPolicy> },
    Date,
    ExtAuthz { authorizer: Arc<dyn Authorizer> },
}

impl FilterTemplate {
    fn compile(config: &FilterConfig) -> Result<Self, ConfigError> {
        let template = match config {
            FilterConfig::HeaderGuard(guard) => FilterTemplate::HeaderGuard {
                guard: Arc::new(RequestGuard::from_config(guard)?),
                deny_status: status_code(guard.deny_status)?,
            },
            FilterConfig::Buffer(buffer) => FilterTemplate::Buffer { max_request_bytes: buffer.max_request_bytes },
            FilterConfig::Compression(compression) => {
                let encodings = compression
                    .encodings
                    .iter()
                    .map(|name| ContentEncoding::from_name(name).ok_or_else(|| ConfigError::unsupported_encoding(name)))
                    .collect::<Result<Vec<_>, _>>()?;
                FilterTemplate::Compression {
                    policy: Arc::new(CompressionPolicy::new(compression.min_length, encodings)),
                }
            }
            FilterConfig::Date => FilterTemplate::Date,
            FilterConfig::ExtAuthz(authz) => {
                let header = HeaderName::from_bytes(authz.header.as_bytes())
                    .map_err(|_| ConfigError::invalid_header_name(&authz.header))?;
                let authorizer =
                    StaticKeyAuthorizer::new(header, authz.keys.iter().cloned(), status_code(authz.deny_status)?);
                FilterTemplate::ExtAuthz { authorizer: Arc::new(authorizer) }
            }
        };
        Ok(template)
    }

    fn install(&self, callbacks: &mut dyn FilterChainFactoryCallbacks) {
        match self {
            FilterTemplate::HeaderGuard { guard, deny_status } => {
                callbacks.add_stream_decoder_filter(Box::new(HeaderGuardFilter::new(Arc::clone(guard), *deny_status)));
            }
            FilterTemplate::Buffer { max_request_bytes } => {
                callbacks.add_stream_decoder_filter(Box::new(BufferFilter::new(*max_request_bytes)));
            }
            FilterTemplate::Compression { policy } => {
                callbacks.add_stream_encoder_filter(Box::new(CompressionFilter::new(Arc::clone(policy))));
            }
            FilterTemplate::Date => callbacks.add_stream_encoder_filter(Box::new(DateFilter::new())),
            FilterTemplate::ExtAuthz { authorizer } => {
                callbacks.add_stream_decoder_filter(Box::new(ExtAuthzFilter::new(Arc::clone(authorizer))));
            }
        }
    }
}

fn status_code(code: u16) -> Result<StatusCode, ConfigError> {
    StatusCode::from_u16(code).map_err(|_| ConfigError::invalid_status_code(code))
}

struct CompiledChain {
    config: FilterChainConfig,
    templates: Vec<FilterTemplate>,
}

impl CompiledChain {
    fn compile(config: FilterChainConfig) -> Result<Self, ConfigError> {
        let templates = config.filters.iter().map(FilterTemplate::compile).collect::<Result<_, _>>()?;
        Ok(Self { config, templates })
    }
}

pub struct ConfiguredFilterChain {
    current: ArcSwap<CompiledChain>,
}

impl ConfiguredFilterChain {
    pub fn new(config: FilterChainConfig) -> Result<Self, ConfigError> {
        Ok(Self { current: ArcSwap::from_pointee(CompiledChain::compile(config)?) })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::new(FilterChainConfig::from_json(json)?)
    }

    /// Swaps in a new configuration. On error the current one stays active.
    pub fn update(&self, config: FilterChainConfig) -> Result<(), ConfigError> {
        let compiled = CompiledChain::compile(config)?;
        info!(filters = compiled.templates.len(), "filter chain configuration updated");
        self.current.store(Arc::new(compiled));
        Ok(())
    }

    /// The configuration new streams are built from.
    pub fn config(&self) -> FilterChainConfig {
        self.current.load().config.clone()
    }
}

impl FilterChainFactory for ConfiguredFilterChain {
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainFactoryCallbacks) {
        let chain = self.current.load();
        for template in &chain.templates {
            template.install(callbacks);
        }
    }
}

impl fmt::Debug for ConfiguredFilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredFilterChain").field("config", &self.current.load().config).finish()
    }
}
