//! Asynchronous request authorization.
//!
//! [`ExtAuthzFilter`] holds the request at its headers while an
//! [`Authorizer`] decides, on the tokio runtime, whether it may proceed. The
//! decision comes back through the filter's [`DecoderFilterHandle`]: an allowed
//! request resumes the decoder chain (including whatever body arrived in the
//! meantime), a denied one is answered with a local reply.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use micro_proxy::filter::{DecoderFilterContext, DecoderFilterHandle, StreamDecoderFilter};
use micro_proxy::protocol::{FilterStatus, RequestHeader};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// What an authorizer gets to see of a request.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub stream_id: u64,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResponse {
    Allow,
    Deny { status: StatusCode, body: Option<Bytes> },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn check(&self, request: CheckRequest) -> CheckResponse;
}

/// Allows requests carrying one of a fixed set of keys in a header.
#[derive(Debug)]
pub struct StaticKeyAuthorizer {
    header: HeaderName,
    keys: HashSet<String>,
    deny_status: StatusCode,
}

impl StaticKeyAuthorizer {
    pub fn new<I, S>(header: HeaderName, keys: I, deny_status: StatusCode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { header, keys: keys.into_iter().map(Into::into).collect(), deny_status }
    }
}

#[async_trait]
impl Authorizer for StaticKeyAuthorizer {
    async fn check(&self, request: CheckRequest) -> CheckResponse {
        let presented = request.headers.get(&self.header).and_then(|value| value.to_str().ok());
        match presented {
            Some(key) if self.keys.contains(key) => CheckResponse::Allow,
            _ => CheckResponse::Deny { status: self.deny_status, body: None },
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum AuthzState {
    Idle,
    Pending,
    Allowed,
    Denied,
}

pub struct ExtAuthzFilter {
    authorizer: Arc<dyn Authorizer>,
    handle: Option<DecoderFilterHandle>,
    state: Arc<Mutex<AuthzState>>,
    task: Option<JoinHandle<()>>,
}

impl ExtAuthzFilter {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self { authorizer, handle: None, state: Arc::new(Mutex::new(AuthzState::Idle)), task: None }
    }

    fn is_allowed(&self) -> bool {
        *self.state.lock() == AuthzState::Allowed
    }

    fn fail(cx: &mut DecoderFilterContext<'_>, reason: &str) -> FilterStatus {
        error!(stream_id = cx.stream_id(), index = cx.index(), reason, "cannot authorize request");
        cx.send_local_reply(StatusCode::INTERNAL_SERVER_ERROR, None);
        FilterStatus::StopIteration
    }
}

impl StreamDecoderFilter for ExtAuthzFilter {
    fn set_decoder_filter_handle(&mut self, handle: DecoderFilterHandle) {
        self.handle = Some(handle);
    }

    fn decode_headers(&mut self, header: &mut RequestHeader, _end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        match *self.state.lock() {
            AuthzState::Allowed => return FilterStatus::Continue,
            AuthzState::Pending | AuthzState::Denied => return FilterStatus::StopIteration,
            AuthzState::Idle => {}
        }

        let Some(handle) = self.handle.clone() else {
            return Self::fail(cx, "filter has no handle");
        };
        let Ok(runtime) = Handle::try_current() else {
            return Self::fail(cx, "no tokio runtime to run the check on");
        };

        let request = CheckRequest {
            stream_id: cx.stream_id(),
            method: header.method().clone(),
            uri: header.uri().clone(),
            headers: header.headers().clone(),
        };
        *self.state.lock() = AuthzState::Pending;

        let authorizer = Arc::clone(&self.authorizer);
        let state = Arc::clone(&self.state);
        debug!(stream_id = request.stream_id, "authorization check started");
        self.task = Some(runtime.spawn(async move {
            let stream_id = request.stream_id;
            match authorizer.check(request).await {
                CheckResponse::Allow => {
                    *state.lock() = AuthzState::Allowed;
                    debug!(stream_id, "request allowed");
                    handle.continue_decoding();
                }
                CheckResponse::Deny { status, body } => {
                    *state.lock() = AuthzState::Denied;
                    debug!(stream_id, %status, "request denied");
                    handle.send_local_reply(status, body);
                }
            }
        }));

        FilterStatus::StopIteration
    }

    fn decode_data(&mut self, _data: &mut BytesMut, _end_stream: bool, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        if self.is_allowed() { FilterStatus::Continue } else { FilterStatus::StopIterationAndBuffer }
    }

    fn decode_trailers(&mut self, _trailers: &mut HeaderMap, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        if self.is_allowed() { FilterStatus::Continue } else { FilterStatus::StopIteration }
    }

    fn on_destroy(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for ExtAuthzFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtAuthzFilter").field("state", &*self.state.lock()).finish_non_exhaustive()
    }
}
