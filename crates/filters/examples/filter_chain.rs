use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Request, Response};
use micro_filters::ConfiguredFilterChain;
use micro_proxy::protocol::{RequestHeader, ResetReason, ResponseHead};
use micro_proxy::sink::{DownstreamResponse, UpstreamRequest};
use micro_proxy::stream::Stream;
use tokio::sync::mpsc;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

const CHAIN: &str = r#"{
    "filters": [
        { "type": "header_guard", "methods": ["GET", "POST"] },
        { "type": "ext_authz", "header": "x-api-key", "keys": ["secret"] },
        { "type": "buffer", "max_request_bytes": 65536 },
        { "type": "compression", "min_length": 16, "encodings": ["gzip"] },
        { "type": "date" }
    ]
}"#;

/// What reached the upstream, reported back to the demo's main task.
#[derive(Debug)]
enum Upstream {
    Headers(u64),
    Data(u64, Bytes),
}

struct ChannelUpstream {
    stream_id: u64,
    tx: mpsc::UnboundedSender<Upstream>,
}

impl UpstreamRequest for ChannelUpstream {
    fn send_headers(&mut self, header: &RequestHeader, end_stream: bool) {
        info!(stream_id = self.stream_id, method = %header.method(), uri = %header.uri(), end_stream, "upstream headers");
        let _ = self.tx.send(Upstream::Headers(self.stream_id));
    }

    fn send_data(&mut self, data: Bytes, end_stream: bool) {
        info!(stream_id = self.stream_id, len = data.len(), end_stream, "upstream data");
        let _ = self.tx.send(Upstream::Data(self.stream_id, data));
    }

    fn send_trailers(&mut self, _trailers: &HeaderMap) {}

    fn on_reset(&mut self, reason: ResetReason) {
        error!(stream_id = self.stream_id, %reason, "upstream request reset");
    }
}

struct LoggingDownstream {
    stream_id: u64,
}

impl DownstreamResponse for LoggingDownstream {
    fn write_headers(&mut self, head: &ResponseHead, end_stream: bool) {
        info!(stream_id = self.stream_id, status = %head.status(), headers = ?head.headers(), end_stream, "downstream headers");
    }

    fn write_data(&mut self, data: Bytes, end_stream: bool) {
        info!(stream_id = self.stream_id, len = data.len(), end_stream, "downstream data");
    }

    fn write_trailers(&mut self, _trailers: &HeaderMap) {}
}

fn request(method: &str, api_key: Option<&str>) -> RequestHeader {
    let mut builder = Request::builder().method(method).uri("/greeting").header("accept-encoding", "gzip");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(()).expect("static request is valid").into()
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let chain = match ConfiguredFilterChain::from_json(CHAIN) {
        Ok(chain) => chain,
        Err(e) => {
            error!(cause = %e, "invalid filter chain");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = |stream_id: u64| {
        Stream::builder(stream_id, ChannelUpstream { stream_id, tx: tx.clone() }, LoggingDownstream { stream_id })
            .filter_chain(&chain)
            .build()
    };

    // rejected by the header guard
    let denied = stream(1);
    denied.decode_headers(request("DELETE", Some("secret")), true);

    // rejected by the authorizer
    let unauthorized = stream(2);
    unauthorized.decode_headers(request("GET", Some("guess")), true);

    // authorized, buffered, proxied and answered with a compressed body
    let allowed = stream(3);
    allowed.decode_headers(request("POST", Some("secret")), false);
    allowed.decode_data(BytesMut::from("hello "), false);
    allowed.decode_data(BytesMut::from("proxy"), true);

    loop {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(Upstream::Data(3, body))) => {
                info!(body = %String::from_utf8_lossy(&body), "request body reached upstream");
                break;
            }
            Ok(Some(event)) => info!(?event, "upstream event"),
            Ok(None) | Err(_) => {
                error!("request never reached upstream");
                return;
            }
        }
    }

    let head = Response::builder().header("content-type", "text/plain").body(()).expect("static response is valid");
    allowed.encode_headers(head, false);
    allowed.encode_data(BytesMut::from("a response long enough to be worth compressing"), true);
}
