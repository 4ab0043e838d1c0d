use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, Request, StatusCode, Version};
use parking_lot::Mutex;

use super::*;
use crate::filter::{
    DecoderFilterContext, DownstreamWatermarkCallbacks, EncoderFilterContext, FilterChainFactory,
    FilterChainFactoryCallbacks,
};
use crate::protocol::FilterStatus;
use crate::sink::{MockDownstreamResponse, MockUpstreamRequest};

use FilterStatus::{Continue, StopIteration, StopIterationAndBuffer, StopIterationAndWatermark};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    DecodeHeaders { filter: usize, end_stream: bool },
    DecodeData { filter: usize, data: String, end_stream: bool },
    DecodeTrailers { filter: usize },
    EncodeHeaders { filter: usize, end_stream: bool },
    EncodeData { filter: usize, data: String, end_stream: bool },
    EncodeTrailers { filter: usize },
    DecoderDestroyed { filter: usize },
    EncoderDestroyed { filter: usize },
    UpstreamHeaders { end_stream: bool },
    UpstreamData { data: String, end_stream: bool },
    UpstreamTrailers,
    UpstreamReset(ResetReason),
    DownstreamHeaders { status: u16, end_stream: bool },
    DownstreamData { data: String, end_stream: bool },
    DownstreamTrailers,
    DownstreamReset(ResetReason),
}

type Log = Arc<Mutex<Vec<Event>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn events(log: &Log) -> Vec<Event> {
    log.lock().clone()
}

fn count(log: &Log, predicate: impl Fn(&Event) -> bool) -> usize {
    log.lock().iter().filter(|event| predicate(event)).count()
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn request(host: &'static str) -> RequestHeader {
    Request::builder().uri("/").header(http::header::HOST, host).body(()).unwrap().into()
}

fn response(status: StatusCode) -> ResponseHead {
    let mut head = ResponseHead::new(());
    *head.status_mut() = status;
    head
}

fn trailers(trace: &'static str) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert("trace", HeaderValue::from_static(trace));
    trailers
}

struct RecordingUpstream {
    log: Log,
}

impl UpstreamRequest for RecordingUpstream {
    fn send_headers(&mut self, _header: &RequestHeader, end_stream: bool) {
        self.log.lock().push(Event::UpstreamHeaders { end_stream });
    }

    fn send_data(&mut self, data: Bytes, end_stream: bool) {
        self.log.lock().push(Event::UpstreamData { data: text(&data), end_stream });
    }

    fn send_trailers(&mut self, _trailers: &HeaderMap) {
        self.log.lock().push(Event::UpstreamTrailers);
    }

    fn on_reset(&mut self, reason: ResetReason) {
        self.log.lock().push(Event::UpstreamReset(reason));
    }
}

struct RecordingDownstream {
    log: Log,
}

impl DownstreamResponse for RecordingDownstream {
    fn write_headers(&mut self, head: &ResponseHead, end_stream: bool) {
        self.log.lock().push(Event::DownstreamHeaders { status: head.status().as_u16(), end_stream });
    }

    fn write_data(&mut self, data: Bytes, end_stream: bool) {
        self.log.lock().push(Event::DownstreamData { data: text(&data), end_stream });
    }

    fn write_trailers(&mut self, _trailers: &HeaderMap) {
        self.log.lock().push(Event::DownstreamTrailers);
    }

    fn on_reset(&mut self, reason: ResetReason) {
        self.log.lock().push(Event::DownstreamReset(reason));
    }
}

fn builder(log: &Log) -> StreamBuilder {
    Stream::builder(1, RecordingUpstream { log: Arc::clone(log) }, RecordingDownstream { log: Arc::clone(log) })
}

/// Answers every callback from a script, `Continue` once the script runs out.
struct ScriptedDecoder {
    id: usize,
    log: Log,
    headers: VecDeque<FilterStatus>,
    data: VecDeque<FilterStatus>,
    trailers: VecDeque<FilterStatus>,
}

impl ScriptedDecoder {
    fn new(id: usize, log: &Log) -> Self {
        Self { id, log: Arc::clone(log), headers: VecDeque::new(), data: VecDeque::new(), trailers: VecDeque::new() }
    }

    fn headers(mut self, statuses: impl IntoIterator<Item = FilterStatus>) -> Self {
        self.headers.extend(statuses);
        self
    }

    fn data(mut self, statuses: impl IntoIterator<Item = FilterStatus>) -> Self {
        self.data.extend(statuses);
        self
    }

    fn trailers(mut self, statuses: impl IntoIterator<Item = FilterStatus>) -> Self {
        self.trailers.extend(statuses);
        self
    }
}

impl StreamDecoderFilter for ScriptedDecoder {
    fn decode_headers(&mut self, _header: &mut RequestHeader, end_stream: bool, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::DecodeHeaders { filter: self.id, end_stream });
        self.headers.pop_front().unwrap_or(Continue)
    }

    fn decode_data(&mut self, data: &mut BytesMut, end_stream: bool, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::DecodeData { filter: self.id, data: text(data), end_stream });
        self.data.pop_front().unwrap_or(Continue)
    }

    fn decode_trailers(&mut self, _trailers: &mut HeaderMap, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::DecodeTrailers { filter: self.id });
        self.trailers.pop_front().unwrap_or(Continue)
    }

    fn on_destroy(&mut self) {
        self.log.lock().push(Event::DecoderDestroyed { filter: self.id });
    }
}

struct ScriptedEncoder {
    id: usize,
    log: Log,
    headers: VecDeque<FilterStatus>,
    data: VecDeque<FilterStatus>,
    trailers: VecDeque<FilterStatus>,
}

impl ScriptedEncoder {
    fn new(id: usize, log: &Log) -> Self {
        Self { id, log: Arc::clone(log), headers: VecDeque::new(), data: VecDeque::new(), trailers: VecDeque::new() }
    }

    fn headers(mut self, statuses: impl IntoIterator<Item = FilterStatus>) -> Self {
        self.headers.extend(statuses);
        self
    }

    fn data(mut self, statuses: impl IntoIterator<Item = FilterStatus>) -> Self {
        self.data.extend(statuses);
        self
    }

    fn trailers(mut self, statuses: impl IntoIterator<Item = FilterStatus>) -> Self {
        self.trailers.extend(statuses);
        self
    }
}

impl StreamEncoderFilter for ScriptedEncoder {
    fn encode_headers(&mut self, _head: &mut ResponseHead, end_stream: bool, _cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::EncodeHeaders { filter: self.id, end_stream });
        self.headers.pop_front().unwrap_or(Continue)
    }

    fn encode_data(&mut self, data: &mut BytesMut, end_stream: bool, _cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::EncodeData { filter: self.id, data: text(data), end_stream });
        self.data.pop_front().unwrap_or(Continue)
    }

    fn encode_trailers(&mut self, _trailers: &mut HeaderMap, _cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::EncodeTrailers { filter: self.id });
        self.trailers.pop_front().unwrap_or(Continue)
    }

    fn on_destroy(&mut self) {
        self.log.lock().push(Event::EncoderDestroyed { filter: self.id });
    }
}

#[test]
fn headers_pass_every_decoder_in_order() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log))
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .decoder_filter(ScriptedDecoder::new(2, &log))
        .build();

    stream.decode_headers(request("a"), false);

    assert_eq!(
        events(&log),
        vec![
            Event::DecodeHeaders { filter: 0, end_stream: false },
            Event::DecodeHeaders { filter: 1, end_stream: false },
            Event::DecodeHeaders { filter: 2, end_stream: false },
            Event::UpstreamHeaders { end_stream: false },
        ]
    );

    let snapshot = stream.snapshot();
    assert!(snapshot.decoders().iter().all(FilterState::headers_continued));
    assert!(snapshot.stage().is_empty());
    assert!(!snapshot.downstream_recv_done());
}

#[test]
fn stopped_decoder_holds_later_decoders() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log))
        .decoder_filter(ScriptedDecoder::new(1, &log).headers([StopIteration]))
        .decoder_filter(ScriptedDecoder::new(2, &log))
        .build();

    stream.decode_headers(request("a"), false);

    assert_eq!(count(&log, |e| matches!(e, Event::DecodeHeaders { filter: 2, .. })), 0);
    assert_eq!(count(&log, |e| matches!(e, Event::UpstreamHeaders { .. })), 0);
    let snapshot = stream.snapshot();
    assert!(snapshot.decoders()[1].is_stopped());
    assert!(!snapshot.decoders()[1].headers_continued());

    stream.continue_decoding(1);

    assert_eq!(count(&log, |e| matches!(e, Event::DecodeHeaders { filter: 2, .. })), 1);
    assert_eq!(count(&log, |e| matches!(e, Event::UpstreamHeaders { end_stream: false })), 1);
    assert!(!stream.snapshot().decoders()[1].is_stopped());
}

#[test]
fn buffered_body_replays_once_after_resume() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log))
        .decoder_filter(ScriptedDecoder::new(1, &log).data([StopIterationAndBuffer; 3]))
        .decoder_filter(ScriptedDecoder::new(2, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), false);
    stream.decode_data(BytesMut::from("def"), false);
    stream.decode_data(BytesMut::from("ghi"), false);

    assert_eq!(count(&log, |e| matches!(e, Event::DecodeData { filter: 2, .. })), 0);
    let snapshot = stream.snapshot();
    assert_eq!(snapshot.decoding_buffer(), Some(&Bytes::from_static(b"abcdefghi")));
    assert!(!snapshot.decoder_streaming());

    stream.mark_downstream_recv_done();
    stream.continue_decoding(1);

    let f2_data: Vec<Event> =
        events(&log).into_iter().filter(|e| matches!(e, Event::DecodeData { filter: 2, .. })).collect();
    assert_eq!(f2_data, vec![Event::DecodeData { filter: 2, data: "abcdefghi".into(), end_stream: true }]);
    assert_eq!(
        events(&log).last(),
        Some(&Event::UpstreamData { data: "abcdefghi".into(), end_stream: true })
    );

    // the buffer stays allocated once used
    assert_eq!(stream.snapshot().decoding_buffer(), Some(&Bytes::new()));
}

#[test]
fn continuing_twice_does_not_redeliver_headers() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log).data([StopIterationAndBuffer]))
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), true);
    stream.continue_decoding(0);
    stream.continue_decoding(0);

    assert_eq!(count(&log, |e| matches!(e, Event::DecodeHeaders { filter: 0, .. })), 1);
    assert_eq!(count(&log, |e| matches!(e, Event::DecodeHeaders { filter: 1, .. })), 1);
    assert_eq!(count(&log, |e| matches!(e, Event::DecodeData { filter: 1, .. })), 1);
    assert_eq!(count(&log, |e| matches!(e, Event::UpstreamData { .. })), 1);
}

#[test]
fn continue_on_running_decoder_is_noop() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log)).build();

    stream.decode_headers(request("a"), true);
    let before = events(&log);
    stream.continue_decoding(0);
    stream.continue_decoding(7);

    assert_eq!(events(&log), before);
}

#[test]
fn header_stop_then_full_continue() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log))
        .decoder_filter(ScriptedDecoder::new(1, &log).headers([StopIteration, Continue]))
        .decoder_filter(ScriptedDecoder::new(2, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.mark_downstream_recv_done();
    stream.continue_decoding(1);

    assert_eq!(
        events(&log),
        vec![
            Event::DecodeHeaders { filter: 0, end_stream: false },
            Event::DecodeHeaders { filter: 1, end_stream: false },
            Event::DecodeHeaders { filter: 1, end_stream: true },
            Event::DecodeHeaders { filter: 2, end_stream: true },
            Event::UpstreamHeaders { end_stream: true },
        ]
    );
}

#[test]
fn replayed_header_stop_ends_resumption() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log).headers([StopIteration]))
        .decoder_filter(ScriptedDecoder::new(1, &log).headers([StopIteration]))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), true);
    stream.continue_decoding(0);

    let snapshot = stream.snapshot();
    assert!(!snapshot.decoders()[0].is_stopped());
    assert!(snapshot.decoders()[1].is_stopped());
    assert_eq!(count(&log, |e| matches!(e, Event::DecodeData { filter: 1, .. })), 0);
    assert_eq!(count(&log, |e| matches!(e, Event::UpstreamHeaders { .. })), 0);
}

#[test]
fn trailers_follow_buffered_data_on_resume() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log).data([StopIterationAndBuffer]).trailers([StopIteration]))
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("x"), false);
    stream.decode_trailers(trailers("1"));

    assert_eq!(count(&log, |e| matches!(e, Event::DecodeTrailers { filter: 1 })), 0);
    assert!(stream.snapshot().downstream_recv_done());

    stream.continue_decoding(0);

    let tail: Vec<Event> = events(&log).into_iter().skip_while(|e| !matches!(e, Event::DecodeData { filter: 1, .. })).collect();
    assert_eq!(
        tail,
        vec![
            Event::DecodeData { filter: 1, data: "x".into(), end_stream: false },
            Event::UpstreamData { data: "x".into(), end_stream: false },
            Event::DecodeTrailers { filter: 1 },
            Event::UpstreamTrailers,
        ]
    );
}

#[test]
fn stopped_decoder_continuing_trailers_resumes() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log).data([StopIterationAndBuffer]))
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("x"), false);
    stream.decode_trailers(trailers("1"));

    assert_eq!(count(&log, |e| matches!(e, Event::DecodeTrailers { filter: 0 })), 1);
    assert_eq!(count(&log, |e| matches!(e, Event::DecodeTrailers { filter: 1 })), 1);
    assert_eq!(count(&log, |e| matches!(e, Event::UpstreamTrailers)), 1);
    assert_eq!(
        events(&log).iter().rev().nth(1),
        Some(&Event::DecodeTrailers { filter: 1 })
    );
}

#[test]
fn trailer_stop_halts_direction() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log).trailers([StopIteration]))
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_trailers(trailers("1"));

    assert_eq!(count(&log, |e| matches!(e, Event::DecodeTrailers { filter: 1 })), 0);
    assert_eq!(count(&log, |e| matches!(e, Event::UpstreamTrailers)), 0);
    assert!(stream.snapshot().decoders()[0].is_stopped());
}

#[test]
fn drained_buffer_is_not_replayed_again() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log).data([StopIterationAndBuffer]))
        .decoder_filter(ScriptedDecoder::new(1, &log).trailers([StopIteration]))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("x"), false);
    stream.decode_trailers(trailers("1"));

    // the first resumption drained the buffer but left it allocated
    assert!(stream.snapshot().decoders()[1].is_stopped());
    assert_eq!(stream.snapshot().decoding_buffer(), Some(&Bytes::new()));

    stream.continue_decoding(1);

    let upstream: Vec<Event> = events(&log)
        .into_iter()
        .filter(|e| matches!(e, Event::UpstreamData { .. } | Event::UpstreamTrailers))
        .collect();
    assert_eq!(upstream, vec![Event::UpstreamData { data: "x".into(), end_stream: false }, Event::UpstreamTrailers]);
}

#[test]
fn watermark_stop_marks_streaming() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log).data([StopIterationAndWatermark])).build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), false);

    let snapshot = stream.snapshot();
    assert!(snapshot.decoder_streaming());
    assert_eq!(snapshot.decoding_buffer(), Some(&Bytes::from_static(b"abc")));
}

#[test]
fn no_buffer_stop_drops_chunk() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log).data([FilterStatus::StopIterationNoBuffer])).build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), false);

    let snapshot = stream.snapshot();
    assert!(snapshot.decoders()[0].is_stopped());
    assert_eq!(snapshot.decoding_buffer(), None);
}

/// Sends a local reply from its header callback.
struct LocalReplier {
    body: Option<&'static str>,
}

impl StreamDecoderFilter for LocalReplier {
    fn decode_headers(&mut self, _header: &mut RequestHeader, _end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        cx.send_local_reply(StatusCode::FORBIDDEN, self.body.map(|body| Bytes::from_static(body.as_bytes())));
        StopIteration
    }
}

#[test]
fn local_reply_short_circuits_decoding() {
    let mut upstream = MockUpstreamRequest::new();
    upstream.expect_send_headers().never();
    upstream.expect_send_data().never();
    upstream.expect_send_trailers().never();

    let mut downstream = MockDownstreamResponse::new();
    downstream
        .expect_write_headers()
        .withf(|head, end_stream| head.status() == StatusCode::FORBIDDEN && *end_stream)
        .times(1)
        .return_const(());
    downstream.expect_write_data().never();

    let log = new_log();
    let stream = Stream::builder(3, upstream, downstream)
        .decoder_filter(LocalReplier { body: None })
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), false);
    stream.decode_trailers(trailers("1"));
    stream.continue_decoding(0);

    assert!(events(&log).is_empty());
    let snapshot = stream.snapshot();
    assert!(snapshot.local_process_done());
    assert_eq!(snapshot.request_info().response_code(), Some(StatusCode::FORBIDDEN));
}

#[test]
fn local_reply_runs_encoder_chain() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(LocalReplier { body: Some("denied") })
        .encoder_filter(ScriptedEncoder::new(0, &log))
        .encoder_filter(ScriptedEncoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), false);

    assert_eq!(
        events(&log),
        vec![
            Event::EncodeHeaders { filter: 0, end_stream: false },
            Event::EncodeHeaders { filter: 1, end_stream: false },
            Event::DownstreamHeaders { status: 403, end_stream: false },
            Event::EncodeData { filter: 0, data: "denied".into(), end_stream: true },
            Event::EncodeData { filter: 1, data: "denied".into(), end_stream: true },
            Event::DownstreamData { data: "denied".into(), end_stream: true },
        ]
    );

    let info = stream.snapshot().request_info().clone();
    assert_eq!(info.bytes_sent(), 6);
    assert_eq!(info.response_code(), Some(StatusCode::FORBIDDEN));

    // the upstream response arriving later is dropped
    stream.encode_headers(response(StatusCode::OK), true);
    assert_eq!(count(&log, |e| matches!(e, Event::DownstreamHeaders { .. })), 1);
}

/// Records whether the request headers were visible while encoding.
struct RequestPeeker {
    seen: Arc<Mutex<Vec<bool>>>,
}

impl StreamEncoderFilter for RequestPeeker {
    fn encode_headers(&mut self, _head: &mut ResponseHead, _end_stream: bool, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        self.seen.lock().push(cx.request_header().is_some());
        Continue
    }
}

#[test]
fn encoders_see_request_headers() {
    let log = new_log();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let stream = builder(&log).encoder_filter(RequestPeeker { seen: Arc::clone(&seen) }).build();

    stream.decode_headers(request("a"), true);
    stream.encode_headers(response(StatusCode::OK), true);

    assert_eq!(*seen.lock(), vec![true]);
}

#[test]
fn local_reply_through_handle() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log).headers([StopIteration])).build();

    stream.decode_headers(request("a"), false);
    let handle = stream.decoder_handle(0).unwrap();
    handle.send_local_reply(StatusCode::UNAUTHORIZED, Some(Bytes::from_static(b"no")));

    assert_eq!(
        events(&log)[1..],
        [
            Event::DownstreamHeaders { status: 401, end_stream: false },
            Event::DownstreamData { data: "no".into(), end_stream: true },
        ]
    );
    assert!(stream.snapshot().local_process_done());
}

/// Adds data through its context from the data or trailer callback.
struct Adder {
    id: usize,
    log: Log,
    in_data: Option<&'static str>,
    in_trailers: Option<&'static str>,
    data_status: FilterStatus,
}

impl StreamDecoderFilter for Adder {
    fn decode_data(&mut self, data: &mut BytesMut, end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::DecodeData { filter: self.id, data: text(data), end_stream });
        if let Some(extra) = self.in_data {
            cx.add_decoded_data(&mut BytesMut::from(extra), true);
        }
        self.data_status
    }

    fn decode_trailers(&mut self, _trailers: &mut HeaderMap, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::DecodeTrailers { filter: self.id });
        if let Some(extra) = self.in_trailers {
            cx.add_decoded_data(&mut BytesMut::from(extra), false);
        }
        Continue
    }
}

#[test]
fn data_added_inside_data_callback_is_only_buffered() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(Adder {
            id: 0,
            log: Arc::clone(&log),
            in_data: Some("++"),
            in_trailers: None,
            data_status: StopIterationAndBuffer,
        })
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), false);

    assert_eq!(count(&log, |e| matches!(e, Event::DecodeData { filter: 1, .. })), 0);
    let snapshot = stream.snapshot();
    assert_eq!(snapshot.decoding_buffer(), Some(&Bytes::from_static(b"++abc")));
    assert!(!snapshot.decoder_streaming());
}

#[test]
fn data_added_inside_trailer_callback_is_forwarded() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(Adder {
            id: 0,
            log: Arc::clone(&log),
            in_data: None,
            in_trailers: Some("tail"),
            data_status: Continue,
        })
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_trailers(trailers("1"));

    assert_eq!(
        events(&log)[2..],
        [
            Event::DecodeTrailers { filter: 0 },
            Event::DecodeData { filter: 1, data: "tail".into(), end_stream: false },
            Event::UpstreamData { data: "tail".into(), end_stream: false },
            Event::DecodeTrailers { filter: 1 },
            Event::UpstreamTrailers,
        ]
    );
    assert_eq!(stream.snapshot().decoding_buffer(), None);
}

#[test]
fn data_added_through_idle_handle_accumulates() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log)).build();

    let handle = stream.decoder_handle(0).unwrap();
    handle.add_decoded_data(BytesMut::from("ab"), true);
    handle.add_decoded_data(BytesMut::from("cd"), true);

    let snapshot = stream.snapshot();
    assert_eq!(snapshot.decoding_buffer(), Some(&Bytes::from_static(b"abcd")));
    assert!(snapshot.decoder_streaming());
    assert!(events(&log).is_empty());
}

#[test]
fn encoder_chain_replays_buffered_body() {
    let log = new_log();
    let stream = builder(&log)
        .encoder_filter(ScriptedEncoder::new(0, &log).data([StopIterationAndBuffer; 2]))
        .encoder_filter(ScriptedEncoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), true);
    stream.encode_headers(response(StatusCode::OK), false);
    stream.encode_data(BytesMut::from("ab"), false);
    stream.encode_data(BytesMut::from("cd"), false);

    assert_eq!(count(&log, |e| matches!(e, Event::EncodeData { filter: 1, .. })), 0);
    assert_eq!(stream.snapshot().encoding_buffer(), Some(&Bytes::from_static(b"abcd")));

    stream.continue_encoding(0);

    assert_eq!(
        events(&log).iter().rev().take(2).rev().cloned().collect::<Vec<_>>(),
        vec![
            Event::EncodeData { filter: 1, data: "abcd".into(), end_stream: true },
            Event::DownstreamData { data: "abcd".into(), end_stream: true },
        ]
    );
    assert_eq!(stream.snapshot().request_info().bytes_sent(), 4);
}

#[test]
fn encoder_header_stop_then_continue() {
    let log = new_log();
    let stream = builder(&log)
        .encoder_filter(ScriptedEncoder::new(0, &log).headers([StopIteration, Continue]))
        .encoder_filter(ScriptedEncoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), true);
    stream.encode_headers(response(StatusCode::CREATED), false);
    assert_eq!(count(&log, |e| matches!(e, Event::EncodeHeaders { filter: 1, .. })), 0);

    stream.continue_encoding(0);

    assert_eq!(
        events(&log)[2..],
        [
            Event::EncodeHeaders { filter: 0, end_stream: true },
            Event::EncodeHeaders { filter: 1, end_stream: true },
            Event::DownstreamHeaders { status: 201, end_stream: true },
        ]
    );
    // no trailers were received, none are replayed
    assert_eq!(count(&log, |e| matches!(e, Event::EncodeTrailers { .. } | Event::DownstreamTrailers)), 0);
    assert_eq!(stream.snapshot().request_info().response_code(), Some(StatusCode::CREATED));
}

#[test]
fn encoder_replays_trailers_only_when_present() {
    let log = new_log();
    let stream = builder(&log)
        .encoder_filter(ScriptedEncoder::new(0, &log).data([StopIterationAndBuffer]).trailers([StopIteration]))
        .encoder_filter(ScriptedEncoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), true);
    stream.encode_headers(response(StatusCode::OK), false);
    stream.encode_data(BytesMut::from("body"), false);
    stream.encode_trailers(trailers("2"));
    stream.continue_encoding(0);

    assert_eq!(
        events(&log).iter().rev().take(4).rev().cloned().collect::<Vec<_>>(),
        vec![
            Event::EncodeData { filter: 1, data: "body".into(), end_stream: false },
            Event::DownstreamData { data: "body".into(), end_stream: false },
            Event::EncodeTrailers { filter: 1 },
            Event::DownstreamTrailers,
        ]
    );
}

/// Records what its encoder context can see and adds data from trailers.
struct EncoderAdder {
    log: Log,
}

impl StreamEncoderFilter for EncoderAdder {
    fn encode_trailers(&mut self, _trailers: &mut HeaderMap, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        cx.add_encoded_data(&mut BytesMut::from("late"), false);
        self.log.lock().push(Event::EncodeTrailers { filter: 0 });
        Continue
    }
}

#[test]
fn encoded_data_added_from_trailers_is_forwarded() {
    let log = new_log();
    let stream = builder(&log)
        .encoder_filter(EncoderAdder { log: Arc::clone(&log) })
        .encoder_filter(ScriptedEncoder::new(1, &log))
        .build();

    stream.encode_headers(response(StatusCode::OK), false);
    stream.encode_trailers(trailers("1"));

    assert_eq!(
        events(&log)[2..],
        [
            Event::EncodeData { filter: 1, data: "late".into(), end_stream: false },
            Event::DownstreamData { data: "late".into(), end_stream: false },
            Event::EncodeTrailers { filter: 0 },
            Event::EncodeTrailers { filter: 1 },
            Event::DownstreamTrailers,
        ]
    );
}

#[test]
fn reset_releases_filters_and_drops_later_work() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log).headers([StopIteration]).data([StopIterationAndBuffer]))
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .encoder_filter(ScriptedEncoder::new(0, &log))
        .build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), false);
    stream.reset(ResetReason::RemoteReset);

    let released = events(&log).into_iter().skip(2).collect::<Vec<_>>();
    assert_eq!(
        released,
        vec![
            Event::DecoderDestroyed { filter: 0 },
            Event::DecoderDestroyed { filter: 1 },
            Event::EncoderDestroyed { filter: 0 },
            Event::UpstreamReset(ResetReason::RemoteReset),
            Event::DownstreamReset(ResetReason::RemoteReset),
        ]
    );

    let before = events(&log);
    stream.continue_decoding(0);
    stream.decode_data(BytesMut::from("def"), true);
    stream.encode_headers(response(StatusCode::OK), true);
    stream.reset(ResetReason::LocalReset);
    drop(stream);
    assert_eq!(events(&log), before);
}

#[test]
fn reset_snapshot() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log).data([StopIterationAndBuffer])).build();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("abc"), false);
    stream.reset(ResetReason::LocalReset);

    let snapshot = stream.snapshot();
    assert_eq!(snapshot.reset_reason(), Some(ResetReason::LocalReset));
    assert_eq!(snapshot.request_info().reset_reason(), Some(ResetReason::LocalReset));
    assert!(snapshot.decoders().is_empty());
    assert_eq!(snapshot.decoding_buffer(), None);
}

/// Resets the stream from inside its header callback.
struct Resetter;

impl StreamDecoderFilter for Resetter {
    fn decode_headers(&mut self, _header: &mut RequestHeader, _end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        cx.reset_stream();
        Continue
    }
}

#[test]
fn reset_inside_callback_stops_at_next_filter() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(Resetter).decoder_filter(ScriptedDecoder::new(1, &log)).build();

    stream.decode_headers(request("a"), true);

    assert_eq!(
        events(&log),
        vec![
            Event::DecoderDestroyed { filter: 1 },
            Event::UpstreamReset(ResetReason::LocalReset),
            Event::DownstreamReset(ResetReason::LocalReset),
        ]
    );
}

#[test]
fn transport_errors_map_to_resets() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log)).build();

    assert!(!stream.on_transport_error(&TransportError::WantRead));
    assert!(!stream.on_transport_error(&TransportError::WantWrite));
    assert_eq!(stream.snapshot().reset_reason(), None);

    assert!(stream.on_transport_error(&TransportError::Closed));
    assert_eq!(stream.snapshot().reset_reason(), Some(ResetReason::ConnectionTermination));
    assert!(events(&log).contains(&Event::UpstreamReset(ResetReason::ConnectionTermination)));
}

#[test]
fn dropping_stream_destroys_filters_once() {
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ScriptedDecoder::new(0, &log).headers([StopIteration]))
        .encoder_filter(ScriptedEncoder::new(0, &log))
        .build();

    stream.decode_headers(request("a"), false);
    let handle = stream.decoder_handle(0).unwrap();
    assert!(handle.is_alive());
    assert!(stream.decoder_handle(1).is_none());

    drop(stream);

    assert!(!handle.is_alive());
    handle.continue_decoding();
    assert_eq!(
        events(&log)[1..],
        [Event::DecoderDestroyed { filter: 0 }, Event::EncoderDestroyed { filter: 0 }]
    );
}

#[test]
fn request_info_accounting() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log)).build();

    let mut header = request("a");
    *header.as_mut().version_mut() = Version::HTTP_2;
    stream.decode_headers(header, false);
    stream.decode_data(BytesMut::from("abc"), false);
    stream.decode_data(BytesMut::from("de"), true);

    let snapshot = stream.snapshot();
    assert_eq!(snapshot.request_info().protocol(), Some(Version::HTTP_2));
    assert_eq!(snapshot.request_info().bytes_received(), 5);
    assert!(snapshot.downstream_recv_done());
}

#[derive(Default)]
struct CountingWatermarks {
    above: AtomicUsize,
    below: AtomicUsize,
}

impl DownstreamWatermarkCallbacks for CountingWatermarks {
    fn on_above_write_buffer_high_watermark(&self) {
        self.above.fetch_add(1, Ordering::SeqCst);
    }

    fn on_below_write_buffer_low_watermark(&self) {
        self.below.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registers watermark callbacks, fires them and tunes the buffer limit.
struct WatermarkUser {
    callbacks: Arc<CountingWatermarks>,
    limits: Arc<Mutex<Vec<u32>>>,
}

impl StreamDecoderFilter for WatermarkUser {
    fn decode_headers(&mut self, _header: &mut RequestHeader, _end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        let callbacks: Arc<dyn DownstreamWatermarkCallbacks> = self.callbacks.clone();
        cx.add_downstream_watermark_callbacks(Arc::clone(&callbacks));
        cx.on_decoder_filter_above_write_buffer_high_watermark();
        cx.remove_downstream_watermark_callbacks(&callbacks);
        cx.on_decoder_filter_below_write_buffer_low_watermark();

        self.limits.lock().push(cx.decoder_buffer_limit());
        cx.set_decoder_buffer_limit(4096);
        self.limits.lock().push(cx.decoder_buffer_limit());
        Continue
    }
}

#[test]
fn watermark_callbacks_and_buffer_limits() {
    let log = new_log();
    let callbacks = Arc::new(CountingWatermarks::default());
    let limits = Arc::new(Mutex::new(Vec::new()));
    let stream = builder(&log)
        .decoder_buffer_limit(1024)
        .decoder_filter(WatermarkUser { callbacks: Arc::clone(&callbacks), limits: Arc::clone(&limits) })
        .build();

    stream.decode_headers(request("a"), true);

    assert_eq!(callbacks.above.load(Ordering::SeqCst), 1);
    assert_eq!(callbacks.below.load(Ordering::SeqCst), 0);
    assert_eq!(*limits.lock(), vec![1024, 4096]);
    assert_eq!(stream.snapshot().decoder_buffer_limit(), 4096);
    assert_eq!(stream.snapshot().encoder_buffer_limit(), DEFAULT_BUFFER_LIMIT);
}

/// Registers watermark callbacks for the encoder side to fire.
struct WatermarkRegistrar {
    callbacks: Arc<CountingWatermarks>,
}

impl StreamDecoderFilter for WatermarkRegistrar {
    fn decode_headers(&mut self, _header: &mut RequestHeader, _end_stream: bool, cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        let callbacks: Arc<dyn DownstreamWatermarkCallbacks> = self.callbacks.clone();
        cx.add_downstream_watermark_callbacks(callbacks);
        Continue
    }
}

/// Goes above the high watermark on headers and back below it at the end of
/// the body.
struct EncoderWatermarkUser {
    limits: Arc<Mutex<Vec<u32>>>,
}

impl StreamEncoderFilter for EncoderWatermarkUser {
    fn encode_headers(&mut self, _head: &mut ResponseHead, _end_stream: bool, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        cx.on_encoder_filter_above_write_buffer_high_watermark();
        self.limits.lock().push(cx.encoder_buffer_limit());
        cx.set_encoder_buffer_limit(512);
        Continue
    }

    fn encode_data(&mut self, _data: &mut BytesMut, end_stream: bool, cx: &mut EncoderFilterContext<'_>) -> FilterStatus {
        if end_stream {
            cx.on_encoder_filter_below_write_buffer_low_watermark();
        }
        self.limits.lock().push(cx.encoder_buffer_limit());
        Continue
    }
}

#[test]
fn encoder_watermark_callbacks_and_buffer_limits() {
    let log = new_log();
    let callbacks = Arc::new(CountingWatermarks::default());
    let limits = Arc::new(Mutex::new(Vec::new()));
    let stream = builder(&log)
        .encoder_buffer_limit(2048)
        .decoder_filter(WatermarkRegistrar { callbacks: Arc::clone(&callbacks) })
        .encoder_filter(EncoderWatermarkUser { limits: Arc::clone(&limits) })
        .build();

    stream.decode_headers(request("a"), true);
    stream.encode_headers(response(StatusCode::OK), false);
    assert_eq!(callbacks.above.load(Ordering::SeqCst), 1);
    assert_eq!(callbacks.below.load(Ordering::SeqCst), 0);

    stream.encode_data(BytesMut::from("abc"), true);
    assert_eq!(callbacks.above.load(Ordering::SeqCst), 1);
    assert_eq!(callbacks.below.load(Ordering::SeqCst), 1);

    assert_eq!(*limits.lock(), vec![2048, 512]);
    assert_eq!(stream.snapshot().encoder_buffer_limit(), 512);
    assert_eq!(stream.snapshot().decoder_buffer_limit(), DEFAULT_BUFFER_LIMIT);
}

struct TwoDecoders {
    log: Log,
}

impl FilterChainFactory for TwoDecoders {
    fn create_filter_chain(&self, callbacks: &mut dyn FilterChainFactoryCallbacks) {
        callbacks.add_stream_decoder_filter(Box::new(ScriptedDecoder::new(0, &self.log)));
        callbacks.add_stream_decoder_filter(Box::new(ScriptedDecoder::new(1, &self.log)));
        callbacks.add_stream_encoder_filter(Box::new(ScriptedEncoder::new(0, &self.log)));
    }
}

#[test]
fn factory_builds_chain_in_order() {
    let log = new_log();
    let factory = TwoDecoders { log: Arc::clone(&log) };
    let stream = builder(&log).filter_chain(&factory).decoder_filter(ScriptedDecoder::new(2, &log)).build();

    stream.decode_headers(request("a"), true);
    stream.encode_headers(response(StatusCode::OK), true);

    assert_eq!(
        events(&log),
        vec![
            Event::DecodeHeaders { filter: 0, end_stream: true },
            Event::DecodeHeaders { filter: 1, end_stream: true },
            Event::DecodeHeaders { filter: 2, end_stream: true },
            Event::UpstreamHeaders { end_stream: true },
            Event::EncodeHeaders { filter: 0, end_stream: true },
            Event::DownstreamHeaders { status: 200, end_stream: true },
        ]
    );
}

/// Resumes itself from a spawned task after stopping on headers.
struct AsyncGate {
    handle: Option<DecoderFilterHandle>,
    started: bool,
}

impl StreamDecoderFilter for AsyncGate {
    fn set_decoder_filter_handle(&mut self, handle: DecoderFilterHandle) {
        self.handle = Some(handle);
    }

    fn decode_headers(&mut self, _header: &mut RequestHeader, _end_stream: bool, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        if self.started {
            return Continue;
        }
        self.started = true;
        let handle = self.handle.clone().expect("handle is set at build time");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.continue_decoding();
        });
        StopIteration
    }
}

struct NotifyingUpstream {
    tx: tokio::sync::mpsc::UnboundedSender<bool>,
}

impl UpstreamRequest for NotifyingUpstream {
    fn send_headers(&mut self, _header: &RequestHeader, end_stream: bool) {
        let _ = self.tx.send(end_stream);
    }

    fn send_data(&mut self, _data: Bytes, _end_stream: bool) {}

    fn send_trailers(&mut self, _trailers: &HeaderMap) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resumes_from_another_task() {
    let log = new_log();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let stream = Stream::builder(9, NotifyingUpstream { tx }, RecordingDownstream { log: Arc::clone(&log) })
        .decoder_filter(AsyncGate { handle: None, started: false })
        .decoder_filter(ScriptedDecoder::new(1, &log))
        .build();

    stream.decode_headers(request("a"), true);
    assert!(stream.snapshot().decoders()[0].is_stopped());

    let end_stream = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(end_stream, Some(true));
    assert_eq!(events(&log), vec![Event::DecodeHeaders { filter: 1, end_stream: true }]);
}

#[test]
fn handles_are_serialized_across_threads() {
    let log = new_log();
    let stream = builder(&log).decoder_filter(ScriptedDecoder::new(0, &log)).build();
    let handle = stream.decoder_handle(0).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let handle = handle.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    handle.add_decoded_data(BytesMut::from("xy"), false);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(stream.snapshot().decoding_buffer().map(Bytes::len), Some(800));
}

/// Parks inside the data callback of one chunk until released.
struct ParkingDecoder {
    log: Log,
    park_on: &'static str,
    entered: std::sync::mpsc::Sender<()>,
    release: std::sync::mpsc::Receiver<()>,
}

impl StreamDecoderFilter for ParkingDecoder {
    fn decode_data(&mut self, data: &mut BytesMut, end_stream: bool, _cx: &mut DecoderFilterContext<'_>) -> FilterStatus {
        self.log.lock().push(Event::DecodeData { filter: 0, data: text(data), end_stream });
        if data[..] == *self.park_on.as_bytes() {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
        }
        Continue
    }
}

#[test]
fn resume_from_another_thread_waits_for_running_phase() {
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let log = new_log();
    let stream = builder(&log)
        .decoder_filter(ParkingDecoder { log: Arc::clone(&log), park_on: "second", entered: entered_tx, release: release_rx })
        .decoder_filter(ScriptedDecoder::new(1, &log).data([StopIterationAndBuffer, StopIterationAndBuffer]))
        .build();
    let handle = stream.decoder_handle(1).unwrap();

    stream.decode_headers(request("a"), false);
    stream.decode_data(BytesMut::from("first"), false);

    std::thread::scope(|scope| {
        let running = scope.spawn(|| stream.decode_data(BytesMut::from("second"), true));
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // the stream is busy, so the resumption is only queued
        handle.continue_decoding();
        assert!(!log.lock().iter().any(|event| matches!(event, Event::UpstreamData { .. })));

        release_tx.send(()).unwrap();
        running.join().unwrap();
    });

    assert_eq!(
        log.lock()[4..],
        [
            Event::DecodeData { filter: 0, data: "second".into(), end_stream: true },
            Event::DecodeData { filter: 1, data: "second".into(), end_stream: true },
            Event::UpstreamData { data: "firstsecond".into(), end_stream: true },
        ]
    );
}
