//! The response path: headers, data and trailers pushed through the encoder
//! chain towards the downstream client.

use bytes::BytesMut;
use http::HeaderMap;
use tracing::{debug, trace, warn};

use super::inner::{DataSource, PhaseOutcome, StreamCore};
use super::stage::FilterStage;
use crate::protocol::{BodyBuffer, FilterStatus, ResponseHead};

impl StreamCore {
    pub(crate) fn on_encode_headers(&mut self, head: ResponseHead, end_stream: bool) {
        if self.response.headers.is_some() {
            warn!(stream_id = self.stream_id, "response headers already encoded, dropping");
            return;
        }

        self.response.headers = Some(head);
        self.encode_header_filters(0, end_stream);
    }

    pub(crate) fn on_encode_data(&mut self, data: BytesMut, end_stream: bool) {
        self.encode_data_filters(0, data, DataSource::Chunk, end_stream);
    }

    pub(crate) fn on_encode_trailers(&mut self, trailers: HeaderMap) {
        self.response.trailers = Some(trailers);
        self.encode_trailer_filters(0);
    }

    fn encode_headers_once(&mut self, index: usize, end_stream: bool) -> Option<FilterStatus> {
        let mut head = self.response.headers.take()?;
        let status = self.invoke_encoder(index, FilterStage::ENCODE_HEADERS, |filter, cx| {
            filter.encode_headers(&mut head, end_stream, cx)
        });
        self.response.headers = Some(head);

        let status = status?;
        let state = &mut self.encoders.get_mut(index)?.state;
        if status.is_continue() {
            state.headers_continued = true;
        } else {
            state.filter_stopped = true;
            debug!(stream_id = self.stream_id, index, ?status, "encoder stopped header iteration");
        }
        Some(status)
    }

    pub(crate) fn encode_header_filters(&mut self, start: usize, end_stream: bool) -> PhaseOutcome {
        for index in start..self.encoders.len() {
            if self.is_terminated() {
                return PhaseOutcome::Stopped;
            }
            if self.encoders[index].state.headers_continued {
                continue;
            }

            trace!(stream_id = self.stream_id, index, end_stream, "encode headers");
            match self.encode_headers_once(index, end_stream) {
                Some(FilterStatus::Continue) => {}
                _ => return PhaseOutcome::Stopped,
            }
        }

        if self.is_terminated() {
            return PhaseOutcome::Stopped;
        }
        if let Some(head) = self.response.headers.as_ref() {
            trace!(stream_id = self.stream_id, status = %head.status(), end_stream, "encoder chain exhausted, writing headers");
            self.request_info.set_response_code(head.status());
            self.downstream.write_headers(head, end_stream);
        }
        PhaseOutcome::Completed
    }

    pub(crate) fn encode_data_filters(
        &mut self,
        start: usize,
        mut data: BytesMut,
        source: DataSource,
        end_stream: bool,
    ) -> PhaseOutcome {
        for index in start..self.encoders.len() {
            if self.is_terminated() {
                return PhaseOutcome::Stopped;
            }

            trace!(stream_id = self.stream_id, index, len = data.len(), end_stream, "encode data");
            let Some(status) = self.invoke_encoder(index, FilterStage::ENCODE_DATA, |filter, cx| {
                filter.encode_data(&mut data, end_stream, cx)
            }) else {
                self.keep_encoded(data, source, false);
                return PhaseOutcome::Stopped;
            };

            let state = &mut self.encoders[index].state;
            if status.is_continue() {
                if state.filter_stopped {
                    debug!(stream_id = self.stream_id, index, "stopped encoder let data through, resuming");
                    self.keep_encoded(data, source, true);
                    self.continue_encoding(index);
                    return PhaseOutcome::Resumed;
                }
                continue;
            }

            state.filter_stopped = true;
            if status.should_buffer() {
                self.response.streaming = status.is_watermark();
            }
            debug!(stream_id = self.stream_id, index, ?status, "encoder stopped data iteration");
            self.keep_encoded(data, source, status.should_buffer());
            return PhaseOutcome::Stopped;
        }

        if self.is_terminated() {
            return PhaseOutcome::Stopped;
        }
        trace!(stream_id = self.stream_id, len = data.len(), end_stream, "encoder chain exhausted, writing data");
        self.request_info.add_bytes_sent(data.len());
        self.downstream.write_data(data.freeze(), end_stream);
        PhaseOutcome::Completed
    }

    fn keep_encoded(&mut self, data: BytesMut, source: DataSource, buffer_chunk: bool) {
        if buffer_chunk || source == DataSource::Buffered {
            self.response.buffer(data, source);
        }
    }

    pub(crate) fn encode_trailer_filters(&mut self, start: usize) -> PhaseOutcome {
        let Some(mut trailers) = self.response.trailers.take() else {
            return PhaseOutcome::Skipped;
        };

        let mut outcome = PhaseOutcome::Completed;
        for index in start..self.encoders.len() {
            if self.is_terminated() {
                outcome = PhaseOutcome::Stopped;
                break;
            }

            trace!(stream_id = self.stream_id, index, "encode trailers");
            let status = self.invoke_encoder(index, FilterStage::ENCODE_TRAILERS, |filter, cx| {
                filter.encode_trailers(&mut trailers, cx)
            });

            match status {
                Some(FilterStatus::Continue) if self.encoders[index].state.filter_stopped => {
                    debug!(stream_id = self.stream_id, index, "stopped encoder let trailers through, resuming");
                    self.response.trailers = Some(trailers);
                    self.continue_encoding(index);
                    return PhaseOutcome::Resumed;
                }
                Some(FilterStatus::Continue) => {}
                Some(status) => {
                    self.encoders[index].state.filter_stopped = true;
                    debug!(stream_id = self.stream_id, index, ?status, "encoder halted trailers");
                    outcome = PhaseOutcome::Stopped;
                    break;
                }
                None => {
                    outcome = PhaseOutcome::Stopped;
                    break;
                }
            }
        }

        if outcome == PhaseOutcome::Completed && !self.is_terminated() {
            trace!(stream_id = self.stream_id, "encoder chain exhausted, writing trailers");
            self.downstream.write_trailers(&trailers);
        }
        self.response.trailers = Some(trailers);
        outcome
    }

    /// Resumes the encoder chain right after the encoder at `index`.
    ///
    /// The replayed `end_stream` flags are derived from whether the whole
    /// downstream request has been received.
    pub(crate) fn continue_encoding(&mut self, index: usize) {
        if self.is_terminated() {
            return;
        }
        let Some(wrapper) = self.encoders.get_mut(index) else {
            warn!(stream_id = self.stream_id, index, "continue encoding on unknown encoder");
            return;
        };
        if !wrapper.state.filter_stopped {
            trace!(stream_id = self.stream_id, index, "encoder not stopped, nothing to continue");
            return;
        }
        wrapper.state.filter_stopped = false;
        let headers_continued = wrapper.state.headers_continued;

        let has_trailers = self.response.trailers.is_some();
        let has_buffered_data = self.response.has_replay_data(self.downstream_recv_done && !has_trailers);
        debug!(stream_id = self.stream_id, index, has_buffered_data, has_trailers, "continue encoding");

        if !headers_continued {
            let end_stream = self.downstream_recv_done && !has_buffered_data && !has_trailers;
            if self.encode_header_filters(index, end_stream) != PhaseOutcome::Completed {
                return;
            }
        }

        if has_buffered_data {
            let data = self.response.body.as_mut().map(BodyBuffer::take).unwrap_or_default();
            let end_stream = self.downstream_recv_done && !has_trailers;
            match self.encode_data_filters(index + 1, data, DataSource::Buffered, end_stream) {
                PhaseOutcome::Resumed | PhaseOutcome::Skipped => return,
                PhaseOutcome::Completed | PhaseOutcome::Stopped => {}
            }
        }

        if has_trailers && !self.is_terminated() {
            self.encode_trailer_filters(index + 1);
        }
    }

    /// Adds data on behalf of the encoder at `index`, following the same
    /// stage rules as the request path.
    pub(crate) fn add_encoded_data(&mut self, index: usize, data: BytesMut, streaming: bool) {
        if self.stage.is_empty() || self.stage.intersects(FilterStage::ENCODE_HEADERS | FilterStage::ENCODE_DATA) {
            trace!(stream_id = self.stream_id, index, len = data.len(), streaming, "buffering added encoded data");
            self.response.streaming = streaming;
            self.response.buffer(data, DataSource::Chunk);
        } else if self.stage.contains(FilterStage::ENCODE_TRAILERS) {
            trace!(stream_id = self.stream_id, index, len = data.len(), "forwarding added encoded data");
            self.encode_data_filters(index + 1, data, DataSource::Chunk, false);
        } else {
            warn!(stream_id = self.stream_id, index, stage = ?self.stage, "encoded data added while decoding, dropping");
        }
    }
}
