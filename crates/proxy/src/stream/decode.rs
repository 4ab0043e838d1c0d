//! The request path: headers, data and trailers pushed through the decoder
//! chain towards the upstream request.

use bytes::BytesMut;
use http::HeaderMap;
use tracing::{debug, trace, warn};

use super::inner::{DataSource, PhaseOutcome, StreamCore};
use super::stage::FilterStage;
use crate::protocol::{BodyBuffer, FilterStatus, RequestHeader};

impl StreamCore {
    pub(crate) fn on_decode_headers(&mut self, header: RequestHeader, end_stream: bool) {
        if self.request.headers.is_some() {
            warn!(stream_id = self.stream_id, "request headers already decoded, dropping");
            return;
        }

        self.request_info.set_protocol(header.version());
        if end_stream {
            self.downstream_recv_done = true;
        }
        self.request.headers = Some(header);
        self.decode_header_filters(0, end_stream);
    }

    pub(crate) fn on_decode_data(&mut self, data: BytesMut, end_stream: bool) {
        self.request_info.add_bytes_received(data.len());
        if end_stream {
            self.downstream_recv_done = true;
        }
        self.decode_data_filters(0, data, DataSource::Chunk, end_stream);
    }

    pub(crate) fn on_decode_trailers(&mut self, trailers: HeaderMap) {
        self.downstream_recv_done = true;
        self.request.trailers = Some(trailers);
        self.decode_trailer_filters(0);
    }

    /// Delivers the request headers to the decoder at `index` only.
    fn decode_headers_once(&mut self, index: usize, end_stream: bool) -> Option<FilterStatus> {
        let mut header = self.request.headers.take()?;
        let status = self.invoke_decoder(index, FilterStage::DECODE_HEADERS, |filter, cx| {
            filter.decode_headers(&mut header, end_stream, cx)
        });
        self.request.headers = Some(header);

        let status = status?;
        let state = &mut self.decoders.get_mut(index)?.state;
        if status.is_continue() {
            state.headers_continued = true;
        } else {
            state.filter_stopped = true;
            debug!(stream_id = self.stream_id, index, ?status, "decoder stopped header iteration");
        }
        Some(status)
    }

    /// Drives the header phase from the decoder at `start` until a decoder
    /// stops or the chain is exhausted, in which case the headers go upstream.
    pub(crate) fn decode_header_filters(&mut self, start: usize, end_stream: bool) -> PhaseOutcome {
        for index in start..self.decoders.len() {
            if self.is_terminated() || self.local_process_done {
                return PhaseOutcome::Stopped;
            }
            if self.decoders[index].state.headers_continued {
                continue;
            }

            trace!(stream_id = self.stream_id, index, end_stream, "decode headers");
            match self.decode_headers_once(index, end_stream) {
                Some(FilterStatus::Continue) => {}
                _ => return PhaseOutcome::Stopped,
            }
        }

        if self.is_terminated() || self.local_process_done {
            return PhaseOutcome::Stopped;
        }
        if let Some(header) = self.request.headers.as_ref() {
            trace!(stream_id = self.stream_id, end_stream, "decoder chain exhausted, sending headers upstream");
            self.upstream.send_headers(header, end_stream);
        }
        PhaseOutcome::Completed
    }

    /// Drives the data phase from the decoder at `start`.
    pub(crate) fn decode_data_filters(
        &mut self,
        start: usize,
        mut data: BytesMut,
        source: DataSource,
        end_stream: bool,
    ) -> PhaseOutcome {
        if self.local_process_done {
            if source == DataSource::Buffered {
                self.request.buffer(data, source);
            }
            return PhaseOutcome::Skipped;
        }

        for index in start..self.decoders.len() {
            if self.is_terminated() {
                return PhaseOutcome::Stopped;
            }

            trace!(stream_id = self.stream_id, index, len = data.len(), end_stream, "decode data");
            let Some(status) = self.invoke_decoder(index, FilterStage::DECODE_DATA, |filter, cx| {
                filter.decode_data(&mut data, end_stream, cx)
            }) else {
                self.keep_decoded(data, source, false);
                return PhaseOutcome::Stopped;
            };

            if self.local_process_done {
                return PhaseOutcome::Stopped;
            }

            let state = &mut self.decoders[index].state;
            if status.is_continue() {
                if state.filter_stopped {
                    debug!(stream_id = self.stream_id, index, "stopped decoder let data through, resuming");
                    self.keep_decoded(data, source, true);
                    self.continue_decoding(index);
                    return PhaseOutcome::Resumed;
                }
                continue;
            }

            state.filter_stopped = true;
            if status.should_buffer() {
                self.request.streaming = status.is_watermark();
            }
            debug!(stream_id = self.stream_id, index, ?status, "decoder stopped data iteration");
            self.keep_decoded(data, source, status.should_buffer());
            return PhaseOutcome::Stopped;
        }

        if self.is_terminated() {
            return PhaseOutcome::Stopped;
        }
        trace!(stream_id = self.stream_id, len = data.len(), end_stream, "decoder chain exhausted, sending data upstream");
        self.upstream.send_data(data.freeze(), end_stream);
        PhaseOutcome::Completed
    }

    /// A chunk is kept only when asked to; a buffered payload always goes back.
    fn keep_decoded(&mut self, data: BytesMut, source: DataSource, buffer_chunk: bool) {
        if buffer_chunk || source == DataSource::Buffered {
            self.request.buffer(data, source);
        }
    }

    /// Drives the trailer phase from the decoder at `start`.
    pub(crate) fn decode_trailer_filters(&mut self, start: usize) -> PhaseOutcome {
        if self.local_process_done {
            return PhaseOutcome::Skipped;
        }
        let Some(mut trailers) = self.request.trailers.take() else {
            return PhaseOutcome::Skipped;
        };

        let mut outcome = PhaseOutcome::Completed;
        for index in start..self.decoders.len() {
            if self.is_terminated() {
                outcome = PhaseOutcome::Stopped;
                break;
            }

            trace!(stream_id = self.stream_id, index, "decode trailers");
            let status = self.invoke_decoder(index, FilterStage::DECODE_TRAILERS, |filter, cx| {
                filter.decode_trailers(&mut trailers, cx)
            });
            if self.local_process_done {
                outcome = PhaseOutcome::Stopped;
                break;
            }

            match status {
                Some(FilterStatus::Continue) if self.decoders[index].state.filter_stopped => {
                    debug!(stream_id = self.stream_id, index, "stopped decoder let trailers through, resuming");
                    self.request.trailers = Some(trailers);
                    self.continue_decoding(index);
                    return PhaseOutcome::Resumed;
                }
                Some(FilterStatus::Continue) => {}
                Some(status) => {
                    self.decoders[index].state.filter_stopped = true;
                    debug!(stream_id = self.stream_id, index, ?status, "decoder halted trailers");
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
            trace!(stream_id = self.stream_id, "decoder chain exhausted, sending trailers upstream");
            self.upstream.send_trailers(&trailers);
        }
        self.request.trailers = Some(trailers);
        outcome
    }

    /// Resumes the decoder chain right after the decoder at `index`.
    ///
    /// Replays, in order, the headers starting at the decoder itself if it
    /// never let them through, the buffered body starting after it, and the
    /// trailers starting after it. Resuming a decoder that is not stopped does
    /// nothing.
    pub(crate) fn continue_decoding(&mut self, index: usize) {
        if self.local_process_done || self.is_terminated() {
            return;
        }
        let Some(wrapper) = self.decoders.get_mut(index) else {
            warn!(stream_id = self.stream_id, index, "continue decoding on unknown decoder");
            return;
        };
        if !wrapper.state.filter_stopped {
            trace!(stream_id = self.stream_id, index, "decoder not stopped, nothing to continue");
            return;
        }
        wrapper.state.filter_stopped = false;
        let headers_continued = wrapper.state.headers_continued;

        let has_trailers = self.request.trailers.is_some();
        let has_buffered_data = self.request.has_replay_data(self.downstream_recv_done && !has_trailers);
        debug!(stream_id = self.stream_id, index, has_buffered_data, has_trailers, "continue decoding");

        if !headers_continued {
            let end_stream = self.downstream_recv_done && !has_buffered_data && !has_trailers;
            if self.decode_header_filters(index, end_stream) != PhaseOutcome::Completed {
                return;
            }
        }

        if has_buffered_data {
            let data = self.request.body.as_mut().map(BodyBuffer::take).unwrap_or_default();
            let end_stream = self.downstream_recv_done && !has_trailers;
            match self.decode_data_filters(index + 1, data, DataSource::Buffered, end_stream) {
                PhaseOutcome::Resumed | PhaseOutcome::Skipped => return,
                PhaseOutcome::Completed | PhaseOutcome::Stopped => {}
            }
        }

        if has_trailers && !self.is_terminated() {
            self.decode_trailer_filters(index + 1);
        }
    }

    /// Adds data on behalf of the decoder at `index`.
    ///
    /// Inside a header or data callback, or outside of any callback, the data
    /// only accumulates in the body buffer. Inside a trailer callback it is
    /// pushed through the decoders after `index` as a data phase.
    pub(crate) fn add_decoded_data(&mut self, index: usize, data: BytesMut, streaming: bool) {
        if self.stage.is_empty() || self.stage.intersects(FilterStage::DECODE_HEADERS | FilterStage::DECODE_DATA) {
            trace!(stream_id = self.stream_id, index, len = data.len(), streaming, "buffering added decoded data");
            self.request.streaming = streaming;
            self.request.buffer(data, DataSource::Chunk);
        } else if self.stage.contains(FilterStage::DECODE_TRAILERS) {
            trace!(stream_id = self.stream_id, index, len = data.len(), "forwarding added decoded data");
            self.decode_data_filters(index + 1, data, DataSource::Chunk, false);
        } else {
            warn!(stream_id = self.stream_id, index, stage = ?self.stage, "decoded data added while encoding, dropping");
        }
    }
}
