use std::fmt;

use crate::filter::{StreamDecoderFilter, StreamEncoderFilter};

/// Iteration state of one filter within one stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FilterState {
    pub(crate) index: usize,
    pub(crate) filter_stopped: bool,
    pub(crate) headers_continued: bool,
}

impl FilterState {
    fn new(index: usize) -> Self {
        Self { index, filter_stopped: false, headers_continued: false }
    }

    /// Position of the filter in its chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// True while the filter holds the chain and waits to be resumed.
    pub fn is_stopped(&self) -> bool {
        self.filter_stopped
    }

    /// True once the filter let the header phase through.
    pub fn headers_continued(&self) -> bool {
        self.headers_continued
    }
}

/// Per-stream record of a filter: its state plus the filter itself.
///
/// The filter is taken out for the duration of a callback so the callback can
/// borrow the rest of the stream mutably.
pub(crate) struct FilterWrapper<F: ?Sized> {
    pub(crate) state: FilterState,
    filter: Option<Box<F>>,
}

pub(crate) type DecoderWrapper = FilterWrapper<dyn StreamDecoderFilter>;
pub(crate) type EncoderWrapper = FilterWrapper<dyn StreamEncoderFilter>;

impl<F: ?Sized> FilterWrapper<F> {
    pub(crate) fn new(index: usize, filter: Box<F>) -> Self {
        Self { state: FilterState::new(index), filter: Some(filter) }
    }

    pub(crate) fn take_filter(&mut self) -> Option<Box<F>> {
        self.filter.take()
    }

    pub(crate) fn put_filter(&mut self, filter: Box<F>) {
        self.filter = Some(filter);
    }
}

impl DecoderWrapper {
    pub(crate) fn destroy(&mut self) {
        if let Some(mut filter) = self.filter.take() {
            filter.on_destroy();
        }
    }
}

impl EncoderWrapper {
    pub(crate) fn destroy(&mut self) {
        if let Some(mut filter) = self.filter.take() {
            filter.on_destroy();
        }
    }
}

impl<F: ?Sized> fmt::Debug for FilterWrapper<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterWrapper").field("state", &self.state).field("busy", &self.filter.is_none()).finish()
    }
}
