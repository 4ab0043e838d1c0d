/// The answer a filter gives after each callback.
///
/// One vocabulary is shared by the header, data and trailer phases. How a
/// status is interpreted depends on the phase it is returned from:
///
/// - header phase: [`Continue`](FilterStatus::Continue) advances, every other
///   variant stops iteration at the answering filter.
/// - data phase: [`StopIterationAndBuffer`](FilterStatus::StopIterationAndBuffer)
///   and [`StopIterationAndWatermark`](FilterStatus::StopIterationAndWatermark)
///   stop and keep the chunk in the body buffer, the remaining stop variants
///   stop without buffering.
/// - trailer phase: anything but `Continue` halts the direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FilterStatus {
    /// Hand the payload to the next filter in the chain.
    Continue,
    /// Stop iterating; later filters see nothing until the filter resumes the chain.
    StopIteration,
    /// Stop iterating and accumulate the body until the filter resumes the chain.
    StopIterationAndBuffer,
    /// Stop iterating and accumulate the body as a streaming filter.
    StopIterationAndWatermark,
    /// Stop iterating without keeping the current chunk.
    StopIterationNoBuffer,
}

impl FilterStatus {
    #[inline]
    pub fn is_continue(self) -> bool {
        matches!(self, FilterStatus::Continue)
    }

    #[inline]
    pub fn is_stop(self) -> bool {
        !self.is_continue()
    }

    /// Returns true if a data phase stopped with this status keeps the chunk.
    #[inline]
    pub fn should_buffer(self) -> bool {
        matches!(self, FilterStatus::StopIterationAndBuffer | FilterStatus::StopIterationAndWatermark)
    }

    #[inline]
    pub fn is_watermark(self) -> bool {
        matches!(self, FilterStatus::StopIterationAndWatermark)
    }
}
