use std::fmt;

/// The phases a stream is currently inside of.
///
/// Each bit is set while a filter callback of its phase runs and restored
/// once the callback returns. Callbacks nest: a decoder filter sending a local
/// reply from its header callback runs the encoder chain with both
/// `DECODE_HEADERS` and `ENCODE_HEADERS` set.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct FilterStage(u8);

impl FilterStage {
    pub const DECODE_HEADERS: FilterStage = FilterStage(1 << 0);
    pub const DECODE_DATA: FilterStage = FilterStage(1 << 1);
    pub const DECODE_TRAILERS: FilterStage = FilterStage(1 << 2);
    pub const ENCODE_HEADERS: FilterStage = FilterStage(1 << 3);
    pub const ENCODE_DATA: FilterStage = FilterStage(1 << 4);
    pub const ENCODE_TRAILERS: FilterStage = FilterStage(1 << 5);

    const NAMES: [(FilterStage, &'static str); 6] = [
        (Self::DECODE_HEADERS, "decode_headers"),
        (Self::DECODE_DATA, "decode_data"),
        (Self::DECODE_TRAILERS, "decode_trailers"),
        (Self::ENCODE_HEADERS, "encode_headers"),
        (Self::ENCODE_DATA, "encode_data"),
        (Self::ENCODE_TRAILERS, "encode_trailers"),
    ];

    #[inline]
    pub const fn empty() -> Self {
        FilterStage(0)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set.
    #[inline]
    pub const fn contains(self, other: FilterStage) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set.
    #[inline]
    pub const fn intersects(self, other: FilterStage) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: FilterStage) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: FilterStage) {
        self.0 &= !other.0;
    }

    /// Sets `other` and returns the register as it was before.
    #[inline]
    pub(crate) fn enter(&mut self, other: FilterStage) -> FilterStage {
        let previous = *self;
        self.insert(other);
        previous
    }
}

impl std::ops::BitOr for FilterStage {
    type Output = FilterStage;

    fn bitor(self, rhs: FilterStage) -> FilterStage {
        FilterStage(self.0 | rhs.0)
    }
}

impl fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (stage, name) in Self::NAMES {
            if self.contains(stage) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}
