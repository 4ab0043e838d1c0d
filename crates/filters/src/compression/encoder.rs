use std::io;
use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use tracing::trace;
use zstd::stream::write::Encoder as ZstdEncoder;

use super::Writer;

/// Content codings the compression filter can produce, in preference order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    Zstd,
    Br,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    pub const ALL: [ContentEncoding; 4] =
        [ContentEncoding::Zstd, ContentEncoding::Br, ContentEncoding::Gzip, ContentEncoding::Deflate];

    /// Returns the name of the encoding as used in `Content-Encoding`.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Zstd => "zstd",
            ContentEncoding::Br => "br",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|encoding| encoding.as_str().eq_ignore_ascii_case(name))
    }

    /// Picks the first of `enabled` offered in an `Accept-Encoding` value.
    ///
    /// Quality values are not weighed, a coding explicitly refused with
    /// `q=0` is skipped.
    pub fn select(accept_encodings: &str, enabled: &[ContentEncoding]) -> Option<Self> {
        let offered: Vec<&str> = accept_encodings
            .split(',')
            .filter_map(|item| {
                let mut params = item.split(';').map(str::trim);
                let name = params.next()?;
                let refused = params.any(|param| matches!(param, "q=0" | "q=0.0" | "q=0.00" | "q=0.000"));
                (!refused).then_some(name)
            })
            .collect();

        enabled.iter().copied().find(|encoding| offered.iter().any(|name| name.eq_ignore_ascii_case(encoding.as_str())))
    }
}

/// A streaming compressor for one response body.
pub(crate) enum Encoder {
    /// Gzip encoding.
    Gzip(GzEncoder<Writer>),
    /// Deflate encoding.
    Deflate(ZlibEncoder<Writer>),
    /// Zstd encoding.
    Zstd(ZstdEncoder<'static, Writer>),
    /// Brotli encoding.
    Br(Box<brotli::CompressorWriter<Writer>>),
}

impl Encoder {
    pub(crate) fn new(encoding: ContentEncoding) -> io::Result<Self> {
        let encoder = match encoding {
            ContentEncoding::Gzip => Self::Gzip(GzEncoder::new(Writer::new(), Compression::best())),
            ContentEncoding::Deflate => Self::Deflate(ZlibEncoder::new(Writer::new(), Compression::best())),
            ContentEncoding::Zstd => Self::Zstd(ZstdEncoder::new(Writer::new(), 6)?),
            ContentEncoding::Br => Self::Br(Box::new(brotli::CompressorWriter::new(
                Writer::new(),
                32 * 1024, // 32 KiB buffer
                3,         // BROTLI_PARAM_QUALITY
                22,        // BROTLI_PARAM_LGWIN
            ))),
        };
        Ok(encoder)
    }

    pub(crate) fn encoding(&self) -> ContentEncoding {
        match self {
            Encoder::Gzip(_) => ContentEncoding::Gzip,
            Encoder::Deflate(_) => ContentEncoding::Deflate,
            Encoder::Zstd(_) => ContentEncoding::Zstd,
            Encoder::Br(_) => ContentEncoding::Br,
        }
    }

    /// Writes data to the encoder.
    pub(crate) fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Zstd(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        };
        if let Err(err) = &result {
            trace!(encoding = self.encoding().as_str(), cause = %err, "error encoding body");
        }
        result
    }

    /// Takes the encoded data produced so far.
    pub(crate) fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
            Self::Zstd(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    /// Finishes the encoding process and returns the remaining encoded data.
    pub(crate) fn finish(self) -> io::Result<Bytes> {
        match self {
            Self::Gzip(encoder) => Ok(encoder.finish()?.buf.freeze()),
            Self::Deflate(encoder) => Ok(encoder.finish()?.buf.freeze()),
            Self::Zstd(encoder) => Ok(encoder.finish()?.buf.freeze()),
            Self::Br(mut encoder) => {
                encoder.flush()?;
                Ok(encoder.into_inner().buf.freeze())
            }
        }
    }
}
