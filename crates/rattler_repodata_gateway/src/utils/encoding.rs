//! Helpers to decode HTTP transfer/content encodings on the fly while
//! streaming a response body.

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, ZstdDecoder};
use pin_project_lite::pin_project;
use reqwest::{header, Response};
use tokio::io::{AsyncBufRead, AsyncRead};

/// Describes the encoding used for a (potentially compressed) stream of
/// bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Encoding {
    /// The stream is not encoded at all.
    Passthrough,

    /// The stream is gzip encoded.
    GZip,

    /// The stream is bzip2 encoded.
    Bz2,

    /// The stream is zstd encoded.
    Zst,
}

impl From<&Response> for Encoding {
    /// Determines the encoding of the response based on the `Content-Encoding`
    /// header, falling back to [`Encoding::Passthrough`] if the header is
    /// missing or not recognized.
    fn from(response: &Response) -> Self {
        response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(|value| match value {
                "gzip" | "x-gzip" => Encoding::GZip,
                "bzip2" => Encoding::Bz2,
                "zstd" => Encoding::Zst,
                _ => Encoding::Passthrough,
            })
            .unwrap_or(Encoding::Passthrough)
    }
}

/// An extension trait that adds on-the-fly decoding to any
/// [`AsyncBufRead`].
pub trait AsyncEncoding: AsyncBufRead + Sized {
    /// Wraps this reader in a decoder for the given [`Encoding`]. The
    /// returned reader yields the decoded bytes.
    fn decode(self, encoding: Encoding) -> Decoder<Self>;
}

impl<T: AsyncBufRead + Sized> AsyncEncoding for T {
    fn decode(self, encoding: Encoding) -> Decoder<Self> {
        match encoding {
            Encoding::Passthrough => Decoder::Passthrough { inner: self },
            Encoding::GZip => Decoder::GZip {
                inner: GzipDecoder::new(self),
            },
            Encoding::Bz2 => Decoder::Bz2 {
                inner: BzDecoder::new(self),
            },
            Encoding::Zst => Decoder::Zst {
                inner: ZstdDecoder::new(self),
            },
        }
    }
}

pin_project! {
    /// A reader that decodes an underlying stream according to an [`Encoding`]
    /// chosen at runtime.
    #[project = DecoderProj]
    pub enum Decoder<R> {
        /// No decoding is necessary, bytes are passed through unchanged.
        Passthrough { #[pin] inner: R },
        /// Decodes a gzip encoded stream.
        GZip { #[pin] inner: GzipDecoder<R> },
        /// Decodes a bzip2 encoded stream.
        Bz2 { #[pin] inner: BzDecoder<R> },
        /// Decodes a zstd encoded stream.
        Zst { #[pin] inner: ZstdDecoder<R> },
    }
}

impl<R: AsyncBufRead> AsyncRead for Decoder<R> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.project() {
            DecoderProj::Passthrough { inner } => inner.poll_read(cx, buf),
            DecoderProj::GZip { inner } => inner.poll_read(cx, buf),
            DecoderProj::Bz2 { inner } => inner.poll_read(cx, buf),
            DecoderProj::Zst { inner } => inner.poll_read(cx, buf),
        }
    }
}
