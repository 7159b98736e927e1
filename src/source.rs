use std::io::SeekFrom;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::io::{AsyncRead, AsyncSeek, AsyncSeekExt};

/// An open byte source backing a form field: an in-memory buffer, a plain
/// reader, or a seekable reader whose length can be discovered on demand.
///
/// The read cursor lives on the source and is advanced monotonically by the
/// encoder; it is never rewound. Re-encoding therefore requires a fresh
/// source, or one whose cursor the caller has reset.
///
/// Sources handed in by the caller are owned by the caller; the wrapped
/// reader is only dropped together with the `ByteSource`.
pub struct ByteSource {
    reader: Reader,
    length: Option<u64>,
}

enum Reader {
    Memory { data: Bytes, pos: usize },
    Plain(Box<dyn AsyncRead + Send + Unpin>),
    Seekable(Box<dyn SeekSource + Send + Unpin>),
}

// Object-safe bundle of the read and seek capabilities.
pub(crate) trait SeekSource: AsyncRead + AsyncSeek {}

impl<T: AsyncRead + AsyncSeek> SeekSource for T {}

impl ByteSource {
    /// Wraps an in-memory buffer. The length is known up front.
    pub fn from_bytes<B: Into<Bytes>>(data: B) -> ByteSource {
        let data = data.into();
        let length = Some(data.len() as u64);

        ByteSource {
            reader: Reader::Memory { data, pos: 0 },
            length,
        }
    }

    /// Wraps a plain reader with no length attached.
    ///
    /// Size computation will fail for such a source unless a length is
    /// declared via [`with_length`](ByteSource::with_length).
    pub fn from_reader<R>(reader: R) -> ByteSource
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        ByteSource {
            reader: Reader::Plain(Box::new(reader)),
            length: None,
        }
    }

    /// Wraps a seekable reader. When no length is declared, it is discovered
    /// by seeking to the end and back.
    pub fn from_seekable<R>(reader: R) -> ByteSource
    where
        R: AsyncRead + AsyncSeek + Send + Unpin + 'static,
    {
        ByteSource {
            reader: Reader::Seekable(Box::new(reader)),
            length: None,
        }
    }

    /// Opens `path` as a seekable source; the length is discovered by
    /// seeking when first needed.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    pub async fn open<P: AsRef<std::path::Path>>(path: P) -> crate::Result<ByteSource> {
        use tokio_util::compat::TokioAsyncReadCompatExt;

        let file = tokio::fs::File::open(path).await?;
        Ok(ByteSource::from_seekable(file.compat()))
    }

    /// Declares the number of bytes this source will yield, skipping length
    /// discovery.
    pub fn with_length(mut self, length: u64) -> ByteSource {
        self.length = Some(length);
        self
    }

    /// The declared or already-discovered length, if any.
    pub fn length_hint(&self) -> Option<u64> {
        self.length
    }

    /// Resolves the number of bytes remaining in this source.
    ///
    /// The declared length wins when present. Otherwise the source is seeked
    /// to its end and back, measuring from the current cursor; the result is
    /// cached. Plain readers with no declared length fail with
    /// [`Error::LengthUnknown`](crate::Error::LengthUnknown).
    pub async fn len(&mut self) -> crate::Result<u64> {
        if let Some(length) = self.length {
            return Ok(length);
        }

        let length = match &mut self.reader {
            Reader::Memory { data, pos } => (data.len() - *pos) as u64,
            Reader::Seekable(reader) => {
                let pos = reader.seek(SeekFrom::Current(0)).await?;
                let end = reader.seek(SeekFrom::End(0)).await?;
                reader.seek(SeekFrom::Start(pos)).await?;
                end - pos
            }
            Reader::Plain(_) => return Err(crate::Error::LengthUnknown { field_name: None }),
        };

        self.length = Some(length);
        Ok(length)
    }

    /// Reads one chunk of at most `max` bytes. An empty chunk means EOF.
    pub(crate) fn poll_read_chunk(
        &mut self,
        cx: &mut Context<'_>,
        max: usize,
    ) -> Poll<std::io::Result<Bytes>> {
        match &mut self.reader {
            Reader::Memory { data, pos } => {
                let end = std::cmp::min(*pos + max, data.len());
                let chunk = data.slice(*pos..end);
                *pos = end;
                Poll::Ready(Ok(chunk))
            }
            Reader::Plain(reader) => poll_read_chunk_of(reader, cx, max),
            Reader::Seekable(reader) => poll_read_chunk_of(reader, cx, max),
        }
    }
}

fn poll_read_chunk_of<R>(reader: &mut R, cx: &mut Context<'_>, max: usize) -> Poll<std::io::Result<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(max);
    buf.resize(max, 0);

    match Pin::new(reader).poll_read(cx, &mut buf) {
        Poll::Ready(Ok(n)) => {
            buf.truncate(n);
            Poll::Ready(Ok(buf.freeze()))
        }
        Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
        Poll::Pending => Poll::Pending,
    }
}
