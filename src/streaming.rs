use std::convert::TryFrom;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Request, Uri};
use http_body::{Body, Frame, SizeHint};

use crate::constants;
use crate::multipart::MultipartBody;
use crate::source::ByteSource;

/// A request body with an exact, pre-declared length.
///
/// This is the bridge between the lazy encoder (or a raw byte source) and an
/// HTTP client: it implements [`http_body::Body`], pulling one bounded chunk
/// at a time, and always reports an exact
/// [`size_hint`](http_body::Body::size_hint) so the client writes a
/// `Content-Length` request instead of falling back to chunked transfer
/// encoding.
///
/// Bodies are one-shot and request-scoped: once fully consumed, the body
/// only reports end-of-stream and can never bleed into another request.
/// Retrying a request — a redirect replay included — needs a freshly encoded
/// body over reset byte sources.
pub struct UploadBody {
    inner: Inner,
}

enum Inner {
    Multipart(MultipartBody),
    Source {
        source: ByteSource,
        length: u64,
        sent: u64,
    },
    Buffer(Bytes),
}

impl UploadBody {
    /// Wraps a lazily encoded multipart body.
    pub fn multipart(body: MultipartBody) -> UploadBody {
        UploadBody {
            inner: Inner::Multipart(body),
        }
    }

    /// Wraps an in-memory buffer.
    pub fn buffer<B: Into<Bytes>>(data: B) -> UploadBody {
        UploadBody {
            inner: Inner::Buffer(data.into()),
        }
    }

    /// Wraps a raw byte source.
    ///
    /// The source's length is resolved up front: the declared length when
    /// present, seek discovery otherwise. A source with no determinable
    /// length is rejected with
    /// [`Error::LengthRequired`](crate::Error::LengthRequired) before any
    /// network I/O happens.
    pub async fn source(mut source: ByteSource) -> crate::Result<UploadBody> {
        let length = match source.len().await {
            Ok(length) => length,
            Err(crate::Error::LengthUnknown { .. }) => return Err(crate::Error::LengthRequired),
            Err(err) => return Err(err),
        };

        Ok(UploadBody {
            inner: Inner::Source {
                source,
                length,
                sent: 0,
            },
        })
    }

    /// The exact number of bytes this body produces in total.
    pub fn content_length(&self) -> u64 {
        match &self.inner {
            Inner::Multipart(body) => body.size(),
            Inner::Source { length, .. } => *length,
            Inner::Buffer(data) => data.len() as u64,
        }
    }

    fn content_type(&self) -> Option<&str> {
        match &self.inner {
            Inner::Multipart(body) => Some(body.content_type()),
            _ => None,
        }
    }

    fn remaining(&self) -> u64 {
        match &self.inner {
            Inner::Multipart(body) => body.size() - body.transferred(),
            Inner::Source { length, sent, .. } => length - sent,
            Inner::Buffer(data) => data.len() as u64,
        }
    }
}

impl From<MultipartBody> for UploadBody {
    fn from(body: MultipartBody) -> UploadBody {
        UploadBody::multipart(body)
    }
}

impl From<Bytes> for UploadBody {
    fn from(data: Bytes) -> UploadBody {
        UploadBody::buffer(data)
    }
}

impl From<Vec<u8>> for UploadBody {
    fn from(data: Vec<u8>) -> UploadBody {
        UploadBody::buffer(data)
    }
}

impl From<String> for UploadBody {
    fn from(data: String) -> UploadBody {
        UploadBody::buffer(data)
    }
}

impl From<&'static str> for UploadBody {
    fn from(data: &'static str) -> UploadBody {
        UploadBody::buffer(data)
    }
}

impl Body for UploadBody {
    type Data = Bytes;
    type Error = crate::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, crate::Error>>> {
        let this = self.get_mut();

        match &mut this.inner {
            Inner::Multipart(body) => match Pin::new(body).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
                Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
            Inner::Source {
                source,
                length,
                sent,
            } => {
                if *sent >= *length {
                    return Poll::Ready(None);
                }

                let remaining = *length - *sent;
                let max = std::cmp::min(constants::DEFAULT_CHUNK_SIZE as u64, remaining) as usize;

                match source.poll_read_chunk(cx, max) {
                    Poll::Ready(Ok(chunk)) => {
                        if chunk.is_empty() {
                            *sent = *length;
                            return Poll::Ready(Some(Err(crate::Error::IncompleteSource {
                                field_name: None,
                            })));
                        }

                        *sent += chunk.len() as u64;
                        Poll::Ready(Some(Ok(Frame::data(chunk))))
                    }
                    Poll::Ready(Err(err)) => Poll::Ready(Some(Err(err.into()))),
                    Poll::Pending => Poll::Pending,
                }
            }
            Inner::Buffer(data) => {
                if data.is_empty() {
                    return Poll::Ready(None);
                }

                let chunk = std::mem::take(data);
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Inner::Multipart(body) => body.is_done(),
            Inner::Source { length, sent, .. } => sent >= length,
            Inner::Buffer(data) => data.is_empty(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining())
    }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            Inner::Multipart(_) => "multipart",
            Inner::Source { .. } => "source",
            Inner::Buffer(_) => "buffer",
        };

        f.debug_struct("UploadBody")
            .field("kind", &kind)
            .field("content_length", &self.content_length())
            .finish()
    }
}

/// Builds a streaming request around `body`.
///
/// The exact `Content-Length` is stamped up front — and the multipart
/// `Content-Type` when the body is a multipart one — then the request is
/// handed back for any [`http_body`]-consuming client to send. Connection
/// handling, TLS, and redirect-following stay with that client; on a
/// redirect the client issues a new, independent request, for which a fresh
/// body must be encoded.
pub fn upload_request<U>(method: Method, uri: U, body: UploadBody) -> crate::Result<Request<UploadBody>>
where
    Uri: TryFrom<U>,
    <Uri as TryFrom<U>>::Error: Into<http::Error>,
{
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(content_type) = body.content_type() {
        builder = builder.header(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type).map_err(http::Error::from)?,
        );
    }
    builder = builder.header(CONTENT_LENGTH, HeaderValue::from(body.content_length()));

    #[cfg(feature = "log")]
    log::debug!("streaming request prepared: {} bytes", body.content_length());

    builder.body(body).map_err(crate::Error::BuildRequest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::io::AsyncReadExt;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_source_body_requires_length() {
        let source = ByteSource::from_reader(futures_util::io::repeat(b'x').take(10));
        let err = UploadBody::source(source).await.unwrap_err();

        assert_eq!(err, crate::Error::LengthRequired);
    }

    #[tokio::test]
    async fn test_source_body_with_declared_length() {
        let source = ByteSource::from_reader(futures_util::io::repeat(b'x').take(10)).with_length(10);
        let body = UploadBody::source(source).await.unwrap();

        assert_eq!(body.content_length(), 10);
        assert_eq!(body.size_hint().exact(), Some(10));

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"xxxxxxxxxx");
    }

    #[tokio::test]
    async fn test_buffer_body_end_stream() {
        let mut body = UploadBody::buffer("hello");
        assert!(!body.is_end_stream());

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(&frame.into_data().unwrap()[..], b"hello");
        assert!(body.is_end_stream());
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_upload_request_headers() {
        let request = upload_request(Method::POST, "http://localhost/upload", UploadBody::from("hello"))
            .unwrap();

        assert_eq!(request.headers()[CONTENT_LENGTH], "5");
        assert_eq!(request.body().content_length(), 5);
    }
}
