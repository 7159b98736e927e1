use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use rand::Rng;

use crate::constants;
use crate::escape::{quote_header_value, url_encode};
use crate::param::{Param, ParamBody};
use crate::source::ByteSource;

/// Progress callback invoked after every emitted chunk with the current
/// field name (`None` once the terminator is reached), the cumulative bytes
/// emitted, and the total body size.
pub type ProgressFn = Box<dyn FnMut(Option<&str>, u64, u64) + Send>;

/// Picks a random boundary token of four 16-digit hex segments.
pub fn gen_boundary() -> String {
    let mut rng = rand::thread_rng();

    format!(
        "{:016x}-{:016x}-{:016x}-{:016x}",
        rng.gen::<u64>(),
        rng.gen::<u64>(),
        rng.gen::<u64>(),
        rng.gen::<u64>()
    )
}

impl Param {
    /// The exact byte length of this field's body.
    ///
    /// Inline values measure their UTF-8 bytes; sources use their declared
    /// length or seek discovery, caching the result.
    pub async fn body_len(&mut self) -> crate::Result<u64> {
        match &mut self.body {
            ParamBody::Text(data) => Ok(data.len() as u64),
            ParamBody::Source(source) => match source.len().await {
                Ok(len) => Ok(len),
                Err(crate::Error::LengthUnknown { .. }) => Err(crate::Error::LengthUnknown {
                    field_name: Some(self.name.clone()),
                }),
                Err(err) => Err(err),
            },
        }
    }

    /// The exact byte length of this field's header block under `boundary`.
    pub async fn header_len(&mut self, boundary: &str) -> crate::Result<u64> {
        let boundary = url_encode(boundary);
        let body_len = self.body_len().await?;
        Ok(header_block(self, &boundary, body_len).len() as u64)
    }

    /// The exact encoded length of this field under `boundary`: header
    /// block, body, and the trailing CRLF.
    pub async fn encoded_len(&mut self, boundary: &str) -> crate::Result<u64> {
        let boundary = url_encode(boundary);
        encoded_len(self, &boundary).await
    }
}

// Takes an already-normalized boundary.
async fn encoded_len(param: &mut Param, boundary: &str) -> crate::Result<u64> {
    let body_len = param.body_len().await?;
    let header = header_block(param, boundary, body_len);
    Ok(header.len() as u64 + body_len + constants::CRLF.len() as u64)
}

/// Computes the exact encoded length of `params` under `boundary` without
/// consuming any source content. Seek-discovered lengths are cached on the
/// parameters, so sizing and then encoding reads every source only once.
pub async fn encoded_size(params: &mut [Param], boundary: &str) -> crate::Result<u64> {
    let boundary = url_encode(boundary);
    let mut total = terminator(&boundary).len() as u64;

    for param in params.iter_mut() {
        total += encoded_len(param, &boundary).await?;
    }

    Ok(total)
}

/// Derives the request headers for `params` under `boundary`: the multipart
/// `Content-Type` and an exact `Content-Length`.
///
/// Fails with [`Error::LengthUnknown`](crate::Error::LengthUnknown) before
/// any network I/O when a parameter's length cannot be determined.
pub async fn encode_headers(params: &mut [Param], boundary: &str) -> crate::Result<HeaderMap> {
    let total = encoded_size(params, boundary).await?;
    header_map(&url_encode(boundary), total)
}

fn terminator(boundary: &str) -> String {
    format!(
        "{}{}{}{}",
        constants::BOUNDARY_EXT,
        boundary,
        constants::BOUNDARY_EXT,
        constants::CRLF
    )
}

fn header_block(param: &Param, boundary: &str, body_len: u64) -> String {
    let mut header = String::new();

    header.push_str(constants::BOUNDARY_EXT);
    header.push_str(boundary);
    header.push_str(constants::CRLF);

    header.push_str("Content-Disposition: form-data; name=\"");
    header.push_str(&url_encode(&param.name));
    header.push('"');
    if let Some(filename) = &param.filename {
        header.push_str("; filename=\"");
        header.push_str(&quote_header_value(filename));
        header.push('"');
    }
    header.push_str(constants::CRLF);

    header.push_str("Content-Type: ");
    match &param.content_type {
        Some(content_type) => header.push_str(content_type.as_ref()),
        None => header.push_str(mime::TEXT_PLAIN_UTF_8.as_ref()),
    }
    header.push_str(constants::CRLF);

    header.push_str(&format!("Content-Length: {}", body_len));
    header.push_str(constants::CRLF);
    header.push_str(constants::CRLF);

    header
}

fn header_map(boundary: &str, total: u64) -> crate::Result<HeaderMap> {
    let content_type = format!("multipart/form-data; boundary={}", boundary);
    let mut headers = HeaderMap::with_capacity(2);

    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&content_type).map_err(http::Error::from)?,
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(total));

    Ok(headers)
}

/// A lazily encoded `multipart/form-data` body.
///
/// The total byte length and the derived request headers are computed up
/// front, before a single body byte is produced; the body itself is emitted
/// through the [`Stream`](futures_util::stream::Stream) implementation as an
/// ordered, forward-only sequence of bounded chunks: for each parameter its
/// header block, its body in chunks of at most the configured chunk size,
/// and a trailing CRLF, followed by one terminator chunk.
///
/// The sequence is not restartable. Re-encoding requires a fresh
/// `MultipartBody` built over unconsumed (or reset) byte sources.
///
/// By default body content is scanned for the boundary token and the stream
/// fails with [`Error::BoundaryCollision`](crate::Error::BoundaryCollision)
/// on a hit; see [`collision_check`](MultipartBody::collision_check).
///
/// # Examples
///
/// ```
/// use formpost::{MultipartBody, Param};
///
/// # async fn run() {
/// let params = Param::from_params(vec![("title", "My Document"), ("note", "hello")]);
/// let mut body = MultipartBody::new(params).await.unwrap();
/// let headers = body.headers();
///
/// while let Some(chunk) = body.next_chunk().await.unwrap() {
///     println!("chunk: {} bytes", chunk.len());
/// }
/// # let _ = headers;
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct MultipartBody {
    parts: Vec<PartState>,
    idx: usize,
    stage: EncodeStage,
    boundary: String,
    needle: Vec<u8>,
    terminator: Bytes,
    content_type: String,
    headers: HeaderMap,
    total: u64,
    sent: u64,
    chunk_size: usize,
    collision_check: bool,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for MultipartBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartBody")
            .field("idx", &self.idx)
            .field("stage", &self.stage)
            .field("boundary", &self.boundary)
            .field("content_type", &self.content_type)
            .field("total", &self.total)
            .field("sent", &self.sent)
            .field("chunk_size", &self.chunk_size)
            .field("collision_check", &self.collision_check)
            .field("progress", &self.progress.as_ref().map(|_| "<fn>"))
            .finish_non_exhaustive()
    }
}

struct PartState {
    name: String,
    header: Bytes,
    body: ByteSource,
    body_len: u64,
    body_sent: u64,
    // Last bytes of the previous body chunk, kept so the collision scan can
    // match a boundary split across a chunk seam.
    tail: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EncodeStage {
    PartHeader,
    PartBody,
    PartCrlf,
    Terminator,
    Eof,
}

impl MultipartBody {
    /// Encodes `params` under a random boundary.
    pub async fn new(params: Vec<Param>) -> crate::Result<MultipartBody> {
        MultipartBody::with_boundary(params, &gen_boundary()).await
    }

    /// Encodes `params` under a caller-chosen boundary token. The token is
    /// form-urlencoded before use, matching the quoting applied to field
    /// names.
    pub async fn with_boundary(params: Vec<Param>, boundary: &str) -> crate::Result<MultipartBody> {
        let boundary = url_encode(boundary);
        let mut parts = Vec::with_capacity(params.len());
        let mut total: u64 = 0;

        for mut param in params {
            let body_len = param.body_len().await?;
            let header = Bytes::from(header_block(&param, &boundary, body_len));
            total += header.len() as u64 + body_len + constants::CRLF.len() as u64;

            let Param { name, body, .. } = param;
            let body = match body {
                ParamBody::Text(data) => ByteSource::from_bytes(data),
                ParamBody::Source(source) => source,
            };

            parts.push(PartState {
                name,
                header,
                body,
                body_len,
                body_sent: 0,
                tail: Vec::new(),
            });
        }

        let terminator = Bytes::from(terminator(&boundary));
        total += terminator.len() as u64;

        let needle = format!("{}{}", constants::BOUNDARY_EXT, boundary).into_bytes();
        let content_type = format!("multipart/form-data; boundary={}", boundary);
        let headers = header_map(&boundary, total)?;

        #[cfg(feature = "log")]
        log::debug!(
            "multipart body encoded: {} part(s), {} bytes, boundary {}",
            parts.len(),
            total,
            boundary
        );

        Ok(MultipartBody {
            parts,
            idx: 0,
            stage: EncodeStage::PartHeader,
            boundary,
            needle,
            terminator,
            content_type,
            headers,
            total,
            sent: 0,
            chunk_size: constants::DEFAULT_CHUNK_SIZE,
            collision_check: true,
            progress: None,
        })
    }

    /// Caps the size of emitted body chunks. Header and terminator chunks
    /// are emitted whole. A zero chunk size would never make progress and is
    /// bumped to one byte.
    pub fn chunk_size(mut self, chunk_size: usize) -> MultipartBody {
        self.chunk_size = std::cmp::max(chunk_size, 1);
        self
    }

    /// Enables or disables the scan for the boundary token inside body
    /// content. Enabled by default; a hit fails the stream mid-emission with
    /// [`Error::BoundaryCollision`](crate::Error::BoundaryCollision).
    /// Disabling it makes the caller responsible for picking a boundary that
    /// cannot occur in any part body.
    pub fn collision_check(mut self, enabled: bool) -> MultipartBody {
        self.collision_check = enabled;
        self
    }

    /// Installs a progress callback. It runs synchronously on the polling
    /// context after every emitted chunk and must not block.
    pub fn progress<F>(mut self, progress: F) -> MultipartBody
    where
        F: FnMut(Option<&str>, u64, u64) + Send + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    /// The boundary token in use, already form-urlencoded.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The exact number of bytes this stream will emit.
    pub fn size(&self) -> u64 {
        self.total
    }

    /// The `multipart/form-data` content type line, boundary included.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The derived request headers: the multipart `Content-Type` and the
    /// exact `Content-Length`.
    pub fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    /// Yields the next chunk if available.
    pub async fn next_chunk(&mut self) -> crate::Result<Option<Bytes>> {
        self.try_next().await
    }

    pub(crate) fn is_done(&self) -> bool {
        self.stage == EncodeStage::Eof
    }

    pub(crate) fn transferred(&self) -> u64 {
        self.sent
    }
}

fn emit_chunk(
    progress: &mut Option<ProgressFn>,
    sent: &mut u64,
    total: u64,
    field: Option<&str>,
    chunk: Bytes,
) -> Bytes {
    *sent += chunk.len() as u64;

    if let Some(cb) = progress.as_mut() {
        cb(field, *sent, total);
    }

    chunk
}

// Returns true when `--<boundary>` occurs in the body content, matching
// across chunk seams via the part's carried tail.
fn boundary_in_body(tail: &mut Vec<u8>, needle: &[u8], chunk: &[u8]) -> bool {
    let mut window = Vec::with_capacity(tail.len() + chunk.len());
    window.extend_from_slice(tail);
    window.extend_from_slice(chunk);

    let hit = memchr::memmem::find(&window, needle).is_some();

    let keep = std::cmp::min(window.len(), needle.len().saturating_sub(1));
    *tail = window[window.len() - keep..].to_vec();

    hit
}

impl Stream for MultipartBody {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let MultipartBody {
            parts,
            idx,
            stage,
            needle,
            terminator,
            total,
            sent,
            chunk_size,
            collision_check,
            progress,
            ..
        } = self.get_mut();

        loop {
            match *stage {
                EncodeStage::Eof => return Poll::Ready(None),

                EncodeStage::PartHeader => {
                    if *idx >= parts.len() {
                        *stage = EncodeStage::Terminator;
                        continue;
                    }

                    let part = &parts[*idx];
                    *stage = EncodeStage::PartBody;
                    let chunk = part.header.clone();

                    return Poll::Ready(Some(Ok(emit_chunk(
                        progress,
                        sent,
                        *total,
                        Some(part.name.as_str()),
                        chunk,
                    ))));
                }

                EncodeStage::PartBody => {
                    let part = &mut parts[*idx];

                    if part.body_sent >= part.body_len {
                        *stage = EncodeStage::PartCrlf;
                        continue;
                    }

                    let remaining = part.body_len - part.body_sent;
                    let max = std::cmp::min(*chunk_size as u64, remaining) as usize;

                    let chunk = match part.body.poll_read_chunk(cx, max) {
                        Poll::Ready(Ok(chunk)) => chunk,
                        Poll::Ready(Err(err)) => {
                            *stage = EncodeStage::Eof;
                            return Poll::Ready(Some(Err(err.into())));
                        }
                        Poll::Pending => return Poll::Pending,
                    };

                    if chunk.is_empty() {
                        *stage = EncodeStage::Eof;
                        return Poll::Ready(Some(Err(crate::Error::IncompleteSource {
                            field_name: Some(part.name.clone()),
                        })));
                    }

                    part.body_sent += chunk.len() as u64;

                    if *collision_check && boundary_in_body(&mut part.tail, needle, &chunk) {
                        *stage = EncodeStage::Eof;
                        return Poll::Ready(Some(Err(crate::Error::BoundaryCollision {
                            field_name: Some(part.name.clone()),
                        })));
                    }

                    return Poll::Ready(Some(Ok(emit_chunk(
                        progress,
                        sent,
                        *total,
                        Some(part.name.as_str()),
                        chunk,
                    ))));
                }

                EncodeStage::PartCrlf => {
                    let part = &parts[*idx];
                    *stage = EncodeStage::PartHeader;
                    *idx += 1;
                    let chunk = Bytes::from_static(constants::CRLF.as_bytes());

                    return Poll::Ready(Some(Ok(emit_chunk(
                        progress,
                        sent,
                        *total,
                        Some(part.name.as_str()),
                        chunk,
                    ))));
                }

                EncodeStage::Terminator => {
                    *stage = EncodeStage::Eof;
                    let chunk = terminator.clone();

                    return Poll::Ready(Some(Ok(emit_chunk(progress, sent, *total, None, chunk))));
                }
            }
        }
    }
}
