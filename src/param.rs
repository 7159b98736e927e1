use std::fmt;

use bytes::Bytes;
use mime::Mime;

use crate::source::ByteSource;

/// One form field: a name plus either an inline value or an open byte
/// source, with optional filename and content type metadata.
///
/// A `Param` is immutable once constructed; only the byte source's read
/// cursor moves, advanced by the encoder during a single encode pass. No
/// `Param` is encoded twice by the same pass.
///
/// Duplicate names across params are legal and preserved in order, matching
/// standard form semantics.
pub struct Param {
    pub(crate) name: String,
    pub(crate) filename: Option<String>,
    pub(crate) content_type: Option<Mime>,
    pub(crate) body: ParamBody,
}

pub(crate) enum ParamBody {
    Text(Bytes),
    Source(ByteSource),
}

/// The value half of a `(name, value)` pair accepted by
/// [`Param::from_params`]: inline text or a byte source.
pub enum ParamValue {
    Text(String),
    Source(ByteSource),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> ParamValue {
        ParamValue::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> ParamValue {
        ParamValue::Text(value)
    }
}

impl From<ByteSource> for ParamValue {
    fn from(source: ByteSource) -> ParamValue {
        ParamValue::Source(source)
    }
}

impl<N, V> From<(N, V)> for Param
where
    N: Into<String>,
    V: Into<ParamValue>,
{
    fn from((name, value): (N, V)) -> Param {
        match value.into() {
            ParamValue::Text(value) => Param::text(name, value),
            ParamValue::Source(source) => Param::source(name, source),
        }
    }
}

impl Param {
    /// Builds a field from an optional inline value and an optional byte
    /// source. Exactly one of the two must be present; anything else fails
    /// with [`Error::InvalidParam`](crate::Error::InvalidParam).
    pub fn new<N, V>(name: N, value: Option<V>, source: Option<ByteSource>) -> crate::Result<Param>
    where
        N: Into<String>,
        V: Into<String>,
    {
        let name = name.into();

        match (value, source) {
            (Some(value), None) => Ok(Param::text(name, value)),
            (None, Some(source)) => Ok(Param::source(name, source)),
            _ => Err(crate::Error::InvalidParam { name }),
        }
    }

    /// A field carrying an inline text value.
    pub fn text<N: Into<String>, V: Into<String>>(name: N, value: V) -> Param {
        Param {
            name: name.into(),
            filename: None,
            content_type: None,
            body: ParamBody::Text(Bytes::from(value.into())),
        }
    }

    /// A field streaming its body from `source`.
    pub fn source<N: Into<String>>(name: N, source: ByteSource) -> Param {
        Param {
            name: name.into(),
            filename: None,
            content_type: None,
            body: ParamBody::Source(source),
        }
    }

    /// Attaches a filename, rendered into the part's `Content-Disposition`
    /// header.
    pub fn filename<F: Into<String>>(mut self, filename: F) -> Param {
        self.filename = Some(filename.into());
        self
    }

    /// Overrides the part's content type. Parts default to
    /// `text/plain; charset=utf-8` when unset.
    pub fn content_type(mut self, content_type: Mime) -> Param {
        self.content_type = Some(content_type);
        self
    }

    /// Normalizes a heterogeneous parameter collection into an ordered field
    /// sequence.
    ///
    /// Accepts `(name, value)` pairs where the value is text or a
    /// [`ByteSource`] (mix the two via [`ParamValue`]), maps of the same,
    /// and already-built [`Param`]s, which pass through unchanged.
    ///
    /// For unordered maps the map's iteration order becomes the part order,
    /// which is caller-visible; pass an ordered collection when the part
    /// order matters.
    pub fn from_params<I, P>(params: I) -> Vec<Param>
    where
        I: IntoIterator<Item = P>,
        P: Into<Param>,
    {
        params.into_iter().map(Into::into).collect()
    }

    /// Opens `path` and builds a file field: the filename is the path's base
    /// name and the content type is guessed from its extension, falling back
    /// to `application/octet-stream`. The opened file is closed when the
    /// encode pass (or the `Param` itself) is dropped.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    pub async fn from_file<N, P>(name: N, path: P) -> crate::Result<Param>
    where
        N: Into<String>,
        P: AsRef<std::path::Path>,
    {
        let path = path.as_ref();
        let source = ByteSource::open(path).await?;
        let filename = path.file_name().map(|name| name.to_string_lossy().into_owned());
        let content_type = mime_guess::from_path(path).first_or_octet_stream();

        let mut param = Param::source(name, source);
        param.filename = filename;
        param.content_type = Some(content_type);
        Ok(param)
    }

    /// The field's name, as supplied by the caller (quoting happens at
    /// render time).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field's filename, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.filename.as_deref()
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Param");
        dbg.field("name", &self.name);

        if let Some(filename) = &self.filename {
            dbg.field("filename", filename);
        }
        if let Some(content_type) = &self.content_type {
            dbg.field("content_type", content_type);
        }
        match &self.body {
            ParamBody::Text(data) => dbg.field("value_len", &data.len()),
            ParamBody::Source(source) => dbg.field("source_len", &source.length_hint()),
        };

        dbg.finish()
    }
}

/// Metadata equality, used to verify normalization: name, filename, content
/// type, and the value bytes for inline fields. Source-backed fields compare
/// by their declared length only, since two open sources have no observable
/// content without consuming them.
impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        let body_eq = match (&self.body, &other.body) {
            (ParamBody::Text(a), ParamBody::Text(b)) => a == b,
            (ParamBody::Source(a), ParamBody::Source(b)) => a.length_hint() == b.length_hint(),
            _ => false,
        };

        body_eq
            && self.name == other.name
            && self.filename == other.filename
            && self.content_type == other.content_type
    }
}
