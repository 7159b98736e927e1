use std::fmt::{self, Debug, Display, Formatter};

use derive_more::Display;

/// A set of errors that can occur during encoding a multipart body and in
/// other operations.
#[derive(Display)]
#[non_exhaustive]
pub enum Error {
    /// A parameter was constructed with both or neither of an inline value
    /// and a byte source.
    #[display(fmt = "field '{}' needs exactly one of a value or a byte source", name)]
    InvalidParam { name: String },

    /// The length of a field's byte source could not be determined: no length
    /// was declared and the source is not seekable.
    #[display(
        fmt = "length of field '{}' is unknown",
        "field_name.as_deref().unwrap_or(\"<unknown>\")"
    )]
    LengthUnknown { field_name: Option<String> },

    /// The request body has no determinable length. Streaming requests need an
    /// exact length before any I/O is performed; there is no fallback to
    /// chunked transfer encoding.
    #[display(fmt = "an exact content length is required before the request can be sent")]
    LengthRequired,

    /// A byte source reached EOF before yielding its computed length.
    #[display(
        fmt = "field '{}' ended before its computed length",
        "field_name.as_deref().unwrap_or(\"<unknown>\")"
    )]
    IncompleteSource { field_name: Option<String> },

    /// The boundary token was found inside a field's body.
    #[display(
        fmt = "boundary found in the body of field '{}'",
        "field_name.as_deref().unwrap_or(\"<unknown>\")"
    )]
    BoundaryCollision { field_name: Option<String> },

    /// Reading or seeking a byte source failed.
    #[display(fmt = "byte source read failed: {}", _0)]
    SourceRead(std::io::Error),

    /// The request parts could not be assembled.
    #[display(fmt = "failed to build the request: {}", _0)]
    BuildRequest(http::Error),
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::SourceRead(err)
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Error {
        Error::BuildRequest(err)
    }
}
