//! An async streaming `multipart/form-data` encoder and upload body for Rust.
//!
//! `formpost` encodes form fields and large file uploads without ever holding
//! the full request body in memory: the exact `Content-Length` is computed up
//! front (seeking byte sources when needed), and the body is emitted as an
//! ordered stream of bounded chunks that an HTTP client writes incrementally.
//! When a length cannot be determined, encoding fails before any network I/O
//! instead of silently falling back to chunked transfer encoding.
//!
//! # Examples
//!
//! ```
//! use formpost::{MultipartBody, Param, UploadBody};
//!
//! # async fn run() {
//! let params = Param::from_params(vec![("title", "My Document"), ("note", "hello")]);
//! let body = MultipartBody::new(params).await.unwrap();
//!
//! // `Content-Type` with the boundary, and the exact `Content-Length`.
//! let request = formpost::upload_request(
//!     http::Method::POST,
//!     "http://localhost:3000/upload",
//!     UploadBody::from(body),
//! )
//! .unwrap();
//!
//! // Hand `request` to any client that consumes `http_body::Body`.
//! # drop(request);
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```

pub use error::Error;
pub use escape::{quote_header_value, url_encode};
pub use multipart::{encode_headers, encoded_size, gen_boundary, MultipartBody, ProgressFn};
pub use param::{Param, ParamValue};
pub use source::ByteSource;
pub use streaming::{upload_request, UploadBody};

#[doc(hidden)]
pub use bytes;

mod constants;
mod error;
mod escape;
mod multipart;
mod param;
mod source;
mod streaming;

/// A Result type often returned from methods that can have `formpost` errors.
pub type Result<T> = std::result::Result<T, Error>;
