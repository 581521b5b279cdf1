//! # axum-filestream
//!
//! HTTP byte-range file delivery for [`axum`][1].
//!
//! Given a file path (or any body implementing [`RangeBody`]) and the raw
//! `Range` header sent by the client, this crate resolves the byte window and
//! response status, assembles the partial-content headers, and streams the
//! window in fixed-size chunks with optional inter-chunk throttling.
//!
//! Range handling is deliberately permissive: malformed or out-of-bounds
//! ranges degrade to full-content or zero-length responses instead of a 416.
//! Only the first range unit of a header is honoured; multipart/byteranges
//! responses are out of scope.
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use axum::http::HeaderMap;
//! use axum::http::header::RANGE;
//!
//! use axum_filestream::{Error, RangedFile};
//!
//! async fn file(headers: HeaderMap) -> Result<RangedFile, Error> {
//!     let range = headers.get(RANGE).and_then(|v| v.to_str().ok()).map(String::from);
//!     Ok(RangedFile::open("document.txt").await?.range_header(range))
//! }
//!
//! let _app: Router = Router::new().route("/", get(file));
//! ```
//!
//! [1]: https://docs.rs/axum

mod file;
mod range;
mod sender;
mod stream;

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tokio::io::{AsyncRead, AsyncSeek};

pub use file::{detect_mime_type, FileMeta, RangedFile, SizedBody};
pub use range::{resolve, ResolvedRange, SuffixPolicy};
pub use sender::{Sink, StreamSender};
pub use stream::RangedStream;

/// Default chunk size: 1 MiB. Also the window extent applied to open-ended
/// range requests.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Request-level failures raised before any header is written.
///
/// Mid-stream faults cannot change the status code and instead terminate the
/// body stream with an [`io::Error`].
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Immutable per-transfer configuration.
///
/// Passed by value at call time; there is no way to mutate an in-flight
/// transfer. `chunk_size` bounds both the per-read buffer and the default
/// window applied to open-ended range requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub chunk_size: u64,
    pub inter_chunk_delay: Duration,
    pub suffix_policy: SuffixPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inter_chunk_delay: Duration::ZERO,
            suffix_policy: SuffixPolicy::default(),
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk size in bytes, clamped to a minimum of 1.
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the pause inserted after each chunk, for bandwidth shaping.
    pub fn throttle(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    pub fn suffix_policy(mut self, policy: SuffixPolicy) -> Self {
        self.suffix_policy = policy;
        self
    }
}

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// An [`AsyncRead`] and [`AsyncSeekStart`] with a fixed known byte size.
pub trait RangeBody: AsyncRead + AsyncSeekStart {
    /// The total size of the underlying file.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// Behaviour is not guaranteed if it does change.
    fn byte_size(&self) -> u64;
}

/// The main responder type. Implements [`IntoResponse`].
///
/// Takes the raw `Range` header value as sent on the wire; resolution is a
/// pure function of that string and the body size, see [`resolve`].
#[derive(Debug)]
pub struct Ranged<B: RangeBody + Send + 'static> {
    range: Option<String>,
    body: B,
    content_type: Option<String>,
    config: StreamConfig,
}

impl<B: RangeBody + Send + 'static> Ranged<B> {
    pub fn new(range: Option<String>, body: B) -> Self {
        Ranged {
            range,
            body,
            content_type: None,
            config: StreamConfig::default(),
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolves the range and builds headers and body as [`RangedResponse`].
    ///
    /// Infallible: unsatisfiable or malformed ranges degrade to full-content
    /// or zero-length responses rather than an error status.
    pub fn respond(self) -> RangedResponse<B> {
        let total_bytes = self.body.byte_size();
        let range = resolve(self.range.as_deref(), total_bytes, &self.config);

        let content_range = range.is_partial.then(|| {
            ContentRange::bytes(range.start..range.end + 1, total_bytes)
                .expect("ContentRange::bytes cannot panic in this usage")
        });
        let content_length = ContentLength(range.len());
        let stream = RangedStream::new(self.body, range.start, range.len(), self.config);

        RangedResponse {
            status: range.status(),
            content_range,
            content_length,
            content_type: self.content_type,
            stream,
        }
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for Ranged<B> {
    fn into_response(self) -> Response {
        self.respond().into_response()
    }
}

/// Computed headers and body for a range response. Implements [`IntoResponse`].
pub struct RangedResponse<B> {
    pub status: StatusCode,
    /// Present only for partial (206) responses.
    pub content_range: Option<ContentRange>,
    /// The resolved window length when partial, the total size otherwise.
    pub content_length: ContentLength,
    pub content_type: Option<String>,
    pub stream: RangedStream<B>,
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedResponse<B> {
    fn into_response(self) -> Response {
        let content_type = self
            .content_type
            .as_deref()
            .and_then(|value| HeaderValue::from_str(value).ok())
            .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

        let content_range = self.content_range.map(TypedHeader);
        let content_length = TypedHeader(self.content_length);
        let accept_ranges = TypedHeader(AcceptRanges::bytes());

        (
            self.status,
            [(header::CONTENT_TYPE, content_type)],
            accept_ranges,
            content_range,
            content_length,
            self.stream,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use axum_extra::headers::{ContentLength, ContentRange};
    use bytes::Bytes;
    use futures::{pin_mut, Stream, StreamExt};

    use super::{Ranged, SizedBody, StreamConfig};

    const FIXTURE: &[u8] = b"Hello world this is a file to test range requests on!\n";

    fn body() -> SizedBody<Cursor<&'static [u8]>> {
        SizedBody::new(Cursor::new(FIXTURE), FIXTURE.len() as u64)
    }

    fn header(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    async fn collect_stream(stream: impl Stream<Item = std::io::Result<Bytes>>) -> Vec<u8> {
        let mut out = Vec::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await.transpose().unwrap() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_full_response() {
        let response = Ranged::new(None, body()).respond();

        assert_eq!(StatusCode::OK, response.status);
        assert_eq!(None, response.content_range);
        assert_eq!(ContentLength(54), response.content_length);
        assert_eq!(FIXTURE, collect_stream(response.stream).await);
    }

    #[tokio::test]
    async fn test_partial_response() {
        let response = Ranged::new(header("bytes=0-29"), body()).respond();

        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status);
        assert_eq!(Some(ContentRange::bytes(0..30, 54).unwrap()), response.content_range);
        assert_eq!(ContentLength(30), response.content_length);
        assert_eq!(&FIXTURE[..30], collect_stream(response.stream).await);
    }

    #[tokio::test]
    async fn test_range_reaching_last_byte_falls_back_to_ok() {
        // a window whose end lands on the final byte is served as 200, not 206
        let response = Ranged::new(header("bytes=30-53"), body()).respond();

        assert_eq!(StatusCode::OK, response.status);
        assert_eq!(None, response.content_range);
        assert_eq!(ContentLength(24), response.content_length);
        assert_eq!(&FIXTURE[30..], collect_stream(response.stream).await);
    }

    #[tokio::test]
    async fn test_range_end_exceeding_length_is_capped() {
        let response = Ranged::new(header("bytes=30-99"), body()).respond();

        assert_eq!(StatusCode::OK, response.status);
        assert_eq!(ContentLength(24), response.content_length);
        assert_eq!(&FIXTURE[30..], collect_stream(response.stream).await);
    }

    #[tokio::test]
    async fn test_open_ended_range_is_chunk_limited() {
        let config = StreamConfig::new().chunk_size(16);
        let response = Ranged::new(header("bytes=0-"), body()).config(config).respond();

        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status);
        assert_eq!(Some(ContentRange::bytes(0..16, 54).unwrap()), response.content_range);
        assert_eq!(ContentLength(16), response.content_length);
        assert_eq!(&FIXTURE[..16], collect_stream(response.stream).await);
    }

    #[tokio::test]
    async fn test_range_start_beyond_size_sends_nothing() {
        let response = Ranged::new(header("bytes=99-"), body()).respond();

        assert_eq!(StatusCode::OK, response.status);
        assert_eq!(None, response.content_range);
        assert_eq!(ContentLength(0), response.content_length);
        assert!(collect_stream(response.stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_body() {
        let empty = SizedBody::new(Cursor::new(&b""[..]), 0);
        let response = Ranged::new(header("bytes=0-10"), empty).respond();

        assert_eq!(StatusCode::OK, response.status);
        assert_eq!(ContentLength(0), response.content_length);
        assert!(collect_stream(response.stream).await.is_empty());
    }

    #[tokio::test]
    async fn test_into_response_headers() {
        let response = Ranged::new(header("bytes=0-9"), body()).into_response();

        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        let head = response.headers();
        assert_eq!(Some(&HeaderValue::from_static("bytes")), head.get("Accept-Ranges"));
        assert_eq!(Some(&HeaderValue::from_static("bytes 0-9/54")), head.get("Content-Range"));
        assert_eq!(Some(&HeaderValue::from_static("10")), head.get("Content-Length"));
        assert_eq!(
            Some(&HeaderValue::from_static("application/octet-stream")),
            head.get("Content-Type"),
        );
    }

    #[tokio::test]
    async fn test_content_type_override() {
        let response = Ranged::new(None, body())
            .content_type("text/plain")
            .into_response();

        let head = response.headers();
        assert_eq!(Some(&HeaderValue::from_static("text/plain")), head.get("Content-Type"));
    }
}
