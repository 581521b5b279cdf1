use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_DISPOSITION};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{ETag, Expires, Header, LastModified};
use mime_guess::Mime;
use pin_project::pin_project;
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::debug;

use crate::{AsyncSeekStart, Error, RangeBody, Ranged, Result, StreamConfig};

/// MIME type for a path by extension, `application/octet-stream` when unknown.
pub fn detect_mime_type(path: impl AsRef<Path>) -> Mime {
    mime_guess::from_path(path).first_or_octet_stream()
}

/// Read-only stat snapshot, taken once per request.
///
/// The snapshot is fixed for the lifetime of the response. If the underlying
/// file changes mid-stream the transfer may be truncated at EOF, but it never
/// fails because of the change.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub etag: String,
    pub mime: Mime,
}

impl FileMeta {
    pub async fn stat(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.clone()),
            _ => Error::Io(e),
        })?;
        Ok(Self::of(path, &meta))
    }

    fn of(path: PathBuf, meta: &std::fs::Metadata) -> Self {
        let size = meta.len();
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let etag = make_etag(meta, size, modified);
        let mime = detect_mime_type(&path);
        FileMeta { path, size, modified, etag, mime }
    }
}

// weak fingerprint over the stat triple (mtime, inode, size)
fn make_etag(meta: &std::fs::Metadata, size: u64, modified: SystemTime) -> String {
    let mtime = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    #[cfg(unix)]
    let inode = std::os::unix::fs::MetadataExt::ino(meta);
    #[cfg(not(unix))]
    let inode = {
        let _ = meta;
        0u64
    };

    format!("\"{mtime:x}-{inode:x}-{size:x}\"")
}

/// Pairs any [`AsyncRead`] + [`AsyncSeekStart`] with a fixed byte size,
/// implementing [`RangeBody`].
#[pin_project]
#[derive(Debug)]
pub struct SizedBody<B> {
    size: u64,
    #[pin]
    body: B,
}

impl<B: AsyncRead + AsyncSeekStart> SizedBody<B> {
    pub fn new(body: B, size: u64) -> Self {
        SizedBody { size, body }
    }
}

impl SizedBody<File> {
    /// Calls [`tokio::fs::File::metadata`] to determine the size.
    pub async fn file(file: File) -> io::Result<Self> {
        let size = file.metadata().await?.len();
        Ok(SizedBody { size, body: file })
    }
}

impl<B: AsyncRead + AsyncSeekStart> AsyncRead for SizedBody<B> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().body.poll_read(cx, buf)
    }
}

impl<B: AsyncRead + AsyncSeekStart> AsyncSeekStart for SizedBody<B> {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        self.project().body.start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().body.poll_complete(cx)
    }
}

impl<B: AsyncRead + AsyncSeekStart> RangeBody for SizedBody<B> {
    fn byte_size(&self) -> u64 {
        self.size
    }
}

/// Path-based responder: a stat snapshot plus validation and download headers
/// on top of [`Ranged`]. Implements [`IntoResponse`].
#[derive(Debug)]
pub struct RangedFile {
    file: File,
    meta: FileMeta,
    range: Option<String>,
    config: StreamConfig,
    attachment_name: Option<String>,
    cache_ttl: Option<Duration>,
}

impl RangedFile {
    /// Opens the file and takes the metadata snapshot.
    ///
    /// Fails before any header is written, so the caller can still produce a
    /// clean error response.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        // snapshot the opened handle, not the path: the path may name a
        // different file by the time it is statted again
        let stat = file.metadata().await?;
        let meta = FileMeta::of(path.to_path_buf(), &stat);
        debug!(path = %meta.path.display(), size = meta.size, "serving file");

        Ok(RangedFile {
            file,
            meta,
            range: None,
            config: StreamConfig::default(),
            attachment_name: None,
            cache_ttl: None,
        })
    }

    /// The raw `Range` header value from the request, if any.
    pub fn range_header(mut self, range: Option<String>) -> Self {
        self.range = range;
        self
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Serve as a download with this display name.
    pub fn attachment(mut self, name: impl Into<String>) -> Self {
        self.attachment_name = Some(name.into());
        self
    }

    /// Adds an `Expires` header this far in the future.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }
}

impl IntoResponse for RangedFile {
    fn into_response(self) -> Response {
        let RangedFile { file, meta, range, config, attachment_name, cache_ttl } = self;

        let body = SizedBody::new(file, meta.size);
        let mut response = Ranged::new(range, body)
            .content_type(meta.mime.to_string())
            .config(config)
            .respond()
            .into_response();

        let headers = response.headers_mut();
        headers.insert(
            HeaderName::from_static("content-transfer-encoding"),
            HeaderValue::from_static("binary"),
        );
        if let Some(name) = attachment_name {
            let disposition = format!("attachment; filename=\"{name}\"");
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(CONTENT_DISPOSITION, value);
            }
        }
        insert_typed(headers, LastModified::from(meta.modified));
        if let Ok(etag) = meta.etag.parse::<ETag>() {
            insert_typed(headers, etag);
        }
        if let Some(ttl) = cache_ttl {
            insert_typed(headers, Expires::from(SystemTime::now() + ttl));
        }

        response
    }
}

fn insert_typed<H: Header>(headers: &mut HeaderMap, header: H) {
    let mut values = Vec::new();
    header.encode(&mut values);
    for value in values {
        headers.append(H::name(), value);
    }
}
