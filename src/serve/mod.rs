//! HTTP handler serving an archive, compressed bytes first.
//!
//! [`ZipServer`] answers `GET` requests for Deflate entries by streaming the
//! entry's stored bytes verbatim with `Content-Encoding: deflate`, so the
//! server never inflates anything the client can inflate itself. Every other
//! request is handed to a [`FileServer`] over a decompressing view of the
//! same archive.

mod file_server;
mod headers;
pub mod range;

pub use file_server::{FileServer, INDEX_DOCUMENT};
pub use headers::{accepts_encoding, http_date, parse_http_date};

use axum::Router;
use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED, RANGE, VARY,
};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, Request, Response, StatusCode};
use bytes::Bytes;
use futures::future::BoxFuture;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tower_http::trace::TraceLayer;

use crate::content_type;
use crate::fs::{ArchiveFs, BufferedFs, SeekableFs};
use crate::io::ReadAt;
use crate::pool::{BufferPool, DEFAULT_BUFFER_SIZE, PooledBuffer};
use crate::zip::{CompressionMethod, RawEntryReader, ZipArchive};

use headers::http_date_value;

/// Content coding served on the fast path.
pub const DEFLATE: &str = "deflate";

/// Idle buffers kept by the handler's pool.
const MAX_IDLE_BUFFERS: usize = 64;

/// Handler configuration.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Entry served for `/`, on both paths
    pub default_document: String,
    /// Serve every fallback request from fully buffered files
    pub buffer_fallback: bool,
    /// Size of the pooled buffers used to copy compressed bytes; 0 selects
    /// [`DEFAULT_BUFFER_SIZE`]
    pub buffer_size: usize,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            default_document: INDEX_DOCUMENT.to_string(),
            buffer_fallback: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Serves the contents of a ZIP archive over HTTP.
///
/// Cheap to clone; clones share the archive, the index and the buffer pool.
/// Implements [`tower::Service`] and never fails at the service level.
pub struct ZipServer<R: ReadAt> {
    inner: Arc<Inner<R>>,
}

struct Inner<R: ReadAt> {
    archive: Arc<ZipArchive<R>>,
    /// Entry name to index for every Deflate-compressed file, last wins
    deflated: HashMap<String, usize>,
    options: ServeOptions,
    pool: Arc<BufferPool>,
    plain: FileServer<ArchiveFs<R>>,
    seekable: FileServer<SeekableFs<ArchiveFs<R>>>,
    buffered: FileServer<BufferedFs<ArchiveFs<R>>>,
}

impl<R: ReadAt> Clone for ZipServer<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ReadAt + 'static> ZipServer<R> {
    /// Create a server with default [`ServeOptions`].
    ///
    /// # Arguments
    ///
    /// * `archive` - An opened archive, shared read-only with the server
    pub fn new(archive: Arc<ZipArchive<R>>) -> Self {
        Self::with_options(archive, ServeOptions::default())
    }

    /// Create a server for `archive`.
    ///
    /// Builds the index of entries eligible for the fast path. An archive
    /// without any leaves the fast path disabled for good.
    ///
    /// # Arguments
    ///
    /// * `archive` - An opened archive, shared read-only with the server
    /// * `options` - Default document, fallback mode and copy buffer size
    ///
    /// # Returns
    ///
    /// A server ready to be used as a [`tower::Service`] or through
    /// [`into_router()`](Self::into_router).
    pub fn with_options(archive: Arc<ZipArchive<R>>, mut options: ServeOptions) -> Self {
        if options.buffer_size == 0 {
            options.buffer_size = DEFAULT_BUFFER_SIZE;
        }

        let deflated = deflated_index(&archive);
        if deflated.is_empty() {
            tracing::info!("Archive has no deflated entries, serving everything decompressed");
        } else {
            tracing::debug!(entries = deflated.len(), "Indexed deflated entries");
        }

        let fs = ArchiveFs::new(Arc::clone(&archive));
        let index = options.default_document.clone();
        let inner = Inner {
            deflated,
            pool: Arc::new(BufferPool::new(options.buffer_size, MAX_IDLE_BUFFERS)),
            plain: FileServer::new(fs.clone()).with_index(index.clone()),
            seekable: FileServer::new(SeekableFs::new(fs.clone())).with_index(index.clone()),
            buffered: FileServer::new(BufferedFs::new(fs)).with_index(index),
            archive,
            options,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn archive(&self) -> &Arc<ZipArchive<R>> {
        &self.inner.archive
    }

    pub fn options(&self) -> &ServeOptions {
        &self.inner.options
    }

    /// Number of entries eligible for the fast path.
    pub fn deflated_entries(&self) -> usize {
        self.inner.deflated.len()
    }

    /// Buffers currently idle in the copy pool.
    pub fn idle_buffers(&self) -> usize {
        self.inner.pool.idle()
    }

    /// An axum router answering every path with this server, with request
    /// tracing.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback_service(self)
            .layer(TraceLayer::new_for_http())
    }

    /// Produce the response for a request.
    ///
    /// Tries the compressed fast path first and falls back to decompressed
    /// serving. Never fails: errors become HTTP statuses.
    ///
    /// # Arguments
    ///
    /// * `parts` - Method, URI and headers of the request; the body is unused
    ///
    /// # Returns
    ///
    /// The response, always carrying `Vary: Accept-Encoding` and
    /// `Accept-Ranges: none`.
    pub async fn handle(&self, parts: &Parts) -> Response<Body> {
        let mut response = match self.fast_path(parts).await {
            Some(response) => response,
            None => self.fallback(parts).await,
        };
        let headers = response.headers_mut();
        headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        response
    }

    /// Compressed response for the request, or `None` to fall back.
    async fn fast_path(&self, parts: &Parts) -> Option<Response<Body>> {
        let inner = &self.inner;
        if inner.deflated.is_empty()
            || parts.method != Method::GET
            || parts.headers.contains_key(RANGE)
            || !accepts_encoding(&parts.headers, DEFLATE)
        {
            return None;
        }

        let key = self.lookup_key(parts)?;
        let Some(&index) = inner.deflated.get(&key) else {
            tracing::debug!(key, "No deflated entry, falling back");
            return None;
        };
        let entry = inner.archive.entry(index)?;

        let raw = match inner.archive.open_raw(index).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(name = %entry.file_name, error = %e, "Cannot open raw entry, falling back");
                return None;
            }
        };
        let content_type = content_type::resolve(&inner.archive, index).await;

        let mut response = Response::new(raw_body(raw, inner.pool.get(), entry.file_name.clone()));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::try_from(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(entry.compressed_size));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(DEFLATE));
        if let Some(value) = http_date_value(entry.modified) {
            headers.insert(LAST_MODIFIED, value);
        }
        Some(response)
    }

    /// Entry name for a request path: percent-decoded, one leading slash
    /// removed, empty meaning the default document.
    fn lookup_key(&self, parts: &Parts) -> Option<String> {
        let decoded = percent_decode_str(parts.uri.path()).decode_utf8().ok()?;
        let key = decoded.strip_prefix('/').unwrap_or(&decoded);
        Some(match key {
            "" => self.inner.options.default_document.clone(),
            key => key.to_string(),
        })
    }

    async fn fallback(&self, parts: &Parts) -> Response<Body> {
        let inner = &self.inner;
        if inner.options.buffer_fallback {
            return inner.buffered.serve(parts).await;
        }
        let path = percent_decode_str(parts.uri.path()).decode_utf8_lossy();
        match content_type::by_extension(&path) {
            Some(_) => inner.plain.serve(parts).await,
            // Needs sniffing, which rewinds the file
            None => inner.seekable.serve(parts).await,
        }
    }
}

/// Name to index of every Deflate-compressed, unencrypted file. Later
/// duplicates replace earlier ones.
fn deflated_index<R: ReadAt>(archive: &ZipArchive<R>) -> HashMap<String, usize> {
    archive
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, entry)| {
            !entry.is_directory
                && !entry.is_encrypted()
                && entry.compression_method == CompressionMethod::Deflate
        })
        .map(|(index, entry)| (entry.file_name.clone(), index))
        .collect()
}

/// Stream the entry's stored bytes through a pooled buffer. The buffer goes
/// back to the pool when the stream ends, fails or is dropped.
fn raw_body<R: ReadAt + 'static>(raw: RawEntryReader<R>, buf: PooledBuffer, name: String) -> Body {
    let stream = futures::stream::try_unfold(
        (raw, buf, name),
        |(mut raw, mut buf, name)| async move {
            match raw.read(&mut buf).await {
                Ok(0) => Ok(None),
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    Ok(Some((chunk, (raw, buf, name))))
                }
                Err(e) => {
                    tracing::error!(name, error = %e, "Compressed stream failed");
                    Err::<_, io::Error>(e)
                }
            }
        },
    );
    Body::from_stream(stream)
}

impl<R, B> Service<Request<B>> for ZipServer<R>
where
    R: ReadAt + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let server = self.clone();
        let (parts, _body) = request.into_parts();
        Box::pin(async move { Ok(server.handle(&parts).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::testutil::{build_zip, deflated, stored};

    async fn server(data: Vec<u8>) -> ZipServer<MemoryReader> {
        let archive = ZipArchive::new(Arc::new(MemoryReader::new(data)))
            .await
            .unwrap();
        ZipServer::new(Arc::new(archive))
    }

    fn parts(method: Method, uri: &str, accept: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(accept) = accept {
            builder = builder.header("accept-encoding", accept);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_index_holds_only_deflated_files() {
        let data = build_zip(&[
            deflated("a.txt", b"a"),
            stored("b.txt", b"b"),
            deflated("dir/", b""),
            deflated("dir/c.txt", b"c"),
        ]);
        let server = server(data).await;
        assert_eq!(server.deflated_entries(), 2);
        assert!(server.inner.deflated.contains_key("a.txt"));
        assert!(server.inner.deflated.contains_key("dir/c.txt"));
    }

    #[tokio::test]
    async fn test_index_skips_encrypted_entries() {
        let data = build_zip(&[deflated("secret.txt", b"secret"), deflated("open.txt", b"open")]);
        let data = crate::testutil::set_cd_flags(data, "secret.txt", crate::zip::FLAG_ENCRYPTED);
        let server = server(data).await;
        assert_eq!(server.deflated_entries(), 1);
        assert!(!server.inner.deflated.contains_key("secret.txt"));
        assert!(
            server
                .fast_path(&parts(Method::GET, "/secret.txt", Some("deflate")))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_zero_buffer_size_uses_default() {
        let archive = ZipArchive::new(Arc::new(MemoryReader::new(build_zip(&[deflated(
            "a.txt",
            &b"zero ".repeat(50),
        )]))))
        .await
        .unwrap();
        let options = ServeOptions {
            buffer_size: 0,
            ..ServeOptions::default()
        };
        let server = ZipServer::with_options(Arc::new(archive), options);
        assert_eq!(server.options().buffer_size, DEFAULT_BUFFER_SIZE);

        let response = server
            .handle(&parts(Method::GET, "/a.txt", Some("deflate")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_key() {
        let server = server(build_zip(&[deflated("a b.txt", b"x")])).await;
        let key = |uri| server.lookup_key(&parts(Method::GET, uri, None));
        assert_eq!(key("/").as_deref(), Some("index.html"));
        assert_eq!(key("/a%20b.txt").as_deref(), Some("a b.txt"));
        assert_eq!(key("/%FF"), None);
    }

    #[tokio::test]
    async fn test_fast_path_eligibility() {
        let server = server(build_zip(&[deflated("a.txt", b"hello hello hello")])).await;

        let ok = parts(Method::GET, "/a.txt", Some("deflate"));
        assert!(server.fast_path(&ok).await.is_some());

        for ineligible in [
            parts(Method::HEAD, "/a.txt", Some("deflate")),
            parts(Method::GET, "/a.txt", Some("gzip")),
            parts(Method::GET, "/a.txt", None),
            parts(Method::GET, "/missing.txt", Some("deflate")),
        ] {
            assert!(server.fast_path(&ineligible).await.is_none());
        }

        let mut ranged = parts(Method::GET, "/a.txt", Some("deflate"));
        ranged
            .headers
            .insert(RANGE, HeaderValue::from_static("bytes=0-1"));
        assert!(server.fast_path(&ranged).await.is_none());
    }

    #[tokio::test]
    async fn test_buffer_returns_to_pool() {
        let server = server(build_zip(&[deflated("a.txt", &b"pooled ".repeat(100))])).await;
        assert_eq!(server.idle_buffers(), 0);

        let response = server
            .handle(&parts(Method::GET, "/a.txt", Some("deflate")))
            .await;
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(server.idle_buffers(), 1);

        // Dropping an unread body also returns the buffer
        let response = server
            .handle(&parts(Method::GET, "/a.txt", Some("deflate")))
            .await;
        assert_eq!(server.idle_buffers(), 0);
        drop(response);
        assert_eq!(server.idle_buffers(), 1);
    }
}
