//! Static file serving over any [`FileSystem`].
//!
//! Serves decompressed archive content with the usual static-server
//! behaviour: directory index pages and listings, canonicalizing redirects,
//! `If-Modified-Since` / `If-Unmodified-Since`, and single byte ranges.

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, ALLOW, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE, LAST_MODIFIED, LOCATION, RANGE,
};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use std::fmt::Write as _;
use std::io::{self, SeekFrom};

use crate::content_type;
use crate::fs::{File, FileInfo, FileSystem};
use crate::sniff::{self, SNIFF_LEN};

use super::headers::{header_date, http_date_value, parse_http_date};
use super::range::{self, RangeError};

/// Default directory index document.
pub const INDEX_DOCUMENT: &str = "index.html";

/// Chunk size used when streaming file bodies.
const CHUNK_SIZE: usize = 32 * 1024;

/// Characters escaped in a single path segment of a link.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Serves files and directories of a [`FileSystem`] over HTTP.
pub struct FileServer<F> {
    fs: F,
    index: String,
}

impl<F: FileSystem> FileServer<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            index: INDEX_DOCUMENT.to_string(),
        }
    }

    /// Use `name` as the directory index document.
    pub fn with_index(mut self, name: impl Into<String>) -> Self {
        self.index = name.into();
        self
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    /// Produce the response for a request.
    pub async fn serve(&self, parts: &Parts) -> Response<Body> {
        if parts.method != Method::GET && parts.method != Method::HEAD {
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let Ok(decoded) = percent_decode_str(parts.uri.path()).decode_utf8() else {
            return text_response(StatusCode::BAD_REQUEST, "400 bad request");
        };
        let upath = match decoded.starts_with('/') {
            true => decoded.into_owned(),
            false => format!("/{decoded}"),
        };

        // Canonical URL of an index document is its directory
        if upath.ends_with(&format!("/{}", self.index)) {
            return redirect(parts, "./");
        }

        let name = fs_name(&clean_path(&upath));
        let file = match self.fs.open(&name).await {
            Ok(file) => file,
            Err(e) => return error_response(&name, &e),
        };

        let is_dir = file.info().is_dir;
        if is_dir && !upath.ends_with('/') {
            return redirect(parts, &format!("{}/", encode_segment(base_name(&upath))));
        }
        if !is_dir && upath.ends_with('/') {
            return redirect(parts, &format!("../{}", encode_segment(base_name(&upath))));
        }

        if !is_dir {
            return self.serve_content(parts, file).await;
        }

        let index_name = match name.as_str() {
            "." => self.index.clone(),
            _ => format!("{}/{}", name, self.index),
        };
        match self.fs.open(&index_name).await {
            Ok(index) if !index.info().is_dir => self.serve_content(parts, index).await,
            _ => serve_listing(parts, &file),
        }
    }

    async fn serve_content(&self, parts: &Parts, mut file: F::File) -> Response<Body> {
        let info = file.info().clone();

        if let Some(status) = check_preconditions(&parts.headers, &parts.method, info.modified) {
            let mut response = empty_response(status);
            set_last_modified(response.headers_mut(), info.modified);
            return response;
        }

        let content_type = match content_type::by_extension(&info.name) {
            Some(content_type) => content_type,
            None => match sniff_and_rewind(&mut file).await {
                Ok(content_type) => content_type.to_string(),
                Err(e) => {
                    tracing::warn!(name = %info.name, error = %e, "Cannot rewind after sniffing");
                    return text_response(StatusCode::INTERNAL_SERVER_ERROR, "seeker can't seek");
                }
            },
        };

        let size = info.size;
        let mut status = StatusCode::OK;
        let mut start = 0;
        let mut length = size;
        let mut content_range = None;

        if let Some(value) = range_header(&parts.headers, info.modified) {
            match range::parse(value, size) {
                Ok(ranges) if ranges.len() == 1 => {
                    let range = ranges[0];
                    status = StatusCode::PARTIAL_CONTENT;
                    start = range.start;
                    length = range.length;
                    content_range = Some(range.content_range(size));
                }
                // Multipart responses are not produced; serve the whole file
                Ok(_) => {}
                Err(RangeError::Invalid | RangeError::NoOverlap) => {
                    let mut response = text_response(
                        StatusCode::RANGE_NOT_SATISFIABLE,
                        "416 requested range not satisfiable",
                    );
                    if let Ok(value) = HeaderValue::try_from(format!("bytes */{size}")) {
                        response.headers_mut().insert(CONTENT_RANGE, value);
                    }
                    return response;
                }
            }
        }

        if start > 0
            && let Err(e) = position(&mut file, start).await
        {
            tracing::warn!(name = %info.name, error = %e, "Cannot position file for range");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "500 internal server error");
        }

        let body = match parts.method {
            Method::HEAD => Body::empty(),
            _ => file_body(file, length),
        };
        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::try_from(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        set_last_modified(headers, info.modified);
        if let Some(value) = content_range.and_then(|v| HeaderValue::try_from(v).ok()) {
            headers.insert(CONTENT_RANGE, value);
        }
        response
    }
}

/// `Range` header to honour, or `None` when absent or defeated by `If-Range`.
fn range_header(headers: &HeaderMap, modified: DateTime<Utc>) -> Option<&str> {
    let range = headers.get(RANGE)?.to_str().ok()?;
    match headers.get(IF_RANGE).map(|v| v.to_str()) {
        None => Some(range),
        Some(Ok(value)) => {
            // Entity tags never match: no ETags are generated
            let date = parse_http_date(value)?;
            (!is_unset(modified) && date.timestamp() == modified.timestamp()).then_some(range)
        }
        Some(Err(_)) => None,
    }
}

/// Evaluate `If-Unmodified-Since` and `If-Modified-Since`.
fn check_preconditions(
    headers: &HeaderMap,
    method: &Method,
    modified: DateTime<Utc>,
) -> Option<StatusCode> {
    if is_unset(modified) {
        return None;
    }
    if let Some(since) = header_date(headers, IF_UNMODIFIED_SINCE)
        && modified.timestamp() > since.timestamp()
    {
        return Some(StatusCode::PRECONDITION_FAILED);
    }
    let safe = method == Method::GET || method == Method::HEAD;
    if safe
        && !headers.contains_key(IF_NONE_MATCH)
        && let Some(since) = header_date(headers, IF_MODIFIED_SINCE)
        && modified.timestamp() <= since.timestamp()
    {
        return Some(StatusCode::NOT_MODIFIED);
    }
    None
}

/// Read up to [`SNIFF_LEN`] bytes, detect their type, then rewind.
async fn sniff_and_rewind<T: File>(file: &mut T) -> io::Result<&'static str> {
    let mut prefix = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < prefix.len() {
        match file.read(&mut prefix[filled..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    let detected = sniff::detect(&prefix[..filled]);
    file.seek(SeekFrom::Start(0)).await?;
    Ok(detected)
}

/// Move to `offset`, reading and discarding when the file cannot seek.
async fn position<T: File>(file: &mut T, offset: u64) -> io::Result<()> {
    match file.seek(SeekFrom::Start(offset)).await {
        Ok(_) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::Unsupported => {}
        Err(e) => return Err(e),
    }
    let mut scratch = vec![0u8; CHUNK_SIZE];
    let mut remaining = offset;
    while remaining > 0 {
        let want = remaining.min(scratch.len() as u64) as usize;
        match file.read(&mut scratch[..want]).await? {
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => remaining -= n as u64,
        }
    }
    Ok(())
}

/// Stream exactly `length` bytes of `file`.
fn file_body<T: File + 'static>(file: T, length: u64) -> Body {
    let stream = futures::stream::try_unfold(
        (file, length, vec![0u8; CHUNK_SIZE]),
        |(mut file, remaining, mut buf)| async move {
            if remaining == 0 {
                return Ok(None);
            }
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file ended before its declared size",
                ));
            }
            let chunk = Bytes::copy_from_slice(&buf[..n]);
            Ok::<_, io::Error>(Some((chunk, (file, remaining - n as u64, buf))))
        },
    );
    Body::from_stream(stream)
}

fn serve_listing<T: File>(parts: &Parts, dir: &T) -> Response<Body> {
    let modified = dir.info().modified;
    if let Some(status) = check_preconditions(&parts.headers, &parts.method, modified) {
        return empty_response(status);
    }

    let mut entries = match dir.read_dir() {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(name = %dir.info().name, error = %e, "Cannot list directory");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Error reading directory");
        }
    };
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let html = listing_html(&entries);

    let length = html.len() as u64;
    let body = match parts.method {
        Method::HEAD => Body::empty(),
        _ => Body::from(html),
    };
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    set_last_modified(headers, modified);
    response
}

fn listing_html(entries: &[FileInfo]) -> String {
    let mut html = String::from(
        "<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n",
    );
    for entry in entries {
        let mut name = entry.name.clone();
        if entry.is_dir {
            name.push('/');
        }
        let mut href = utf8_percent_encode(&entry.name, SEGMENT).to_string();
        if entry.is_dir {
            href.push('/');
        }
        // A colon in the first segment would read as a URL scheme
        if entry.name.contains(':') {
            href.insert_str(0, "./");
        }
        let _ = writeln!(html, "<a href=\"{}\">{}</a>", escape_html(&href), escape_html(&name));
    }
    html.push_str("</pre>\n");
    html
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolve `.` and `..` elements and duplicate slashes of an absolute path.
fn clean_path(path: &str) -> String {
    let mut elems: Vec<&str> = Vec::new();
    for elem in path.split('/') {
        match elem {
            "" | "." => {}
            ".." => {
                elems.pop();
            }
            _ => elems.push(elem),
        }
    }
    format!("/{}", elems.join("/"))
}

/// Filesystem name for a clean absolute path.
fn fs_name(clean: &str) -> String {
    match clean.trim_start_matches('/') {
        "" => ".".to_string(),
        name => name.to_string(),
    }
}

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

fn is_unset(time: DateTime<Utc>) -> bool {
    time.timestamp() == 0
}

fn set_last_modified(headers: &mut HeaderMap, modified: DateTime<Utc>) {
    if is_unset(modified) {
        return;
    }
    if let Some(value) = http_date_value(modified) {
        headers.insert(LAST_MODIFIED, value);
    }
}

fn redirect(parts: &Parts, location: &str) -> Response<Body> {
    let location = match parts.uri.query() {
        Some(query) => format!("{location}?{query}"),
        None => location.to_string(),
    };
    let mut response = empty_response(StatusCode::MOVED_PERMANENTLY);
    match HeaderValue::try_from(location) {
        Ok(value) => {
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(_) => text_response(StatusCode::BAD_REQUEST, "400 bad request"),
    }
}

fn error_response(name: &str, error: &io::Error) -> Response<Body> {
    match error.kind() {
        io::ErrorKind::NotFound => text_response(StatusCode::NOT_FOUND, "404 page not found"),
        io::ErrorKind::PermissionDenied => text_response(StatusCode::FORBIDDEN, "403 Forbidden"),
        _ => {
            tracing::warn!(name, %error, "Cannot open file");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error",
            )
        }
    }
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Plain-text error page.
pub(crate) fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(format!("{message}\n")));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serve::http_date;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("/a/./b//c/"), "/a/b/c");
        assert_eq!(clean_path("/../a/../../b"), "/b");
    }

    #[test]
    fn test_fs_name_and_base() {
        assert_eq!(fs_name("/"), ".");
        assert_eq!(fs_name("/docs/a.txt"), "docs/a.txt");
        assert_eq!(base_name("/docs/guide/"), "guide");
        assert_eq!(base_name("/a.txt"), "a.txt");
    }

    #[test]
    fn test_listing_escapes_names() {
        let entries = [
            FileInfo {
                name: "a&b <c>.txt".to_string(),
                size: 1,
                modified: DateTime::UNIX_EPOCH,
                is_dir: false,
            },
            FileInfo {
                name: "sub".to_string(),
                size: 0,
                modified: DateTime::UNIX_EPOCH,
                is_dir: true,
            },
            FileInfo {
                name: "c:d".to_string(),
                size: 0,
                modified: DateTime::UNIX_EPOCH,
                is_dir: false,
            },
        ];
        let html = listing_html(&entries);
        assert!(html.contains("<a href=\"a&amp;b%20%3Cc%3E.txt\">a&amp;b &lt;c&gt;.txt</a>"));
        assert!(html.contains("<a href=\"sub/\">sub/</a>"));
        assert!(html.contains("<a href=\"./c:d\">c:d</a>"));
        assert!(html.ends_with("</pre>\n"));
    }

    #[test]
    fn test_preconditions() {
        let modified = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let at = |secs: i64| {
            HeaderValue::try_from(http_date(DateTime::from_timestamp(secs, 0).unwrap())).unwrap()
        };

        let mut headers = HeaderMap::new();
        headers.insert(IF_MODIFIED_SINCE, at(1_700_000_000));
        assert_eq!(
            check_preconditions(&headers, &Method::GET, modified),
            Some(StatusCode::NOT_MODIFIED)
        );
        headers.insert(IF_MODIFIED_SINCE, at(1_600_000_000));
        assert_eq!(check_preconditions(&headers, &Method::GET, modified), None);

        let mut headers = HeaderMap::new();
        headers.insert(IF_UNMODIFIED_SINCE, at(1_600_000_000));
        assert_eq!(
            check_preconditions(&headers, &Method::GET, modified),
            Some(StatusCode::PRECONDITION_FAILED)
        );

        // Unknown modification time never satisfies a condition
        assert_eq!(
            check_preconditions(&headers, &Method::GET, DateTime::UNIX_EPOCH),
            None
        );
    }
}
