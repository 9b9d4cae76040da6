//! Content-Type resolution for archive entries.

use crate::io::ReadAt;
use crate::sniff::{self, SNIFF_LEN};
use crate::zip::ZipArchive;

/// Used when neither the name nor the content identifies a type.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extension of the last path element, including the dot.
///
/// `"a/b.tar.gz"` gives `".gz"`, `"a.d/readme"` gives `""`.
pub fn extension(path: &str) -> &str {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.rfind('.').map_or("", |i| &base[i..])
}

/// MIME type for a file name, judged by its extension alone.
///
/// `text/*` types carry an explicit `charset=utf-8`.
pub fn by_extension(path: &str) -> Option<String> {
    let ext = extension(path).strip_prefix('.')?;
    if ext.is_empty() {
        return None;
    }
    let mime = mime_guess::from_ext(ext).first_raw()?;
    if mime.starts_with("text/") && !mime.contains("charset") {
        Some(format!("{mime}; charset=utf-8"))
    } else {
        Some(mime.to_string())
    }
}

/// Content type of an archive entry.
///
/// The extension decides when it is known. Otherwise up to 512 bytes of the
/// decompressed content are sniffed from a freshly opened stream, so the
/// caller never needs to rewind anything.
pub async fn resolve<R: ReadAt>(archive: &ZipArchive<R>, index: usize) -> String {
    let Some(entry) = archive.entry(index) else {
        return DEFAULT_CONTENT_TYPE.to_string();
    };
    if let Some(mime) = by_extension(&entry.file_name) {
        return mime;
    }

    let mut reader = match archive.open(index).await {
        Ok(reader) => reader,
        Err(e) => {
            tracing::debug!(name = %entry.file_name, error = %e, "Cannot open entry for sniffing");
            return DEFAULT_CONTENT_TYPE.to_string();
        }
    };
    let mut prefix = [0u8; SNIFF_LEN];
    // A failing read still leaves whatever prefix was decoded to sniff
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    sniff::detect(&prefix[..filled]).to_string()
}
