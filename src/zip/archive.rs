use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::io::ReadAt;

use super::parser::ZipParser;
use super::reader::{EntryReader, RawEntryReader};
use super::structures::{CompressionMethod, ZipFileEntry};

/// A directory of the tree implied by entry names.
#[derive(Debug, Default)]
pub struct DirNode {
    /// Set when the archive has an explicit `name/` entry
    pub modified: Option<DateTime<Utc>>,
    /// Base names of files and subdirectories, sorted
    pub children: BTreeSet<String>,
}

/// Result of resolving a slash-separated path in an archive.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    File(usize),
    Dir(&'a DirNode),
}

/// An opened ZIP archive.
///
/// The central directory is read once, in [`ZipArchive::new`]; afterwards the
/// archive is immutable and every method takes `&self`, so one instance can
/// be shared across tasks behind an `Arc`.
///
/// Duplicate entry names are legal in ZIP files. Lookups by name always
/// resolve to the last entry carrying that name.
pub struct ZipArchive<R: ReadAt> {
    parser: ZipParser<R>,
    entries: Vec<ZipFileEntry>,
    /// Raw entry name to index, last wins
    names: HashMap<String, usize>,
    /// Valid file paths to index, last wins
    files: HashMap<String, usize>,
    /// Directory path (`.` for the root) to node
    dirs: BTreeMap<String, DirNode>,
}

impl<R: ReadAt> ZipArchive<R> {
    /// Read the central directory of `reader`.
    ///
    /// # Arguments
    ///
    /// * `reader` - A shared reference to a reader implementing [`ReadAt`]
    ///
    /// # Returns
    ///
    /// The opened archive, with every entry indexed by name and path.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is not a readable ZIP archive.
    pub async fn new(reader: Arc<R>) -> Result<Self> {
        let parser = ZipParser::new(reader);
        let entries = parser.list_files().await?;

        let mut names = HashMap::with_capacity(entries.len());
        let mut files = HashMap::with_capacity(entries.len());
        let mut dirs: BTreeMap<String, DirNode> = BTreeMap::new();
        dirs.insert(".".to_string(), DirNode::default());

        for (index, entry) in entries.iter().enumerate() {
            names.insert(entry.file_name.clone(), index);

            let path = entry
                .file_name
                .strip_suffix('/')
                .unwrap_or(&entry.file_name);
            if !is_valid_path(path) || path == "." {
                tracing::debug!(name = %entry.file_name, "Entry name is not a valid path, hidden from file tree");
                continue;
            }

            if entry.is_directory {
                dirs.entry(path.to_string()).or_default().modified = Some(entry.modified);
            } else {
                files.insert(path.to_string(), index);
            }

            let mut child = path;
            loop {
                let (parent, base) = child.rsplit_once('/').unwrap_or((".", child));
                dirs.entry(parent.to_string())
                    .or_default()
                    .children
                    .insert(base.to_string());
                if parent == "." {
                    break;
                }
                child = parent;
            }
        }

        tracing::debug!(
            entries = entries.len(),
            files = files.len(),
            dirs = dirs.len(),
            "Opened archive"
        );

        Ok(Self {
            parser,
            entries,
            names,
            files,
            dirs,
        })
    }

    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&ZipFileEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last entry named exactly `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Resolve a clean slash-separated path (`.` for the root).
    ///
    /// A name that is both a file and a directory resolves to the file.
    pub fn lookup(&self, path: &str) -> Option<Node<'_>> {
        if let Some(&index) = self.files.get(path) {
            return Some(Node::File(index));
        }
        self.dirs.get(path).map(Node::Dir)
    }

    /// Open the entry's stored bytes, without decompression.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the entry in [`entries()`](Self::entries)
    ///
    /// # Returns
    ///
    /// A reader yielding exactly `compressed_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range, the local header is
    /// invalid, or the data extends past the end of the archive.
    pub async fn open_raw(&self, index: usize) -> Result<RawEntryReader<R>> {
        let entry = self
            .entry(index)
            .with_context(|| format!("No entry at index {index}"))?;
        let data_offset = self.parser.get_data_offset(entry).await?;
        let in_bounds = data_offset
            .checked_add(entry.compressed_size)
            .is_some_and(|end| end <= self.parser.size());
        if !in_bounds {
            bail!("Data for {} extends past end of archive", entry.file_name);
        }
        Ok(RawEntryReader::new(
            Arc::clone(self.parser.reader()),
            data_offset,
            entry.compressed_size,
        ))
    }

    /// Open the entry's uncompressed content.
    ///
    /// # Errors
    ///
    /// Returns an error for encrypted entries and compression methods other
    /// than STORED and DEFLATE, and for everything [`open_raw`](Self::open_raw)
    /// rejects.
    pub async fn open(&self, index: usize) -> Result<EntryReader<R>> {
        let entry = self
            .entry(index)
            .with_context(|| format!("No entry at index {index}"))?;
        if entry.is_encrypted() {
            bail!("{} is encrypted", entry.file_name);
        }
        let deflate = match entry.compression_method {
            CompressionMethod::Stored => false,
            CompressionMethod::Deflate => true,
            CompressionMethod::Unknown(method) => {
                bail!(
                    "Unsupported compression method {} for {}",
                    method,
                    entry.file_name
                )
            }
        };
        let raw = self.open_raw(index).await?;
        Ok(EntryReader::new(raw, entry, deflate))
    }

    /// Open the last entry named exactly `name`.
    pub async fn open_by_name(&self, name: &str) -> Result<EntryReader<R>> {
        let index = self
            .index_of(name)
            .with_context(|| format!("{name} not found in archive"))?;
        self.open(index).await
    }
}

/// Whether `name` is a clean relative path: `.`, or non-empty elements
/// other than `.` and `..` separated by single slashes.
pub fn is_valid_path(name: &str) -> bool {
    name == "."
        || (!name.is_empty()
            && name
                .split('/')
                .all(|elem| !elem.is_empty() && elem != "." && elem != ".."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::testutil::{build_zip, deflated, stored};

    async fn archive(data: Vec<u8>) -> ZipArchive<MemoryReader> {
        ZipArchive::new(Arc::new(MemoryReader::new(data))).await.unwrap()
    }

    #[test]
    fn test_is_valid_path() {
        assert!(is_valid_path("."));
        assert!(is_valid_path("a/b.txt"));
        assert!(!is_valid_path(""));
        assert!(!is_valid_path("/a"));
        assert!(!is_valid_path("a//b"));
        assert!(!is_valid_path("a/../b"));
        assert!(!is_valid_path("./a"));
        assert!(!is_valid_path("a/"));
    }

    #[tokio::test]
    async fn test_open_decompresses_both_methods() {
        let data = build_zip(&[
            deflated("a.txt", b"deflated content deflated content"),
            stored("b.bin", b"\x00\x01stored"),
        ]);
        let zip = archive(data).await;
        assert_eq!(zip.len(), 2);

        let mut r = zip.open_by_name("a.txt").await.unwrap();
        assert_eq!(r.read_to_end().await.unwrap(), b"deflated content deflated content");
        let mut r = zip.open_by_name("b.bin").await.unwrap();
        assert_eq!(r.read_to_end().await.unwrap(), b"\x00\x01stored");
    }

    #[tokio::test]
    async fn test_open_raw_yields_compressed_size() {
        let content = b"abcabcabcabcabcabcabcabcabcabcabcabc".repeat(20);
        let zip = archive(build_zip(&[deflated("x", &content)])).await;
        let entry = zip.entry(0).unwrap().clone();
        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert!(entry.compressed_size < entry.uncompressed_size);

        let mut raw = zip.open_raw(0).await.unwrap();
        let mut total = 0u64;
        let mut buf = [0u8; 7];
        loop {
            let n = raw.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            total += n as u64;
        }
        assert_eq!(total, entry.compressed_size);
    }

    #[tokio::test]
    async fn test_directory_tree_is_synthesized() {
        let zip = archive(build_zip(&[
            stored("docs/guide/intro.md", b"# intro"),
            stored("docs/readme.txt", b"readme"),
            stored("top.txt", b"top"),
        ]))
        .await;

        let Some(Node::Dir(root)) = zip.lookup(".") else {
            panic!("root is not a directory");
        };
        let children: Vec<_> = root.children.iter().map(String::as_str).collect();
        assert_eq!(children, ["docs", "top.txt"]);

        let Some(Node::Dir(docs)) = zip.lookup("docs") else {
            panic!("docs is not a directory");
        };
        assert!(docs.modified.is_none());
        assert_eq!(docs.children.len(), 2);
        assert!(matches!(zip.lookup("docs/readme.txt"), Some(Node::File(1))));
        assert!(zip.lookup("docs/missing").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_names_last_wins() {
        let data = build_zip(&[stored("dup-1.txt", b"first"), stored("dup-2.txt", b"second")]);
        let data = crate::testutil::rename_all(data, b"dup-2.txt", b"dup-1.txt");
        let zip = archive(data).await;

        assert_eq!(zip.len(), 2);
        assert_eq!(zip.index_of("dup-1.txt"), Some(1));
        assert!(matches!(zip.lookup("dup-1.txt"), Some(Node::File(1))));
        let mut r = zip.open_by_name("dup-1.txt").await.unwrap();
        assert_eq!(r.read_to_end().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_corrupt_checksum_is_reported() {
        let data = build_zip(&[stored("c.txt", b"checksummed")]);
        let data = crate::testutil::rename_all(data, b"checksummed", b"CHECKSUMMED");
        let zip = archive(data).await;

        let mut r = zip.open(0).await.unwrap();
        let err = r.read_to_end().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_open_out_of_range_index() {
        let zip = archive(build_zip(&[stored("a", b"a")])).await;
        assert!(zip.open(5).await.is_err());
        assert!(zip.open_raw(5).await.is_err());
        assert!(zip.open_by_name("b").await.is_err());
    }
}
