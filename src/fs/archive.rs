use async_trait::async_trait;
use chrono::DateTime;
use std::io;
use std::sync::Arc;

use crate::io::ReadAt;
use crate::zip::{EntryReader, Node, ZipArchive, is_valid_path};

use super::{File, FileInfo, FileSystem, closed_error};

/// Forward-only view of an archive; files decompress as they are read.
pub struct ArchiveFs<R: ReadAt> {
    archive: Arc<ZipArchive<R>>,
}

impl<R: ReadAt> ArchiveFs<R> {
    pub fn new(archive: Arc<ZipArchive<R>>) -> Self {
        Self { archive }
    }

    pub fn archive(&self) -> &Arc<ZipArchive<R>> {
        &self.archive
    }

    fn info(&self, path: &str, node: Node<'_>) -> FileInfo {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        match node {
            Node::File(index) => {
                let entry = &self.archive.entries()[index];
                FileInfo {
                    name,
                    size: entry.uncompressed_size,
                    modified: entry.modified,
                    is_dir: false,
                }
            }
            Node::Dir(dir) => FileInfo {
                name,
                size: 0,
                modified: dir.modified.unwrap_or(DateTime::UNIX_EPOCH),
                is_dir: true,
            },
        }
    }
}

impl<R: ReadAt> Clone for ArchiveFs<R> {
    fn clone(&self) -> Self {
        Self {
            archive: Arc::clone(&self.archive),
        }
    }
}

#[async_trait]
impl<R: ReadAt + 'static> FileSystem for ArchiveFs<R> {
    type File = ArchiveFile<R>;

    async fn open(&self, name: &str) -> io::Result<ArchiveFile<R>> {
        let node = is_valid_path(name)
            .then(|| self.archive.lookup(name))
            .flatten()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{name}: not found")))?;
        let info = self.info(name, node);

        let content = match node {
            Node::File(index) => {
                let reader = self.archive.open(index).await.map_err(io::Error::other)?;
                Content::Regular(Some(reader))
            }
            Node::Dir(dir) => {
                let entries = dir
                    .children
                    .iter()
                    .filter_map(|child| {
                        let path = match name {
                            "." => child.clone(),
                            _ => format!("{name}/{child}"),
                        };
                        self.archive.lookup(&path).map(|node| self.info(&path, node))
                    })
                    .collect();
                Content::Dir(entries)
            }
        };

        Ok(ArchiveFile { info, content })
    }
}

enum Content<R: ReadAt> {
    Regular(Option<EntryReader<R>>),
    Dir(Vec<FileInfo>),
}

/// A file or directory opened from an [`ArchiveFs`].
pub struct ArchiveFile<R: ReadAt> {
    info: FileInfo,
    content: Content<R>,
}

#[async_trait]
impl<R: ReadAt + 'static> File for ArchiveFile<R> {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.content {
            Content::Regular(Some(reader)) => reader.read(buf).await,
            Content::Regular(None) => Err(closed_error()),
            Content::Dir(_) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", self.info.name),
            )),
        }
    }

    fn read_dir(&self) -> io::Result<Vec<FileInfo>> {
        match &self.content {
            Content::Dir(entries) => Ok(entries.clone()),
            Content::Regular(_) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", self.info.name),
            )),
        }
    }

    fn close(&mut self) {
        if let Content::Regular(reader) = &mut self.content {
            reader.take();
        }
    }
}
