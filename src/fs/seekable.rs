use async_trait::async_trait;
use std::io::{self, SeekFrom};

use super::{File, FileInfo, FileSystem, closed_error};

/// Wraps a filesystem whose files cannot seek, so that every opened file can
/// at least rewind to its start.
///
/// Content sniffing reads a small prefix and then seeks back to offset 0
/// before serving the whole file. Re-opening the file is equivalent to that
/// seek for a stream that always starts decoding from the beginning, and
/// avoids buffering the file.
#[derive(Clone)]
pub struct SeekableFs<F> {
    inner: F,
}

impl<F> SeekableFs<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: FileSystem + Clone + 'static> FileSystem for SeekableFs<F> {
    type File = SeekableFile<F>;

    async fn open(&self, name: &str) -> io::Result<SeekableFile<F>> {
        let file = self.inner.open(name).await?;
        Ok(SeekableFile {
            fs: self.inner.clone(),
            name: name.to_string(),
            info: file.info().clone(),
            file: Some(file),
        })
    }
}

/// A file that supports exactly one seek: `SeekFrom::Start(0)`.
///
/// Rewinding closes the wrapped file and opens `name` again. If that fails
/// the wrapper stays closed and every later read fails too.
pub struct SeekableFile<F: FileSystem> {
    fs: F,
    name: String,
    info: FileInfo,
    file: Option<F::File>,
}

#[async_trait]
impl<F: FileSystem + Clone + 'static> File for SeekableFile<F> {
    fn info(&self) -> &FileInfo {
        &self.info
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf).await,
            None => Err(closed_error()),
        }
    }

    async fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if pos != SeekFrom::Start(0) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{}: only seeking to the start is supported", self.name),
            ));
        }

        if let Some(mut file) = self.file.take() {
            file.close();
        }
        let file = self.fs.open(&self.name).await.inspect_err(|e| {
            tracing::debug!(name = %self.name, error = %e, "Re-opening for seek failed");
        })?;
        self.file = Some(file);
        Ok(0)
    }

    fn read_dir(&self) -> io::Result<Vec<FileInfo>> {
        self.file.as_ref().ok_or_else(closed_error)?.read_dir()
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            file.close();
        }
    }
}
