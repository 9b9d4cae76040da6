use flate2::{Decompress, FlushDecompress, Status};
use std::io;
use std::sync::Arc;

use crate::io::ReadAt;

use super::structures::ZipFileEntry;

/// Size of the compressed-input staging buffer of an [`EntryReader`].
const INFLATE_INPUT_SIZE: usize = 8 * 1024;

/// Forward-only stream over an entry's stored bytes, exactly
/// `compressed_size` long, without decompression.
pub struct RawEntryReader<R: ReadAt> {
    reader: Arc<R>,
    offset: u64,
    remaining: u64,
}

impl<R: ReadAt> RawEntryReader<R> {
    pub(crate) fn new(reader: Arc<R>, offset: u64, len: u64) -> Self {
        Self {
            reader,
            offset,
            remaining: len,
        }
    }

    /// Bytes left before the end of the entry data
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = (buf.len() as u64).min(self.remaining) as usize;
        if want == 0 {
            return Ok(0);
        }

        let n = self
            .reader
            .read_at(self.offset, &mut buf[..want])
            .await
            .map_err(io::Error::other)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended inside entry data",
            ));
        }

        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Raw deflate decoder fed from a [`RawEntryReader`].
struct Inflate {
    decompress: Decompress,
    input: Box<[u8]>,
    pos: usize,
    filled: usize,
    eof: bool,
}

impl Inflate {
    fn new() -> Self {
        Self {
            decompress: Decompress::new(false),
            input: vec![0u8; INFLATE_INPUT_SIZE].into_boxed_slice(),
            pos: 0,
            filled: 0,
            eof: false,
        }
    }

    async fn read<R: ReadAt>(
        &mut self,
        raw: &mut RawEntryReader<R>,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        loop {
            if self.pos == self.filled && !self.eof {
                self.filled = raw.read(&mut self.input).await?;
                self.pos = 0;
                self.eof = self.filled == 0;
            }

            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(&self.input[self.pos..self.filled], buf, FlushDecompress::None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let consumed = (self.decompress.total_in() - in_before) as usize;
            let written = (self.decompress.total_out() - out_before) as usize;
            self.pos += consumed;

            if written > 0 || status == Status::StreamEnd {
                return Ok(written);
            }
            if self.eof {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflate stream ended early",
                ));
            }
            if consumed == 0 && self.pos < self.filled {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "deflate stream made no progress",
                ));
            }
        }
    }
}

/// Forward-only stream over an entry's uncompressed content.
///
/// The uncompressed size and CRC-32 from the central directory are checked
/// when the stream ends; a mismatch surfaces as an error from the final
/// `read` instead of a clean end of stream.
pub struct EntryReader<R: ReadAt> {
    raw: RawEntryReader<R>,
    inflate: Option<Inflate>,
    hasher: crc32fast::Hasher,
    expected_crc: u32,
    expected_size: u64,
    produced: u64,
    finished: bool,
}

impl<R: ReadAt> EntryReader<R> {
    /// `raw` must come from the same entry. Deflate when `deflate` is set,
    /// stored otherwise.
    pub(crate) fn new(raw: RawEntryReader<R>, entry: &ZipFileEntry, deflate: bool) -> Self {
        Self {
            raw,
            inflate: deflate.then(Inflate::new),
            hasher: crc32fast::Hasher::new(),
            expected_crc: entry.crc32,
            expected_size: entry.uncompressed_size,
            produced: 0,
            finished: false,
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.finished {
            return Ok(0);
        }

        let n = match self.inflate.as_mut() {
            Some(inflate) => inflate.read(&mut self.raw, buf).await?,
            None => self.raw.read(buf).await?,
        };
        if n == 0 {
            self.verify()?;
            self.finished = true;
            return Ok(0);
        }

        self.produced += n as u64;
        if self.produced > self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "entry is larger than its declared size",
            ));
        }
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    /// Read until `buf` is full or the entry ends.
    pub async fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]).await? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Read the rest of the entry into memory.
    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let hint = self.expected_size.saturating_sub(self.produced).min(1 << 20);
        let mut out = Vec::with_capacity(hint as usize);
        let mut chunk = vec![0u8; INFLATE_INPUT_SIZE];
        loop {
            match self.read(&mut chunk).await? {
                0 => return Ok(out),
                n => out.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn verify(&self) -> io::Result<()> {
        if self.produced != self.expected_size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "entry ended after {} of {} bytes",
                    self.produced, self.expected_size
                ),
            ));
        }
        let crc = self.hasher.clone().finalize();
        if self.expected_crc != 0 && crc != self.expected_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "checksum mismatch: {:08x} != {:08x}",
                    crc, self.expected_crc
                ),
            ));
        }
        Ok(())
    }
}
