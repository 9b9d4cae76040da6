//! Low-level ZIP archive parser.
//!
//! ZIP files are read from the end: the End of Central Directory (EOCD)
//! record points at the central directory, which lists every entry with the
//! offset of its local header. Entry data follows the local header, whose
//! variable-length fields may differ from the central directory copy, so the
//! data offset is only known after reading the local header itself.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser, generic over the data source.
///
/// Typically used through [`ZipArchive`](super::ZipArchive).
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - A shared reference to a reader implementing [`ReadAt`]
    ///
    /// # Returns
    ///
    /// A new parser instance ready to read the archive.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Returns the record and its offset. Archives without a comment are
    /// resolved with a single 22-byte read; otherwise the last 64 KiB are
    /// searched backwards for a signature whose comment length matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is shorter than an EOCD record or no
    /// signature with a consistent comment length is found.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            bail!("Not a valid ZIP file (only {} bytes)", self.size);
        }

        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset));
        }

        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;
        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
        }

        bail!("Not a valid ZIP file")
    }

    /// Read the ZIP64 End of Central Directory record, located through the
    /// locator that sits immediately before the regular EOCD.
    ///
    /// # Arguments
    ///
    /// * `eocd_offset` - Offset of the regular EOCD in the archive
    ///
    /// # Returns
    ///
    /// The parsed ZIP64 EOCD with 64-bit field values.
    ///
    /// # Errors
    ///
    /// Returns an error if the ZIP64 structures are missing or invalid.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .context("ZIP64 locator missing")?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;
        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// List all entries, in central directory order.
    ///
    /// # Returns
    ///
    /// One [`ZipFileEntry`] per central directory header, directories
    /// included.
    ///
    /// # Errors
    ///
    /// Returns an error if the central directory lies outside the archive,
    /// cannot hold the declared entry count, or contains a malformed header.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > self.size {
            bail!(
                "Central directory ({} bytes at {}) extends past end of archive",
                cd_size,
                cd_offset
            );
        }
        // Every header is at least 46 bytes; reject counts the directory cannot hold
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            bail!("Central directory too small for {} entries", total_entries);
        }

        // One read for the whole directory (one request for remote archives)
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());
        for i in 0..total_entries {
            let entry = parse_cdfh(&mut cursor)
                .with_context(|| format!("Central directory entry {i}"))?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Offset where an entry's (possibly compressed) data begins.
    ///
    /// The Local File Header repeats the name and carries its own extra
    /// field, whose length may differ from the central directory's, so it is
    /// read to find the data.
    ///
    /// # Arguments
    ///
    /// * `entry` - An entry returned by [`list_files()`](Self::list_files)
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be read or its signature is
    /// wrong.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut lfh_buf)
            .await?;
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            bail!("Invalid Local File Header for {}", entry.file_name);
        }

        let file_name_length = u16::from_le_bytes([lfh_buf[26], lfh_buf[27]]) as u64;
        let extra_field_length = u16::from_le_bytes([lfh_buf[28], lfh_buf[29]]) as u64;

        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Parse one Central Directory File Header at the cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        bail!("Invalid Central Directory File Header");
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let lfh_offset = cursor.read_u32::<LittleEndian>()?;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    let file_name = String::from_utf8_lossy(&file_name_bytes).into_owned();

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra)?;
    let extra = parse_extra(&extra, uncompressed_size, compressed_size, lfh_offset)?;

    cursor.set_position(cursor.position() + file_comment_length as u64);

    let is_directory = file_name.ends_with('/');
    Ok(ZipFileEntry {
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        flags,
        compressed_size: extra.compressed_size,
        uncompressed_size: extra.uncompressed_size,
        crc32,
        lfh_offset: extra.lfh_offset,
        modified: extra
            .modified
            .unwrap_or_else(|| dos_datetime(last_mod_date, last_mod_time)),
        is_directory,
    })
}

/// Values recovered from the extra field, with 32-bit header values as
/// defaults.
struct ExtraFields {
    uncompressed_size: u64,
    compressed_size: u64,
    lfh_offset: u64,
    modified: Option<DateTime<Utc>>,
}

fn parse_extra(data: &[u8], uncompressed: u32, compressed: u32, offset: u32) -> Result<ExtraFields> {
    let mut fields = ExtraFields {
        uncompressed_size: uncompressed as u64,
        compressed_size: compressed as u64,
        lfh_offset: offset as u64,
        modified: None,
    };

    let mut cursor = Cursor::new(data);
    while cursor.position() + 4 <= data.len() as u64 {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as usize;
        let start = cursor.position() as usize;
        let Some(field) = data.get(start..start + field_size) else {
            // Truncated field; keep what was parsed so far
            break;
        };
        cursor.set_position((start + field_size) as u64);

        match header_id {
            EXTRA_ZIP64 => {
                // Present only for header values saturated at 0xFFFFFFFF, in this order
                let mut field = Cursor::new(field);
                if uncompressed == u32::MAX {
                    fields.uncompressed_size = field
                        .read_u64::<LittleEndian>()
                        .context("Truncated ZIP64 extra field")?;
                }
                if compressed == u32::MAX {
                    fields.compressed_size = field
                        .read_u64::<LittleEndian>()
                        .context("Truncated ZIP64 extra field")?;
                }
                if offset == u32::MAX {
                    fields.lfh_offset = field
                        .read_u64::<LittleEndian>()
                        .context("Truncated ZIP64 extra field")?;
                }
            }
            EXTRA_NTFS => {
                if let Some(modified) = parse_ntfs(field) {
                    fields.modified = Some(modified);
                }
            }
            EXTRA_EXT_TIMESTAMP => {
                // flags byte, then mtime when bit 0 is set
                if field.len() >= 5 && field[0] & 1 != 0 {
                    let mtime = u32::from_le_bytes([field[1], field[2], field[3], field[4]]);
                    fields.modified = DateTime::from_timestamp(i64::from(mtime), 0);
                }
            }
            _ => {}
        }
    }

    Ok(fields)
}

/// NTFS extra field: 4 reserved bytes, then tagged attributes; tag 1 holds
/// mtime, atime and ctime as 64-bit tick counts.
fn parse_ntfs(field: &[u8]) -> Option<DateTime<Utc>> {
    let mut cursor = Cursor::new(field);
    cursor.set_position(4);
    while let (Ok(tag), Ok(size)) = (
        cursor.read_u16::<LittleEndian>(),
        cursor.read_u16::<LittleEndian>(),
    ) {
        if tag == 1 && size >= 24 {
            let mtime = cursor.read_u64::<LittleEndian>().ok()?;
            return ntfs_datetime(mtime);
        }
        cursor.set_position(cursor.position() + size as u64);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;

    fn extended_timestamp(mtime: u32) -> Vec<u8> {
        let mut extra = vec![];
        extra.extend_from_slice(&EXTRA_EXT_TIMESTAMP.to_le_bytes());
        extra.extend_from_slice(&5u16.to_le_bytes());
        extra.push(1);
        extra.extend_from_slice(&mtime.to_le_bytes());
        extra
    }

    #[test]
    fn test_extended_timestamp_wins_over_dos() {
        let extra = extended_timestamp(1_700_000_000);
        let fields = parse_extra(&extra, 10, 5, 0).unwrap();
        assert_eq!(fields.modified.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(fields.uncompressed_size, 10);
    }

    #[test]
    fn test_zip64_sizes_and_following_fields() {
        let mut extra = vec![];
        extra.extend_from_slice(&EXTRA_ZIP64.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&(5u64 << 32).to_le_bytes());
        extra.extend_from_slice(&(3u64 << 32).to_le_bytes());
        extra.extend_from_slice(&extended_timestamp(42));

        let fields = parse_extra(&extra, u32::MAX, u32::MAX, 7).unwrap();
        assert_eq!(fields.uncompressed_size, 5u64 << 32);
        assert_eq!(fields.compressed_size, 3u64 << 32);
        assert_eq!(fields.lfh_offset, 7);
        assert_eq!(fields.modified.unwrap().timestamp(), 42);
    }

    #[test]
    fn test_truncated_extra_is_ignored() {
        let extra = [0x55, 0x54, 0x20, 0x00, 1, 2];
        let fields = parse_extra(&extra, 1, 1, 1).unwrap();
        assert!(fields.modified.is_none());
    }

    #[tokio::test]
    async fn test_not_a_zip() {
        let parser = ZipParser::new(Arc::new(MemoryReader::new(vec![0u8; 100])));
        assert!(parser.list_files().await.is_err());

        let parser = ZipParser::new(Arc::new(MemoryReader::new(vec![0u8; 4])));
        assert!(parser.find_eocd().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_archive_with_comment() {
        let mut data = vec![0u8; EndOfCentralDirectory::SIZE];
        data[..4].copy_from_slice(EndOfCentralDirectory::SIGNATURE);
        data[20..22].copy_from_slice(&7u16.to_le_bytes());
        data.extend_from_slice(b"comment");

        let parser = ZipParser::new(Arc::new(MemoryReader::new(data)));
        let (eocd, offset) = parser.find_eocd().await.unwrap();
        assert_eq!(offset, 0);
        assert_eq!(eocd.comment_len, 7);
        assert!(parser.list_files().await.unwrap().is_empty());
    }
}
