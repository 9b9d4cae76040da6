use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, NaiveDate, Utc};
use std::io::Cursor;

use anyhow::{Result, bail};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

fn check_signature(data: &[u8], signature: &[u8], min_size: usize, what: &str) -> Result<()> {
    if data.len() < min_size || &data[0..4] != signature {
        bail!("Invalid {}", what);
    }
    Ok(())
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Parse an EOCD record from raw bytes.
    ///
    /// # Arguments
    ///
    /// * `data` - At least 22 bytes starting at the EOCD signature
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too short or the signature is wrong.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_signature(data, Self::SIGNATURE, Self::SIZE, "End of Central Directory")?;

        // Skip disk numbers, which only matter for split archives
        let mut cursor = Cursor::new(&data[8..]);

        Ok(Self {
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Check if any field is saturated, meaning the real value lives in the
    /// ZIP64 EOCD record.
    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub eocd64_offset: u64,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_signature(data, Self::SIGNATURE, Self::SIZE, "ZIP64 locator")?;
        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        check_signature(data, Self::SIGNATURE, Self::MIN_SIZE, "ZIP64 End of Central Directory")?;

        // Record size, versions, disk numbers and the per-disk count precede
        // the fields we need.
        let mut cursor = Cursor::new(&data[32..]);

        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Extra field holding 64-bit sizes and offsets
pub const EXTRA_ZIP64: u16 = 0x0001;
/// NTFS extra field (100ns ticks since 1601)
pub const EXTRA_NTFS: u16 = 0x000a;
/// Info-ZIP extended timestamp (Unix seconds)
pub const EXTRA_EXT_TIMESTAMP: u16 = 0x5455;

/// General purpose flag: entry data is encrypted
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub flags: u16,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    /// Modification time, always UTC
    pub modified: DateTime<Utc>,
    pub is_directory: bool,
}

impl ZipFileEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Convert MS-DOS date and time fields to a UTC timestamp.
///
/// DOS timestamps carry no zone; they are taken as UTC. Dates that do not
/// exist (month 0, Feb 30, ...) map to the Unix epoch.
pub fn dos_datetime(date: u16, time: u16) -> DateTime<Utc> {
    let day = u32::from(date & 0x1F);
    let month = u32::from((date >> 5) & 0x0F);
    let year = i32::from((date >> 9) & 0x7F) + 1980;
    let second = u32::from(time & 0x1F) * 2;
    let minute = u32::from((time >> 5) & 0x3F);
    let hour = u32::from((time >> 11) & 0x1F);

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Convert NTFS ticks (100ns intervals since 1601-01-01) to UTC.
pub fn ntfs_datetime(ticks: u64) -> Option<DateTime<Utc>> {
    const TICKS_PER_SECOND: u64 = 10_000_000;
    const EPOCH_DELTA_SECONDS: i64 = 11_644_473_600;

    let secs = (ticks / TICKS_PER_SECOND) as i64 - EPOCH_DELTA_SECONDS;
    let nanos = ((ticks % TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}
