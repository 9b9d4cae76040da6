//! Archive builders shared by unit tests.

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub struct TestEntry<'a> {
    pub name: &'a str,
    pub content: &'a [u8],
    pub method: CompressionMethod,
}

pub fn deflated<'a>(name: &'a str, content: &'a [u8]) -> TestEntry<'a> {
    TestEntry {
        name,
        content,
        method: CompressionMethod::Deflated,
    }
}

pub fn stored<'a>(name: &'a str, content: &'a [u8]) -> TestEntry<'a> {
    TestEntry {
        name,
        content,
        method: CompressionMethod::Stored,
    }
}

/// Build an archive in memory. Names ending in `/` become directory entries.
pub fn build_zip(entries: &[TestEntry<'_>]) -> Vec<u8> {
    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    let modified = zip::DateTime::from_date_and_time(2024, 5, 17, 10, 30, 0).unwrap();
    for entry in entries {
        let options = SimpleFileOptions::default()
            .compression_method(entry.method)
            .last_modified_time(modified);
        if entry.name.ends_with('/') {
            zw.add_directory(entry.name, options).unwrap();
        } else {
            zw.start_file(entry.name, options).unwrap();
            zw.write_all(entry.content).unwrap();
        }
    }
    zw.finish().unwrap().into_inner()
}

/// Replace every occurrence of `from` with the same-length `to`.
///
/// Used to forge duplicate names and corrupt payloads, which well-behaved
/// writers refuse to produce.
pub fn rename_all(mut data: Vec<u8>, from: &[u8], to: &[u8]) -> Vec<u8> {
    assert_eq!(from.len(), to.len());
    let mut i = 0;
    while i + from.len() <= data.len() {
        if &data[i..i + from.len()] == from {
            data[i..i + from.len()].copy_from_slice(to);
            i += from.len();
        } else {
            i += 1;
        }
    }
    data
}

/// Set bits of the general purpose flag in the central directory header of
/// `name`.
pub fn set_cd_flags(mut data: Vec<u8>, name: &str, flags: u16) -> Vec<u8> {
    let mut i = 0;
    while i + 46 <= data.len() {
        if &data[i..i + 4] == b"PK\x01\x02" {
            let name_len = u16::from_le_bytes([data[i + 28], data[i + 29]]) as usize;
            if data.get(i + 46..i + 46 + name_len) == Some(name.as_bytes()) {
                let current = u16::from_le_bytes([data[i + 8], data[i + 9]]);
                data[i + 8..i + 10].copy_from_slice(&(current | flags).to_le_bytes());
                return data;
            }
        }
        i += 1;
    }
    panic!("no central directory header for {name}");
}
