//! `Range: bytes=...` parsing.

/// A satisfiable byte range, clamped to the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    /// `Content-Range` value for this range of a `size`-byte file.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.start + self.length - 1, size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Malformed header
    Invalid,
    /// Well-formed, but no range overlaps the file
    NoOverlap,
}

/// Parse a `Range` header against a file of `size` bytes.
///
/// Ranges starting at or past the end are dropped; if that leaves nothing
/// the header is unsatisfiable. Ends past the file are clamped.
pub fn parse(header: &str, size: u64) -> Result<Vec<ByteRange>, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Invalid)?;

    let mut ranges = Vec::new();
    let mut no_overlap = false;
    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (start, end) = item.split_once('-').ok_or(RangeError::Invalid)?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // Suffix range: the last `end` bytes
            let suffix = parse_number(end)?;
            if suffix == 0 || size == 0 {
                no_overlap = true;
                continue;
            }
            let suffix = suffix.min(size);
            ranges.push(ByteRange {
                start: size - suffix,
                length: suffix,
            });
            continue;
        }

        let first = parse_number(start)?;
        if first >= size {
            no_overlap = true;
            continue;
        }
        let last = if end.is_empty() {
            size - 1
        } else {
            let last = parse_number(end)?;
            if first > last {
                return Err(RangeError::Invalid);
            }
            last.min(size - 1)
        };
        ranges.push(ByteRange {
            start: first,
            length: last - first + 1,
        });
    }

    if ranges.is_empty() && no_overlap {
        return Err(RangeError::NoOverlap);
    }
    Ok(ranges)
}

fn parse_number(s: &str) -> Result<u64, RangeError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Invalid);
    }
    s.parse().map_err(|_| RangeError::Invalid)
}
