//! ZIP archive reading.
//!
//! - [`structures`]: fixed records of the format (EOCD, ZIP64 records,
//!   entry metadata) and timestamp conversions
//! - [`parser`]: locating and decoding the central directory over [`ReadAt`]
//! - [`archive`]: the opened, immutable [`ZipArchive`] with lookup by name and
//!   the directory tree implied by entry names
//! - [`reader`]: raw and decompressing entry streams
//!
//! Only STORED and DEFLATE entries can be decompressed. Raw access works for
//! any method. Encrypted and split archives are not supported.
//!
//! [`ReadAt`]: crate::io::ReadAt

mod archive;
mod parser;
mod reader;
mod structures;

pub use archive::{DirNode, Node, ZipArchive, is_valid_path};
pub use parser::ZipParser;
pub use reader::{EntryReader, RawEntryReader};
pub use structures::*;
