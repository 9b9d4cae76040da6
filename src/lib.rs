//! # zipserve
//!
//! Serve the contents of a ZIP archive over HTTP without unpacking it.
//!
//! Entries stored with Deflate are sent to clients that accept the `deflate`
//! content coding exactly as they sit in the archive, with
//! `Content-Encoding: deflate`. Everything else (other methods, `HEAD`,
//! range requests, clients without `deflate`) is decompressed on the fly by
//! a conventional static file server.
//!
//! Archives are read through the [`ReadAt`] trait, so they can live in
//! memory, in a local file, or behind an HTTP server supporting Range
//! requests.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zipserve::{LocalFileReader, ZipArchive, ZipServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new("site.zip".as_ref())?);
//!     let archive = Arc::new(ZipArchive::new(reader).await?);
//!
//!     let app = ZipServer::new(archive).into_router();
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod content_type;
pub mod fs;
pub mod io;
pub mod pool;
pub mod serve;
pub mod sniff;
pub mod zip;

#[cfg(test)]
mod testutil;

pub use cli::Cli;
pub use io::{HttpRangeReader, LocalFileReader, MemoryReader, ReadAt};
pub use serve::{FileServer, ServeOptions, ZipServer};
pub use zip::{ZipArchive, ZipFileEntry};
