//! Shared helpers for handler integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use flate2::read::DeflateDecoder;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use zipserve::{MemoryReader, ServeOptions, ZipArchive, ZipServer};

pub const LICENSE: &[u8] = b"Permission is hereby granted, free of charge, to any person \
obtaining a copy of this software and associated documentation files (the \"Software\"), \
to deal in the Software without restriction, including without limitation the rights \
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the \
Software, and to permit persons to whom the Software is furnished to do so.\n";

/// Build an archive in memory. Names ending in `/` become directory entries.
pub fn build_zip(entries: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    let modified = zip::DateTime::from_date_and_time(2024, 5, 17, 10, 30, 0).unwrap();
    for &(name, content, method) in entries {
        let options = SimpleFileOptions::default()
            .compression_method(method)
            .last_modified_time(modified);
        if name.ends_with('/') {
            zw.add_directory(name, options).unwrap();
        } else {
            zw.start_file(name, options).unwrap();
            zw.write_all(content).unwrap();
        }
    }
    zw.finish().unwrap().into_inner()
}

pub async fn server(data: Vec<u8>) -> ZipServer<MemoryReader> {
    server_with(data, ServeOptions::default()).await
}

pub async fn server_with(data: Vec<u8>, options: ServeOptions) -> ZipServer<MemoryReader> {
    let archive = ZipArchive::new(Arc::new(MemoryReader::new(data)))
        .await
        .unwrap();
    ZipServer::with_options(Arc::new(archive), options)
}

/// The canonical test archive: a deflated license, an extensionless text
/// file, a small site and a stored image.
pub fn site_zip() -> Vec<u8> {
    build_zip(&[
        ("LICENSE.txt", LICENSE, CompressionMethod::Deflated),
        ("unknown", LICENSE, CompressionMethod::Deflated),
        ("index.html", b"<!doctype html><h1>home</h1>", CompressionMethod::Deflated),
        ("docs/", b"", CompressionMethod::Stored),
        ("docs/guide.txt", b"guide text", CompressionMethod::Deflated),
        ("docs/notes", b"notes without extension", CompressionMethod::Stored),
        ("img/logo.png", b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR", CompressionMethod::Stored),
    ])
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_deflate(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("accept-encoding", "gzip, deflate, br")
        .body(Body::empty())
        .unwrap()
}

pub async fn send(server: &ZipServer<MemoryReader>, request: Request<Body>) -> Response<Body> {
    server.clone().oneshot(request).await.unwrap()
}

pub async fn body(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .map(|value| value.to_str().unwrap())
}

pub fn inflate(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    DeflateDecoder::new(data).read_to_end(&mut out).unwrap();
    out
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
