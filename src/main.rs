//! Main entry point for the zipserve binary.
//!
//! Opens a local or remote ZIP archive and serves it over HTTP until
//! interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

use zipserve::{Cli, HttpRangeReader, LocalFileReader, ReadAt, ServeOptions, ZipArchive, ZipServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.is_http_url() {
        // Remote archive, read through HTTP Range requests
        let reader = Arc::new(HttpRangeReader::new(cli.archive.clone()).await?);
        serve(Arc::clone(&reader), &cli).await?;
        tracing::info!(
            "Total bytes transferred from {}: {}",
            cli.archive,
            format_size(reader.transferred_bytes())
        );
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.archive))?);
        serve(reader, &cli).await?;
    }

    Ok(())
}

/// Open the archive behind `reader` and serve it until Ctrl-C.
async fn serve<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let archive = ZipArchive::new(reader)
        .await
        .with_context(|| format!("Failed to read archive {}", cli.archive))?;
    tracing::info!("Opened {} with {} entries", cli.archive, archive.len());

    let options = ServeOptions {
        default_document: cli.index.clone(),
        buffer_fallback: cli.buffered,
        ..ServeOptions::default()
    };
    let app = ZipServer::with_options(Arc::new(archive), options).into_router();

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("Failed to bind {}", cli.listen))?;
    tracing::info!("Listening on http://{}", cli.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
            tracing::info!("Shutdown signal received, stopping server");
        })
        .await
        .context("HTTP server failed")
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
