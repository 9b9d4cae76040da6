use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::ReadAt;
use anyhow::{Context, Result, anyhow, bail};

/// Attempts per range before a transient failure becomes fatal.
const MAX_ATTEMPTS: u32 = 10;

/// Remote archive read with HTTP Range requests
///
/// Every [`ReadAt::read_at`] call becomes one or more `Range` requests, so
/// serving from a remote archive costs a round trip per entry read.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
}

impl HttpRangeReader {
    /// Probe `url` with a HEAD request.
    ///
    /// The server must advertise `Accept-Ranges: bytes` and a
    /// `Content-Length`; both are needed to address the archive randomly.
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("zipserve/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let resp = client
            .head(&url)
            .send()
            .await
            .with_context(|| format!("HEAD {url}"))?;
        if !resp.status().is_success() {
            bail!("HEAD {} failed with status: {}", url, resp.status());
        }

        let headers = resp.headers();
        let ranges = headers
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !ranges.contains("bytes") {
            bail!("{} does not support Range requests", url);
        }

        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("{} did not return Content-Length", url))?;

        tracing::debug!(url = %url, size, "Remote archive supports Range requests");

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
        })
    }

    /// Total body bytes received so far
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Fetch `start..=end`, retrying timeouts and connection failures.
    async fn fetch(&self, start: u64, end: u64) -> Result<bytes::Bytes> {
        let range = format!("bytes={start}-{end}");
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .get(&self.url)
                .header(header::RANGE, &range)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => {
                    return Ok(resp.bytes().await?);
                }
                Ok(resp) => bail!("Range {} failed with status: {}", range, resp.status()),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        url = %self.url,
                        %range,
                        "Connection error, retry {}/{}: {}",
                        attempt,
                        MAX_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e).with_context(|| format!("GET {} ({})", self.url, range)),
            }
        }
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let wanted = (end - offset + 1) as usize;

        let mut received = 0;
        while received < wanted {
            let bytes = self.fetch(offset + received as u64, end).await?;
            if bytes.is_empty() {
                bail!("Empty body for range starting at {}", offset + received as u64);
            }
            let n = bytes.len().min(wanted - received);
            buf[received..received + n].copy_from_slice(&bytes[..n]);
            received += n;
            self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
