/*!
 * Object transport over presigned URLs
 *
 * Pulls use ranged `GET`s written straight to a local part file. Pushes
 * stream the local file as the body of a single `PUT`, metering every body
 * chunk through the shared throttle before it is handed to the socket.
 */

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use shardline_core_resilience::Throttle;
use std::fmt;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{Result, ShardlineError};

/// Body chunk size for uploads
pub const UPLOAD_CHUNK: usize = 256 * 1024;

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Range` header value; HTTP ranges are inclusive
    pub fn header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }

    /// Split `total` bytes into consecutive ranges of at most `chunk` bytes
    pub fn split(total: u64, chunk: u64) -> Vec<ByteRange> {
        let chunk = chunk.max(1);
        let parts = total.div_ceil(chunk);
        (0..parts)
            .map(|idx| {
                let start = idx * chunk;
                ByteRange::new(start, (start + chunk).min(total))
            })
            .collect()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Moves bytes between presigned URLs and local files
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download `range` of the object (all of it when `None`) into `dest`
    ///
    /// When `meter` is given each received chunk is debited from it before
    /// it is written.
    async fn fetch(
        &self,
        name: &str,
        url: &str,
        range: Option<ByteRange>,
        dest: &Path,
        meter: Option<&Throttle>,
    ) -> Result<u64>;

    /// Upload `source` (`size` bytes) to the object, debiting `throttle`
    /// before each body chunk is sent
    async fn upload(
        &self,
        name: &str,
        url: &str,
        source: &Path,
        size: u64,
        throttle: &Throttle,
    ) -> Result<u64>;
}

/// Transport backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        name: &str,
        url: &str,
        range: Option<ByteRange>,
        dest: &Path,
        meter: Option<&Throttle>,
    ) -> Result<u64> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header());
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !(status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT) {
            let body = response.text().await.unwrap_or_default();
            return Err(ShardlineError::from_status(name, status.as_u16(), body));
        }
        if let Some(range) = range {
            // a server ignoring Range sends the whole object with 200
            if status == StatusCode::OK && range.start != 0 {
                return Err(ShardlineError::TransferFailure {
                    name: name.to_string(),
                    status: Some(status.as_u16()),
                    reason: format!("range {} not honoured", range),
                    transient: false,
                });
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(dest).await?;
        let limit = range.map(|r| r.len());
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            let len = chunk.len() as u64;
            if let Some(meter) = meter {
                meter.acquire(len).await;
            }
            if let Some(limit) = limit {
                if written + len > limit {
                    if status != StatusCode::OK {
                        return Err(ShardlineError::TransferFailure {
                            name: name.to_string(),
                            status: Some(status.as_u16()),
                            reason: format!("body exceeds the {} bytes requested", limit),
                            transient: true,
                        });
                    }
                    // 200 for a range starting at 0: keep only the prefix
                    let keep = (limit - written) as usize;
                    file.write_all(&chunk[..keep]).await?;
                    written = limit;
                    break;
                }
            }
            file.write_all(&chunk).await?;
            written += len;
        }
        file.flush().await?;
        file.sync_all().await?;

        if let Some(limit) = limit {
            if written != limit {
                return Err(ShardlineError::TransferFailure {
                    name: name.to_string(),
                    status: Some(status.as_u16()),
                    reason: format!("short body: {} of {} bytes", written, limit),
                    transient: true,
                });
            }
        }

        Ok(written)
    }

    async fn upload(
        &self,
        name: &str,
        url: &str,
        source: &Path,
        size: u64,
        throttle: &Throttle,
    ) -> Result<u64> {
        let file = fs::File::open(source).await?;
        let throttle = throttle.clone();
        let body = ReaderStream::with_capacity(file, UPLOAD_CHUNK).then(move |chunk| {
            let throttle = throttle.clone();
            async move {
                if let Ok(bytes) = &chunk {
                    throttle.acquire(bytes.len() as u64).await;
                }
                chunk
            }
        });

        let response = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShardlineError::from_status(name, status.as_u16(), body));
        }

        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header_is_inclusive() {
        assert_eq!(ByteRange::new(0, 11).header(), "bytes=0-10");
        assert_eq!(ByteRange::new(5, 6).header(), "bytes=5-5");
        assert_eq!(ByteRange::new(0, 11).len(), 11);
    }

    #[test]
    fn test_split_covers_total() {
        let ranges = ByteRange::split(12, 5);
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, 5),
                ByteRange::new(5, 10),
                ByteRange::new(10, 12)
            ]
        );
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<u64>(), 12);
    }

    #[test]
    fn test_split_exact_multiple() {
        let ranges = ByteRange::split(10, 5);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1], ByteRange::new(5, 10));
    }

    #[test]
    fn test_split_empty_object() {
        assert!(ByteRange::split(0, 5).is_empty());
    }
}
