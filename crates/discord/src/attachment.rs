//! Bounded download of remote attachments.

use {
    futures::StreamExt,
    tokio::io::{AsyncWrite, AsyncWriteExt},
    tracing::debug,
    url::Url,
};

use crate::error::{Error, Result};

/// Largest attachment the bridge will re-upload (8 MiB).
pub const MAX_ATTACHMENT_BYTES: u64 = 8 * 1024 * 1024;

const FALLBACK_BASENAME: &str = "attachment";

/// Whether a file of `size` bytes is over the `limit`.
pub fn exceeds_ceiling(size: u64, limit: u64) -> bool {
    size > limit
}

/// File name for an attachment: the last non-empty path segment of its URL.
pub fn attachment_basename(source_url: &str) -> String {
    Url::parse(source_url)
        .ok()
        .and_then(|url| {
            url.path_segments()?
                .rev()
                .find(|segment| !segment.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_BASENAME.to_string())
}

#[derive(Clone)]
pub struct AttachmentFetcher {
    http: reqwest::Client,
    max_bytes: u64,
}

impl AttachmentFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            max_bytes: MAX_ATTACHMENT_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Stream `source_url` into `sink`, returning the number of bytes written.
    ///
    /// A `HEAD` request runs first; when it declares a length over the ceiling
    /// nothing is downloaded. The `GET` reply's own `Content-Length` is checked
    /// the same way before the first write. Bodies without one are counted
    /// while streaming, so they cannot push more than the ceiling into the
    /// sink.
    pub async fn fetch<W>(&self, source_url: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let head = self
            .http
            .head(source_url)
            .send()
            .await
            .map_err(|e| Error::transfer_failed(source_url, e))?;

        if head.status().is_success() {
            if let Some(size) = declared_length(&head)
                && exceeds_ceiling(size, self.max_bytes)
            {
                return Err(self.too_large(source_url, size));
            }
        } else {
            debug!(url = source_url, status = %head.status(), "attachment HEAD not accepted");
        }

        let resp = self
            .http
            .get(source_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::transfer_failed(source_url, e))?;
        if let Some(size) = declared_length(&resp)
            && exceeds_ceiling(size, self.max_bytes)
        {
            return Err(self.too_large(source_url, size));
        }

        let mut written: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::transfer_failed(source_url, e))?;
            let next = written + chunk.len() as u64;
            if exceeds_ceiling(next, self.max_bytes) {
                return Err(self.too_large(source_url, next));
            }
            sink.write_all(&chunk)
                .await
                .map_err(|e| Error::transfer_failed(source_url, e))?;
            written = next;
        }
        sink.flush()
            .await
            .map_err(|e| Error::transfer_failed(source_url, e))?;

        debug!(url = source_url, bytes = written, "attachment fetched");
        Ok(written)
    }

    fn too_large(&self, url: &str, size: u64) -> Error {
        Error::AttachmentTooLarge {
            url: url.to_string(),
            size,
            limit: self.max_bytes,
        }
    }
}

// `Response::content_length` reports the body size hint, which is zero for
// HEAD replies, so read the header directly.
fn declared_length(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use {super::*, rstest::rstest};

    #[rstest]
    #[case(MAX_ATTACHMENT_BYTES - 1, false)]
    #[case(MAX_ATTACHMENT_BYTES, false)]
    #[case(MAX_ATTACHMENT_BYTES + 1, true)]
    #[case(0, false)]
    fn ceiling_boundary(#[case] size: u64, #[case] refused: bool) {
        assert_eq!(exceeds_ceiling(size, MAX_ATTACHMENT_BYTES), refused);
    }

    #[rstest]
    #[case("https://cdn.example.com/a/b/cat.png", "cat.png")]
    #[case("https://cdn.example.com/a/b/cat.png?size=1#frag", "cat.png")]
    #[case("https://cdn.example.com/dir/", "dir")]
    #[case("https://cdn.example.com/", "attachment")]
    #[case("not a url", "attachment")]
    fn basenames(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(attachment_basename(url), expected);
    }

    #[tokio::test]
    async fn streams_body_into_sink() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/file.txt")
            .with_status(200)
            .create_async()
            .await;
        let _get = server
            .mock("GET", "/file.txt")
            .with_status(200)
            .with_body("hello attachment")
            .create_async()
            .await;

        let fetcher = AttachmentFetcher::new(reqwest::Client::new());
        let mut sink = Vec::new();
        let n = fetcher
            .fetch(&format!("{}/file.txt", server.url()), &mut sink)
            .await
            .unwrap();
        assert_eq!(n, 16);
        assert_eq!(sink, b"hello attachment");
    }

    #[tokio::test]
    async fn declared_oversize_get_writes_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/big.bin")
            .with_status(405)
            .create_async()
            .await;
        let _get = server
            .mock("GET", "/big.bin")
            .with_status(200)
            .with_body(vec![0u8; 200_000])
            .create_async()
            .await;

        let fetcher = AttachmentFetcher::new(reqwest::Client::new()).with_max_bytes(100_000);
        let mut sink = Vec::new();
        let err = fetcher
            .fetch(&format!("{}/big.bin", server.url()), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AttachmentTooLarge {
                size: 200_000,
                limit: 100_000,
                ..
            }
        ));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn chunked_body_over_ceiling_is_refused() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/stream.bin")
            .with_status(405)
            .create_async()
            .await;
        let _get = server
            .mock("GET", "/stream.bin")
            .with_status(200)
            .with_chunked_body(|w| {
                for _ in 0..8 {
                    w.write_all(&[0u8; 8])?;
                }
                Ok(())
            })
            .create_async()
            .await;

        let fetcher = AttachmentFetcher::new(reqwest::Client::new()).with_max_bytes(16);
        let mut sink = Vec::new();
        let err = fetcher
            .fetch(&format!("{}/stream.bin", server.url()), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttachmentTooLarge { limit: 16, .. }));
        assert!(sink.len() <= 16);
    }

    #[tokio::test]
    async fn missing_file_is_transfer_failure() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/gone.png")
            .with_status(404)
            .create_async()
            .await;
        let _get = server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = AttachmentFetcher::new(reqwest::Client::new());
        let mut sink = Vec::new();
        let err = fetcher
            .fetch(&format!("{}/gone.png", server.url()), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttachmentTransferFailed { .. }));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn unreachable_host_is_transfer_failure() {
        let fetcher = AttachmentFetcher::new(reqwest::Client::new());
        let mut sink = Vec::new();
        let err = fetcher
            .fetch("http://127.0.0.1:1/nothing", &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttachmentTransferFailed { .. }));
    }
}
