//! Where archives come from.
//!
//! [`ArchiveSource`] is the transport seam of the pipeline: production code
//! streams over HTTPS with `reqwest`, tests plug in scripted in-memory
//! sources.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;

use super::error::DownloadError;

/// Body of an archive response, as a stream of chunks.
pub type ChunkStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// An opened archive response.
pub struct ArchiveResponse {
    /// Size announced by the server, if any.
    pub content_length: Option<u64>,
    pub body: ChunkStream,
}

impl std::fmt::Debug for ArchiveResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Start one download attempt. Each call must issue a fresh request.
    async fn open(&self) -> Result<ArchiveResponse, DownloadError>;

    /// Human-readable location, for logs and errors.
    fn location(&self) -> &str;
}

/// Streams the archive from a fixed URL with a plain `GET`.
#[derive(Debug, Clone)]
pub struct HttpArchiveSource {
    client: Client,
    url: String,
}

impl HttpArchiveSource {
    /// Build a source whose connect and read timeouts are both `timeout`.
    /// Timeouts apply per request, so every retry gets a fresh window.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DownloadError> {
        let url = url.into();
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| DownloadError::Http {
                source: e,
                url: url.clone(),
                bytes_received: 0,
            })?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn open(&self) -> Result<ArchiveResponse, DownloadError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DownloadError::Http {
                source: e,
                url: self.url.clone(),
                bytes_received: 0,
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                status: response.status().as_u16(),
                url: self.url.clone(),
            });
        }

        let content_length = response.content_length();
        let url = self.url.clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| DownloadError::Http {
                    source: e,
                    url: url.clone(),
                    bytes_received: 0,
                })
            })
            .boxed();

        Ok(ArchiveResponse {
            content_length,
            body,
        })
    }

    fn location(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted behavior for one `open()` call.
    #[derive(Clone)]
    pub(crate) enum Attempt {
        /// Fail to connect.
        ConnectError,
        /// Serve the bytes in chunks of the given size.
        Serve { data: Vec<u8>, chunk: usize },
        /// Serve the bytes without a content length.
        ServeUnsized(Vec<u8>),
        /// Announce `data.len()` but drop the connection after `cut` bytes.
        Truncate { data: Vec<u8>, cut: usize },
        /// Answer with a non-success HTTP status.
        Status(u16),
    }

    /// In-memory source that plays back scripted attempts in order. Once
    /// the script runs out, the last attempt repeats.
    pub(crate) struct ScriptedSource {
        script: Mutex<VecDeque<Attempt>>,
        opens: AtomicU32,
    }

    impl ScriptedSource {
        pub(crate) fn new(script: Vec<Attempt>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                opens: AtomicU32::new(0),
            }
        }

        pub(crate) fn serving(data: Vec<u8>) -> Self {
            Self::new(vec![Attempt::Serve { data, chunk: 64 * 1024 }])
        }

        pub(crate) fn opens(&self) -> u32 {
            self.opens.load(Ordering::SeqCst)
        }
    }

    fn chunked(data: Vec<u8>, chunk: usize) -> Vec<Result<Bytes, DownloadError>> {
        data.chunks(chunk.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    #[async_trait]
    impl ArchiveSource for ScriptedSource {
        async fn open(&self) -> Result<ArchiveResponse, DownloadError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let attempt = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
            }
            .unwrap_or(Attempt::ConnectError);

            match attempt {
                Attempt::ConnectError => Err(DownloadError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))),
                Attempt::Status(status) => Err(DownloadError::HttpStatus {
                    status,
                    url: self.location().to_string(),
                }),
                Attempt::Serve { data, chunk } => Ok(ArchiveResponse {
                    content_length: Some(data.len() as u64),
                    body: futures_util::stream::iter(chunked(data, chunk)).boxed(),
                }),
                Attempt::ServeUnsized(data) => Ok(ArchiveResponse {
                    content_length: None,
                    body: futures_util::stream::iter(chunked(data, 1024)).boxed(),
                }),
                Attempt::Truncate { data, cut } => {
                    let total = data.len() as u64;
                    let mut chunks = chunked(data[..cut].to_vec(), 1024);
                    chunks.push(Err(DownloadError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset",
                    ))));
                    Ok(ArchiveResponse {
                        content_length: Some(total),
                        body: futures_util::stream::iter(chunks).boxed(),
                    })
                }
            }
        }

        fn location(&self) -> &str {
            "memory://archive.zip"
        }
    }

    #[tokio::test]
    async fn test_scripted_source_repeats_last_attempt() {
        let source = ScriptedSource::new(vec![
            Attempt::ConnectError,
            Attempt::Serve {
                data: b"abc".to_vec(),
                chunk: 1,
            },
        ]);
        assert!(source.open().await.is_err());
        for _ in 0..2 {
            let response = source.open().await.unwrap();
            assert_eq!(response.content_length, Some(3));
            let chunks: Vec<_> = response.body.collect().await;
            assert_eq!(chunks.len(), 3);
        }
        assert_eq!(source.opens(), 3);
    }

    #[tokio::test]
    async fn test_http_source_connection_refused_is_retryable() {
        let source =
            HttpArchiveSource::new("http://127.0.0.1:1/recipes.zip", Duration::from_secs(5))
                .unwrap();
        let err = source.open().await.unwrap_err();
        assert!(err.is_retryable(), "{}", err);
        assert_eq!(source.location(), "http://127.0.0.1:1/recipes.zip");
    }
}
