//! HTTP transport for manifests and provider bundles
//!
//! Abstracts plain GET requests with streaming bodies so the manifest
//! fetcher and installer can run against reqwest in production and against
//! scripted responses in tests.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::config::NetworkConfig;

/// Response body delivered chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Errors raised while performing a GET request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Request could not be sent or no response arrived
    #[error("Request to {url} failed: {reason}")]
    Request {
        /// Requested URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// Server answered with a non-2xx status
    #[error("Request to {url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Body stream broke off before completion
    #[error("Body of {url} was interrupted: {reason}")]
    Body {
        /// Requested URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// HTTP client could not be constructed
    #[error("HTTP client setup failed: {reason}")]
    Setup {
        /// Underlying failure
        reason: String,
    },
}

/// GET-only HTTP client with streaming response bodies.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs a GET and returns the body as a chunk stream.
    ///
    /// # Errors
    /// - `TransportError::Request` - Connection or protocol failure
    /// - `TransportError::Status` - Non-2xx response
    async fn get(&self, url: &str) -> Result<ByteStream, TransportError>;

    /// Performs a GET and buffers the entire body.
    ///
    /// # Errors
    /// - `TransportError::Request` - Connection or protocol failure
    /// - `TransportError::Status` - Non-2xx response
    /// - `TransportError::Body` - Body stream interrupted
    async fn get_bytes(&self, url: &str) -> Result<Bytes, TransportError> {
        let mut body = self.get(url).await?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport using timeout, redirect and user agent settings.
    ///
    /// # Errors
    /// - `TransportError::Setup` - TLS backend or client builder failure
    pub fn new(config: &NetworkConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| TransportError::Setup {
                reason: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Wraps an already configured reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<ByteStream, TransportError> {
        tracing::debug!("GET {}", url);

        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| TransportError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let url = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| TransportError::Body {
                    url: url.clone(),
                    reason: e.to_string(),
                })
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    struct ChunkedTransport {
        chunks: Vec<Result<Bytes, TransportError>>,
    }

    #[async_trait]
    impl Transport for ChunkedTransport {
        async fn get(&self, _url: &str) -> Result<ByteStream, TransportError> {
            Ok(stream::iter(self.chunks.clone()).boxed())
        }
    }

    #[tokio::test]
    async fn test_get_bytes_concatenates_chunks() {
        let transport = ChunkedTransport {
            chunks: vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))],
        };

        let body = transport.get_bytes("https://example.com").await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_get_bytes_surfaces_interrupted_body() {
        let transport = ChunkedTransport {
            chunks: vec![
                Ok(Bytes::from_static(b"partial")),
                Err(TransportError::Body {
                    url: "https://example.com".to_string(),
                    reason: "reset".to_string(),
                }),
            ],
        };

        let result = transport.get_bytes("https://example.com").await;
        assert!(matches!(result, Err(TransportError::Body { .. })));
    }

    #[test]
    fn test_http_transport_builds_from_config() {
        assert!(HttpTransport::new(&NetworkConfig::default()).is_ok());
    }
}
