//! Bounded URL fetching
//!
//! Only `http`/`https` are accepted. Redirects are followed to a fixed
//! depth, the body is streamed against a size cap, and one retry is made
//! on transient network failure.

use crate::error::{SourceError, SourceResult};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use textloom_config::SourcesConfig;
use tracing::{debug, warn};

/// Raw bytes pulled from a URL, with whatever the server told us about them
#[derive(Debug, Clone)]
pub struct FetchedContent {
    /// Final URL after redirects
    pub url: String,
    /// Body bytes
    pub bytes: Bytes,
    /// Content-Type header value, parameters stripped
    pub mime: Option<String>,
    /// Filename hint from the URL path tail
    pub filename: Option<String>,
}

/// HTTP fetcher with redirect, size, and deadline bounds
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    client: reqwest::Client,
    max_body_bytes: u64,
}

impl UrlFetcher {
    /// Build a fetcher from source configuration
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Network` if the underlying HTTP client cannot
    /// be constructed (TLS backend initialization failure).
    pub fn new(config: &SourcesConfig) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| SourceError::Network {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Fetch the body of `url`, retrying once on transient network failure
    ///
    /// # Errors
    ///
    /// - `SourceError::InvalidSource` for non-http(s) schemes
    /// - `SourceError::Oversize` when the body exceeds the configured cap
    /// - `SourceError::Timeout` when the per-request deadline elapses
    /// - `SourceError::Network` for other transport failures
    pub async fn fetch(&self, url: &str) -> SourceResult<FetchedContent> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SourceError::InvalidSource(format!(
                "only http/https URLs are fetchable: {url}"
            )));
        }

        match self.fetch_once(url).await {
            Ok(content) => Ok(content),
            Err(e) if is_transient(&e) => {
                warn!(url, error = %e, "Fetch failed, retrying once");
                self.fetch_once(url).await
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_once(&self, url: &str) -> SourceResult<FetchedContent> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Network {
                url: url.to_string(),
                message: format!("server returned {status}"),
            });
        }

        // Fail fast on a declared oversize body before streaming anything
        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(SourceError::Oversize {
                    size: len,
                    cap: self.max_body_bytes,
                });
            }
        }

        let final_url = response.url().to_string();
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());
        let filename = filename_from_url(&final_url);

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(piece) = stream.next().await {
            let piece = piece.map_err(|e| classify_reqwest(url, &e))?;
            if (body.len() as u64).saturating_add(piece.len() as u64) > self.max_body_bytes {
                return Err(SourceError::Oversize {
                    size: (body.len() as u64).saturating_add(piece.len() as u64),
                    cap: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&piece);
        }

        debug!(url = %final_url, bytes = body.len(), mime = ?mime, "Fetched URL");

        Ok(FetchedContent {
            url: final_url,
            bytes: body.freeze(),
            mime,
            filename,
        })
    }
}

/// Whether a fetch error is worth the single retry
const fn is_transient(error: &SourceError) -> bool {
    matches!(
        error,
        SourceError::Network { .. } | SourceError::Timeout(_)
    )
}

fn classify_reqwest(url: &str, error: &reqwest::Error) -> SourceError {
    if error.is_timeout() {
        SourceError::Timeout(url.to_string())
    } else {
        SourceError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// Last path segment of the URL, if it looks like a filename
fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let tail = path.trim_end_matches('/').rsplit('/').next()?;
    if tail.contains('.') && !tail.contains(':') {
        Some(tail.to_string())
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> SourcesConfig {
        SourcesConfig {
            fetch_timeout_secs: 5,
            max_redirects: 5,
            max_body_bytes: 1024,
            upload_dir: "./uploads".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_mime() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(b"<html>hi</html>".to_vec(), "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let fetcher = UrlFetcher::new(&test_config()).unwrap();
        let content = fetcher
            .fetch(&format!("{}/doc.html", server.uri()))
            .await
            .unwrap();

        assert_eq!(content.bytes.as_ref(), b"<html>hi</html>");
        assert_eq!(content.mime.as_deref(), Some("text/html"));
        assert_eq!(content.filename.as_deref(), Some("doc.html"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http_scheme() {
        let fetcher = UrlFetcher::new(&test_config()).unwrap();
        let err = fetcher.fetch("ftp://example.com/file").await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidSource(_)));
    }

    #[tokio::test]
    async fn test_fetch_enforces_size_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
            .mount(&server)
            .await;

        let fetcher = UrlFetcher::new(&test_config()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/big", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Oversize { .. }));
    }

    #[tokio::test]
    async fn test_fetch_maps_server_error_to_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fail"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = UrlFetcher::new(&test_config()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/fail", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Network { .. }));
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/a/report.pdf?x=1"),
            Some("report.pdf".to_string())
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
    }
}
