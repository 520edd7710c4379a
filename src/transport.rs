//! Object store upload transport.
//!
//! [`ObjectStore`] is one durable write attempt: store a named byte buffer at
//! a path with a content type and an overwrite flag. Retrying is layered on
//! top by [`crate::retry`].
//!
//! [`HttpObjectStore`] speaks the Supabase Storage REST API:
//!
//! ```text
//! POST {endpoint}/storage/v1/object/{bucket}/{object_path}
//! Authorization: Bearer <service key>
//! Content-Type: <mime>
//! x-upsert: true|false
//! ```

use crate::credentials::StorageCredentials;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use thiserror::Error;

/// Maximum characters of a rejection body kept for diagnostics.
const MAX_ERROR_BODY: usize = 300;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upload failed ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid storage endpoint: {0}")]
    InvalidEndpoint(String),
}

/// A remote store that accepts whole-object writes.
pub trait ObjectStore: Sync {
    fn put_object(
        &self,
        object_path: &str,
        content_type: &str,
        body: &[u8],
        upsert: bool,
    ) -> Result<(), TransportError>;
}

/// Blocking HTTP client for Supabase-compatible storage.
pub struct HttpObjectStore {
    client: Client,
    credentials: StorageCredentials,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(
        credentials: StorageCredentials,
        bucket: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Self::with_client(client, credentials, bucket)
    }

    /// Use a preconfigured client (proxy settings, TLS roots, timeouts).
    pub fn with_client(
        client: Client,
        credentials: StorageCredentials,
        bucket: &str,
    ) -> Result<Self, TransportError> {
        // Fail on a malformed endpoint before any file is processed
        object_url(&credentials.endpoint, bucket, "x")?;
        Ok(Self {
            client,
            credentials,
            bucket: bucket.to_string(),
        })
    }
}

/// Build the upload URL. Each path segment is percent-encoded by `Url`.
pub fn object_url(endpoint: &str, bucket: &str, object_path: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint.trim_end_matches('/'))
        .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidEndpoint(format!("{endpoint}: cannot be a base URL")))?
        .pop_if_empty()
        .extend(["storage", "v1", "object", bucket])
        .extend(object_path.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

impl ObjectStore for HttpObjectStore {
    fn put_object(
        &self,
        object_path: &str,
        content_type: &str,
        body: &[u8],
        upsert: bool,
    ) -> Result<(), TransportError> {
        let url = object_url(&self.credentials.endpoint, &self.bucket, object_path)?;
        let response = self
            .client
            .post(url)
            .bearer_auth(self.credentials.service_key())
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(body.to_vec())
            .send()?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body: truncate_chars(&text, MAX_ERROR_BODY),
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// One recorded `put_object` call.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedPut {
        pub object_path: String,
        pub content_type: String,
        pub body: Vec<u8>,
        pub upsert: bool,
    }

    /// Mock store that records successful writes.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    #[derive(Default)]
    pub struct MockStore {
        pub puts: Mutex<Vec<RecordedPut>>,
        /// Remaining scripted failures per object path.
        pub failures: Mutex<HashMap<String, u32>>,
        pub attempts: Mutex<u32>,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `times` writes to `object_path` with a 503.
        pub fn fail_path(self, object_path: &str, times: u32) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(object_path.to_string(), times);
            self
        }

        pub fn get_puts(&self) -> Vec<RecordedPut> {
            self.puts.lock().unwrap().clone()
        }

        pub fn put_paths(&self) -> Vec<String> {
            self.get_puts().into_iter().map(|p| p.object_path).collect()
        }

        pub fn attempt_count(&self) -> u32 {
            *self.attempts.lock().unwrap()
        }
    }

    impl ObjectStore for MockStore {
        fn put_object(
            &self,
            object_path: &str,
            content_type: &str,
            body: &[u8],
            upsert: bool,
        ) -> Result<(), TransportError> {
            *self.attempts.lock().unwrap() += 1;
            if let Some(remaining) = self.failures.lock().unwrap().get_mut(object_path)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(TransportError::Rejected {
                    status: 503,
                    body: "service unavailable".into(),
                });
            }
            self.puts.lock().unwrap().push(RecordedPut {
                object_path: object_path.to_string(),
                content_type: content_type.to_string(),
                body: body.to_vec(),
                upsert,
            });
            Ok(())
        }
    }

    /// Store pointed at a loopback server, ignoring any proxy environment.
    fn local_store(endpoint: String, bucket: &str) -> HttpObjectStore {
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        HttpObjectStore::with_client(client, StorageCredentials::new(endpoint, "service-key"), bucket)
            .unwrap()
    }

    // =========================================================================
    // URL construction
    // =========================================================================

    #[test]
    fn url_joins_endpoint_bucket_and_path() {
        let url = object_url("https://proj.example/", "books", "library/bio/images/fig.jpg").unwrap();
        assert_eq!(
            url.as_str(),
            "https://proj.example/storage/v1/object/books/library/bio/images/fig.jpg"
        );
    }

    #[test]
    fn url_percent_encodes_segments() {
        let url = object_url("https://proj.example", "books", "lib/a b#1.jpg").unwrap();
        assert_eq!(
            url.as_str(),
            "https://proj.example/storage/v1/object/books/lib/a%20b%231.jpg"
        );
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(matches!(
            object_url("not a url", "books", "x"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    // =========================================================================
    // HTTP behavior
    // =========================================================================

    /// Run a blocking `put_object` against the mock server off the async runtime.
    async fn put_via(
        server: &MockServer,
        bucket: &'static str,
        object_path: &'static str,
        content_type: &'static str,
        body: &'static [u8],
        upsert: bool,
    ) -> Result<(), TransportError> {
        let endpoint = server.uri();
        tokio::task::spawn_blocking(move || {
            local_store(endpoint, bucket).put_object(object_path, content_type, body, upsert)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn put_sends_auth_content_type_and_upsert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/books/library/bio/images/fig.jpg"))
            .and(header("authorization", "Bearer service-key"))
            .and(header("content-type", "image/jpeg"))
            .and(header("x-upsert", "true"))
            .and(body_bytes(b"jpegbytes".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        put_via(&server, "books", "library/bio/images/fig.jpg", "image/jpeg", b"jpegbytes", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/missing/x/y.png"))
            .and(header("content-type", "image/png"))
            .and(header("x-upsert", "false"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("{\"error\":\"Bucket not found\"}"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = put_via(&server, "missing", "x/y.png", "image/png", b"png", false)
            .await
            .unwrap_err();
        match err {
            TransportError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("Bucket not found"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_rejected_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
            .expect(1)
            .mount(&server)
            .await;

        let err = put_via(&server, "books", "a/b.jpg", "image/jpeg", b"j", true)
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransportError::Rejected { status: 503, .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn error_body_is_truncated() {
        let long = "x".repeat(1000);
        assert_eq!(truncate_chars(&long, MAX_ERROR_BODY).len(), 300);
        assert_eq!(truncate_chars("short", MAX_ERROR_BODY), "short");
    }

    #[test]
    fn mock_store_scripted_failures() {
        let store = MockStore::new().fail_path("a", 1);
        assert!(store.put_object("a", "t", b"1", false).is_err());
        assert!(store.put_object("a", "t", b"1", false).is_ok());
        assert_eq!(store.attempt_count(), 2);
        assert_eq!(store.put_paths(), vec!["a".to_string()]);
    }
}
