//! Mirror URL templates and the HTTP fetcher that retrieves raw documents.

use crate::error::FetchError;
use reqwest::Client;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// User agent sent with every catalog and mirror request.
pub const USER_AGENT: &str = concat!("bookcrawl/", env!("CARGO_PKG_VERSION"));

/// Placeholder substituted with the document id.
const ID_PLACEHOLDER: &str = "{id}";

/// Canonical mirror path.
pub const PRIMARY_SOURCE: &str = "https://www.gutenberg.org/cache/epub/{id}/pg{id}.txt";
/// Historical file layout, tried when the canonical path fails.
pub const SECONDARY_SOURCE: &str = "https://www.gutenberg.org/files/{id}/{id}-0.txt";

/// A URL pattern parameterized by document id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceTemplate(String);

impl SourceTemplate {
    /// Wraps a template string; every `{id}` is replaced at render time.
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Primary mirror followed by the historical fallback.
    pub fn defaults() -> Vec<Self> {
        vec![Self::new(PRIMARY_SOURCE), Self::new(SECONDARY_SOURCE)]
    }

    /// Produces the concrete URL for `id`.
    pub fn render(&self, id: u64) -> String {
        self.0.replace(ID_PLACEHOLDER, &id.to_string())
    }
}

impl fmt::Display for SourceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Retrieves raw bytes for a URL. Implementations must not interpret content.
pub trait Fetcher {
    /// Fetches `url`, failing on transport errors and non-success statuses.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>>;
}

/// Fetcher backed by a shared `reqwest` client with a fixed timeout.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a client with the crate user agent, bounded redirects, and `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err))?;
        Ok(body.to_vec())
    }
}

/// Rejects bodies that are too small to be a real document.
pub fn guard_size(url: &str, body: Vec<u8>, min: usize) -> Result<Vec<u8>, FetchError> {
    if body.len() > min {
        Ok(body)
    } else {
        Err(FetchError::TooShort {
            url: url.to_string(),
            len: body.len(),
            min,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn renders_every_placeholder() {
        let template = SourceTemplate::new(PRIMARY_SOURCE);
        assert_eq!(
            template.render(1342),
            "https://www.gutenberg.org/cache/epub/1342/pg1342.txt"
        );
        assert_eq!(
            SourceTemplate::new(SECONDARY_SOURCE).render(84),
            "https://www.gutenberg.org/files/84/84-0.txt"
        );
    }

    #[test]
    fn size_guard_rejects_short_bodies() {
        let short = guard_size("u", vec![b'a'; 3 * 1024], DEFAULT_MIN);
        assert_eq!(short.unwrap_err().kind(), FetchErrorKind::TooShort);

        let long = guard_size("u", vec![b'a'; 6 * 1024], DEFAULT_MIN).expect("accepted");
        assert_eq!(long.len(), 6 * 1024);

        assert!(guard_size("u", vec![b'a'; DEFAULT_MIN], DEFAULT_MIN).is_err());
    }

    const DEFAULT_MIN: usize = crate::controls::DEFAULT_MIN_CONTENT_BYTES;

    #[tokio::test]
    async fn http_fetcher_classifies_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).expect("client");
        let body = fetcher
            .fetch(&format!("{}/ok.txt", server.uri()))
            .await
            .expect("fetch ok");
        assert_eq!(body, b"hello");

        let err = fetcher
            .fetch(&format!("{}/gone.txt", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn http_fetcher_reports_timeouts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_millis(50)).expect("client");
        let err = fetcher
            .fetch(&format!("{}/slow.txt", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Timeout);
    }
}
