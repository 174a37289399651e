//! Paginated catalog access.

use crate::error::CatalogError;
use crate::source::USER_AGENT;
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// One document advertised by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Globally unique, stable document id.
    pub id: u64,
    /// Free-form title.
    pub title: String,
}

impl CatalogEntry {
    /// Creates a catalog entry.
    pub fn new(id: u64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }
}

/// A source of catalog pages, numbered from 1. An empty page ends the catalog.
pub trait Catalog {
    /// Returns the entries on `page`.
    fn page(&self, page: u32) -> impl Future<Output = Result<Vec<CatalogEntry>, CatalogError>>;
}

/// JSON catalog queried as `GET <base>?page=<n>`.
#[derive(Clone)]
pub struct HttpCatalog {
    client: Client,
    base: Url,
}

impl HttpCatalog {
    /// Builds a catalog client for `base`.
    pub fn new(base: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let base = Url::parse(base).map_err(|source| CatalogError::Url {
            url: base.to_string(),
            source,
        })?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|source| CatalogError::Client { source })?;
        Ok(Self { client, base })
    }

    fn page_url(&self, page: u32) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url
    }
}

impl Catalog for HttpCatalog {
    async fn page(&self, page: u32) -> Result<Vec<CatalogEntry>, CatalogError> {
        let url = self.page_url(page);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| CatalogError::Http { page, source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                page,
                status: status.as_u16(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| CatalogError::Http { page, source })?;
        parse_page(page, &body)
    }
}

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    results: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    title: Option<String>,
}

/// Decodes a catalog page, dropping entries that lack an id or a title.
pub fn parse_page(page: u32, body: &[u8]) -> Result<Vec<CatalogEntry>, CatalogError> {
    let parsed: PageBody =
        serde_json::from_slice(body).map_err(|source| CatalogError::Decode { page, source })?;
    Ok(parsed
        .results
        .into_iter()
        .filter_map(|raw| {
            let id = raw.id.filter(|id| *id > 0)?;
            let title = raw.title.filter(|t| !t.trim().is_empty())?;
            Some(CatalogEntry { id, title })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn skips_entries_without_id_or_title() {
        let body = br#"{
            "count": 3,
            "results": [
                {"id": 84, "title": "Frankenstein; Or, The Modern Prometheus", "authors": []},
                {"title": "No id"},
                {"id": 11, "title": ""},
                {"id": 1342, "title": "Pride and Prejudice"}
            ]
        }"#;
        let entries = parse_page(1, body).expect("parse");
        assert_eq!(
            entries,
            vec![
                CatalogEntry::new(84, "Frankenstein; Or, The Modern Prometheus"),
                CatalogEntry::new(1342, "Pride and Prejudice"),
            ]
        );
    }

    #[test]
    fn missing_results_is_an_empty_page() {
        assert!(parse_page(9, b"{\"detail\": \"Invalid page.\"}")
            .expect("parse")
            .is_empty());
        assert!(matches!(
            parse_page(2, b"<html>"),
            Err(CatalogError::Decode { page: 2, .. })
        ));
    }

    #[test]
    fn construction_errors_are_not_page_errors() {
        let err = HttpCatalog::new("not a url", Duration::from_secs(1))
            .err()
            .expect("rejected");
        assert!(matches!(err, CatalogError::Url { .. }));
        assert!(!err.to_string().contains("page"));

        let base = "https://gutendex.com/books?languages=en";
        let catalog = HttpCatalog::new(base, Duration::from_secs(1)).expect("valid base");
        assert_eq!(
            catalog.page_url(3).as_str(),
            "https://gutendex.com/books?languages=en&page=3"
        );
    }

    #[tokio::test]
    async fn requests_page_query_parameter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"results": [{"id": 2701, "title": "Moby Dick; Or, The Whale"}]}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let catalog =
            HttpCatalog::new(&format!("{}/books", server.uri()), Duration::from_secs(5))
                .expect("catalog");
        let entries = catalog.page(2).await.expect("page 2");
        assert_eq!(entries, vec![CatalogEntry::new(2701, "Moby Dick; Or, The Whale")]);

        let err = catalog.page(3).await.unwrap_err();
        assert!(matches!(err, CatalogError::Status { page: 3, status: 404 }));
    }
}
