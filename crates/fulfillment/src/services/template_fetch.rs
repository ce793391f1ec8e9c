//! Best-effort fetcher for templates stored behind a URL.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::SideEffectError;

/// Trait for fetching template text by URL.
///
/// Fetching is best-effort and network-bound; callers fall back to a default
/// template on failure. Results are never cached; templates can change
/// between orders.
#[async_trait]
pub trait TemplateFetcher: Send + Sync {
    /// Fetches the text behind the URL.
    async fn fetch_text(&self, url: &str) -> Result<String, SideEffectError>;
}

#[derive(Debug, Default)]
struct InMemoryFetcherState {
    templates: HashMap<String, String>,
    fail_on_fetch: bool,
}

/// In-memory template fetcher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplateFetcher {
    state: Arc<RwLock<InMemoryFetcherState>>,
}

impl InMemoryTemplateFetcher {
    /// Creates a new in-memory template fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the text served for a URL.
    pub fn insert(&self, url: impl Into<String>, text: impl Into<String>) {
        self.state
            .write()
            .unwrap()
            .templates
            .insert(url.into(), text.into());
    }

    /// Configures the fetcher to fail on the next fetch call.
    pub fn set_fail_on_fetch(&self, fail: bool) {
        self.state.write().unwrap().fail_on_fetch = fail;
    }
}

#[async_trait]
impl TemplateFetcher for InMemoryTemplateFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, SideEffectError> {
        let state = self.state.read().unwrap();

        if state.fail_on_fetch {
            return Err(SideEffectError::Unavailable(
                "template host down".to_string(),
            ));
        }

        state
            .templates
            .get(url)
            .cloned()
            .ok_or_else(|| SideEffectError::Rejected(format!("no template at {url}")))
    }
}

/// HTTP-backed template fetcher.
#[derive(Debug, Clone)]
pub struct HttpTemplateFetcher {
    client: reqwest::Client,
}

impl HttpTemplateFetcher {
    /// Creates a fetcher with the given request timeout.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TemplateFetcher for HttpTemplateFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, SideEffectError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SideEffectError::Unavailable(e.to_string()))?;

        response
            .text()
            .await
            .map_err(|e| SideEffectError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetches_registered_template() {
        let fetcher = InMemoryTemplateFetcher::new();
        fetcher.insert("https://cdn.example.com/t.html", "<p>{{product_name}}</p>");

        let text = fetcher
            .fetch_text("https://cdn.example.com/t.html")
            .await
            .unwrap();
        assert_eq!(text, "<p>{{product_name}}</p>");
    }

    #[tokio::test]
    async fn unknown_url_and_fail_toggle_are_errors() {
        let fetcher = InMemoryTemplateFetcher::new();
        assert!(fetcher.fetch_text("https://nowhere.example").await.is_err());

        fetcher.insert("https://cdn.example.com/t.html", "x");
        fetcher.set_fail_on_fetch(true);
        assert!(fetcher
            .fetch_text("https://cdn.example.com/t.html")
            .await
            .is_err());
    }
}
