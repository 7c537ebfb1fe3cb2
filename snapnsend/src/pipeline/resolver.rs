//! Image reference resolution.
//!
//! Search terms are turned into exactly as many image references as were requested. Live results
//! come from an [`ImageSearch`] implementation; any shortfall is padded with synthetic
//! placeholder references that the materializer renders locally.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{PipelineError, ensure_slash, http_client};
use crate::config::ImageSearchConfig;

const PLACEHOLDER_SCHEME: &str = "placeholder://";

/// Where an image should come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Image to download
    Remote(Url),
    /// Image to synthesize; `slug` is derived from the first search term, `index` is 1-based
    Placeholder { slug: String, index: usize },
}

impl ImageReference {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{url}"),
            Self::Placeholder { slug, index } => write!(f, "{PLACEHOLDER_SCHEME}{slug}/{index}"),
        }
    }
}

/// An image search provider.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    /// Return up to `per_page` image URLs for one term.
    async fn search(&self, term: &str, per_page: u32) -> anyhow::Result<Vec<Url>>;

    /// Whether `search` can return anything at all.
    fn is_live(&self) -> bool {
        true
    }
}

/// Used when no image provider key is configured. Never returns results.
pub struct SyntheticSearch;

#[async_trait]
impl ImageSearch for SyntheticSearch {
    async fn search(&self, _term: &str, _per_page: u32) -> anyhow::Result<Vec<Url>> {
        Ok(Vec::new())
    }

    fn is_live(&self) -> bool {
        false
    }
}

#[derive(Debug, Deserialize)]
struct SearchPhotosResponse {
    #[serde(default)]
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    regular: Option<String>,
}

/// Unsplash `search/photos` client.
pub struct UnsplashSearch {
    client: Client,
    base_url: Url,
    access_key: String,
}

impl UnsplashSearch {
    pub fn new(config: &ImageSearchConfig, access_key: String) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http_client(config.request_timeout)?,
            base_url: config.base_url.clone(),
            access_key,
        })
    }
}

#[async_trait]
impl ImageSearch for UnsplashSearch {
    async fn search(&self, term: &str, per_page: u32) -> anyhow::Result<Vec<Url>> {
        let mut url = ensure_slash(&self.base_url)
            .join("search/photos")
            .context("Failed to construct search URL")?;
        url.query_pairs_mut()
            .append_pair("query", term)
            .append_pair("per_page", &per_page.to_string());

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Client-ID {}", self.access_key))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Image search API error: {status} - {body}"));
        }

        let parsed: SearchPhotosResponse = response.json().await.context("error decoding response body")?;
        Ok(parsed
            .results
            .into_iter()
            .filter_map(|photo| photo.urls.regular)
            .filter_map(|raw| match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    debug!(url = %raw, error = %e, "Skipping unparseable image URL");
                    None
                }
            })
            .collect())
    }
}

/// Turns search terms into a fixed number of image references.
#[derive(Clone)]
pub struct ImageResolver {
    search: Arc<dyn ImageSearch>,
    per_page_cap: u32,
}

impl ImageResolver {
    pub fn new(search: Arc<dyn ImageSearch>, per_page_cap: u32) -> Self {
        Self { search, per_page_cap }
    }

    /// Live search when an access key is configured, synthetic otherwise.
    pub fn from_config(config: &ImageSearchConfig) -> Result<Self, PipelineError> {
        let search: Arc<dyn ImageSearch> = match &config.access_key {
            Some(key) => Arc::new(UnsplashSearch::new(config, key.clone())?),
            None => {
                debug!("No image search key configured, all images will be placeholders");
                Arc::new(SyntheticSearch)
            }
        };
        Ok(Self::new(search, config.per_page_cap))
    }

    /// Return exactly `count` references for `terms`.
    ///
    /// Terms are searched in order until enough results are collected. The first provider error
    /// stops searching; the remainder is padded with placeholders numbered from the number of
    /// collected results plus one.
    #[instrument(skip(self, terms), fields(terms = terms.len()))]
    pub async fn resolve(&self, terms: &[String], count: usize) -> Vec<ImageReference> {
        let mut references: Vec<ImageReference> = Vec::with_capacity(count);

        if self.search.is_live() {
            for term in terms {
                let remaining = count.saturating_sub(references.len());
                if remaining == 0 {
                    break;
                }
                let per_page = self.per_page_cap.min(u32::try_from(remaining).unwrap_or(u32::MAX));

                match self.search.search(term, per_page).await {
                    Ok(urls) => references.extend(urls.into_iter().take(remaining).map(ImageReference::Remote)),
                    Err(e) => {
                        warn!(term = %term, error = %e, "Image search failed, falling back to placeholders");
                        break;
                    }
                }
            }
        }

        let collected = references.len();
        if collected < count {
            let slug = terms.first().map(|t| slugify(t)).unwrap_or_else(|| "image".to_string());
            debug!(collected, padding = count - collected, "Padding with placeholder images");
            references.extend((collected + 1..=count).map(|index| ImageReference::Placeholder {
                slug: slug.clone(),
                index,
            }));
        }

        references.truncate(count);
        references
    }
}

/// Lowercase a term and keep only word characters, whitespace and dashes; spaces become
/// underscores.
fn slugify(term: &str) -> String {
    term.replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records calls and replays canned results, failing once the script runs out.
    struct ScriptedSearch {
        calls: Mutex<Vec<(String, u32)>>,
        script: Mutex<Vec<anyhow::Result<usize>>>,
    }

    impl ScriptedSearch {
        fn new(script: Vec<anyhow::Result<usize>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(script.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl ImageSearch for ScriptedSearch {
        async fn search(&self, term: &str, per_page: u32) -> anyhow::Result<Vec<Url>> {
            self.calls.lock().unwrap().push((term.to_string(), per_page));
            let next = self.script.lock().unwrap().pop().unwrap_or_else(|| Err(anyhow!("script exhausted")));
            let found = next?;
            Ok((0..found)
                .map(|i| Url::parse(&format!("https://images.example.com/{term}/{i}.jpg")).unwrap())
                .collect())
        }
    }

    fn terms(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Snowy Mountain Peaks!"), "snowy_mountain_peaks");
        assert_eq!(slugify("sci-fi city"), "sci-fi_city");
    }

    #[test]
    fn test_placeholder_display() {
        let reference = ImageReference::Placeholder {
            slug: "mountains".to_string(),
            index: 3,
        };
        assert_eq!(reference.to_string(), "placeholder://mountains/3");
    }

    #[tokio::test]
    async fn test_synthetic_always_returns_requested_count() {
        let resolver = ImageResolver::new(Arc::new(SyntheticSearch), 10);

        for n in 1..=50 {
            let refs = resolver.resolve(&terms(&["Mountain Peaks"]), n).await;
            assert_eq!(refs.len(), n);
            assert!(refs.iter().all(ImageReference::is_placeholder));
        }

        let refs = resolver.resolve(&terms(&["Mountain Peaks"]), 2).await;
        assert_eq!(refs[0].to_string(), "placeholder://mountain_peaks/1");
        assert_eq!(refs[1].to_string(), "placeholder://mountain_peaks/2");
    }

    #[tokio::test]
    async fn test_no_terms_uses_generic_slug() {
        let resolver = ImageResolver::new(Arc::new(SyntheticSearch), 10);
        let refs = resolver.resolve(&[], 1).await;
        assert_eq!(refs[0].to_string(), "placeholder://image/1");
    }

    #[tokio::test]
    async fn test_live_results_are_padded_after_collected() {
        let search = Arc::new(ScriptedSearch::new(vec![Ok(2), Ok(1)]));
        let resolver = ImageResolver::new(search.clone(), 10);

        let refs = resolver.resolve(&terms(&["lakes", "rivers"]), 5).await;

        assert_eq!(refs.len(), 5);
        assert!(!refs[0].is_placeholder());
        assert!(!refs[2].is_placeholder());
        assert_eq!(refs[3].to_string(), "placeholder://lakes/4");
        assert_eq!(refs[4].to_string(), "placeholder://lakes/5");

        let calls = search.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("lakes".to_string(), 5), ("rivers".to_string(), 3)]);
    }

    #[tokio::test]
    async fn test_per_page_is_capped_and_search_stops_when_full() {
        let search = Arc::new(ScriptedSearch::new(vec![Ok(10), Ok(10), Ok(10)]));
        let resolver = ImageResolver::new(search.clone(), 10);

        let refs = resolver.resolve(&terms(&["a1", "b2", "c3", "d4"]), 15).await;

        assert_eq!(refs.len(), 15);
        assert!(refs.iter().all(|r| !r.is_placeholder()));
        let calls = search.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("a1".to_string(), 10), ("b2".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_provider_error_stops_querying() {
        let search = Arc::new(ScriptedSearch::new(vec![Ok(1), Err(anyhow!("rate limited")), Ok(5)]));
        let resolver = ImageResolver::new(search.clone(), 10);

        let refs = resolver.resolve(&terms(&["one", "two", "three"]), 4).await;

        assert_eq!(refs.len(), 4);
        assert!(!refs[0].is_placeholder());
        assert_eq!(refs[1].to_string(), "placeholder://one/2");
        assert_eq!(search.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unsplash_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/photos"))
            .and(query_param("query", "mountains"))
            .and(query_param("per_page", "2"))
            .and(header("authorization", "Client-ID unsplash-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 2,
                "results": [
                    { "id": "a", "urls": { "regular": "https://images.example.com/a.jpg" } },
                    { "id": "b", "urls": { "small": "https://images.example.com/b-small.jpg" } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ImageSearchConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let search = UnsplashSearch::new(&config, "unsplash-key".to_string()).unwrap();
        let urls = search.search("mountains", 2).await.unwrap();

        assert_eq!(urls, vec![Url::parse("https://images.example.com/a.jpg").unwrap()]);
    }

    #[tokio::test]
    async fn test_unsplash_error_status_pads_everything() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let config = ImageSearchConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            access_key: Some("bad-key".to_string()),
            ..Default::default()
        };
        let resolver = ImageResolver::from_config(&config).unwrap();
        let refs = resolver.resolve(&terms(&["forest", "desert"]), 3).await;

        assert_eq!(refs.len(), 3);
        assert!(refs.iter().all(ImageReference::is_placeholder));
    }
}
