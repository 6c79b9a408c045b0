//! Offline ingestion: crawl a site, cut its pages into chunks, embed and upsert them.
//!
//! The crawl is breadth-first, single-threaded and restricted to the root's host. It
//! stops once `min_pages` documents were collected or the frontier is exhausted, and
//! links found at `max_depth` are not followed.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadwise_core::config::KnowledgeConfig;
use leadwise_core::domain::knowledge::{build_chunk_drafts, ChunkDraft};
use leadwise_db::repositories::KnowledgeRepository;
use reqwest::Client;
use scraper::{Html, Node, Selector};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::llm::LlmClient;

pub const USER_AGENT: &str = concat!("leadwise-indexer/", env!("CARGO_PKG_VERSION"));
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg"];

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Body of a successful (2xx) response.
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpPageFetcher {
    http: Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build crawler http client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;
        response.text().await.with_context(|| format!("failed to read body of {url}"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageDoc {
    pub url: String,
    pub title: String,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SiteReport {
    pub site: String,
    pub pages: usize,
    pub chunks: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub pages: usize,
    pub chunks_upserted: usize,
    pub sites: Vec<SiteReport>,
}

fn selector(cell: &'static OnceLock<Option<Selector>>, css: &str) -> Option<&'static Selector> {
    cell.get_or_init(|| Selector::parse(css).ok()).as_ref()
}

fn title_selector() -> Option<&'static Selector> {
    static CELL: OnceLock<Option<Selector>> = OnceLock::new();
    selector(&CELL, "title")
}

fn heading_selector() -> Option<&'static Selector> {
    static CELL: OnceLock<Option<Selector>> = OnceLock::new();
    selector(&CELL, "h1")
}

fn body_selector() -> Option<&'static Selector> {
    static CELL: OnceLock<Option<Selector>> = OnceLock::new();
    selector(&CELL, "body")
}

fn link_selector() -> Option<&'static Selector> {
    static CELL: OnceLock<Option<Selector>> = OnceLock::new();
    selector(&CELL, "a[href]")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(document: &Html, selector: Option<&Selector>) -> Option<String> {
    let selector = selector?;
    document
        .select(selector)
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

/// Visible page text with title recovery; `None` when the page has no text at all.
pub fn extract_page(html: &str, url: &str) -> Option<PageDoc> {
    let document = Html::parse_document(html);
    let root = body_selector()
        .and_then(|body| document.select(body).next())
        .unwrap_or_else(|| document.root_element());

    let mut pieces = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| SKIPPED_ELEMENTS.contains(&element.name()))
        });
        if !hidden {
            pieces.push(text.to_string());
        }
    }
    let text = collapse_whitespace(&pieces.join(" "));
    if text.is_empty() {
        return None;
    }

    let title = first_text(&document, title_selector())
        .or_else(|| first_text(&document, heading_selector()))
        .unwrap_or_else(|| url.to_string());
    Some(PageDoc { url: url.to_string(), title, text })
}

/// Resolves `href` against `base`, drops the fragment and the trailing slash; http(s) only.
pub fn normalize_link(base: &Url, href: &str) -> Option<String> {
    let mut joined = base.join(href.trim()).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.set_fragment(None);
    Some(joined.as_str().trim_end_matches('/').to_string())
}

pub fn extract_links(html: &str, base: &Url) -> Vec<String> {
    let Some(links) = link_selector() else {
        return Vec::new();
    };
    Html::parse_document(html)
        .select(links)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(|href| normalize_link(base, href))
        .collect()
}

fn same_host(left: &Url, right: &Url) -> bool {
    left.host_str() == right.host_str()
        && left.port_or_known_default() == right.port_or_known_default()
}

pub async fn crawl_site(
    fetcher: &dyn PageFetcher,
    root_url: &str,
    max_depth: u32,
    min_pages: u32,
) -> Vec<PageDoc> {
    let root = root_url.trim().trim_end_matches('/').to_string();
    let Ok(root_parsed) = Url::parse(&root) else {
        warn!(event_name = "ingest.crawl.invalid_root", site = %root, "site url is not absolute");
        return Vec::new();
    };

    let mut queue = VecDeque::from([(root, 0u32)]);
    let mut seen = HashSet::new();
    let mut docs = Vec::new();

    while docs.len() < min_pages as usize {
        let Some((url, depth)) = queue.pop_front() else {
            break;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        let html = match fetcher.fetch(&url).await {
            Ok(html) => html,
            Err(error) => {
                warn!(
                    event_name = "ingest.crawl.fetch_failed",
                    url = %url,
                    error = %error,
                    "page skipped"
                );
                continue;
            }
        };

        if let Some(doc) = extract_page(&html, &url) {
            info!(event_name = "ingest.crawl.page_indexed", url = %url, depth, "page indexed");
            docs.push(doc);
        }
        if depth >= max_depth {
            continue;
        }

        let Ok(base) = Url::parse(&url) else {
            continue;
        };
        for link in extract_links(&html, &base) {
            if seen.contains(&link) {
                continue;
            }
            let Ok(parsed) = Url::parse(&link) else {
                continue;
            };
            if same_host(&root_parsed, &parsed) {
                queue.push_back((link, depth + 1));
            }
        }
    }

    docs
}

/// Crawl, chunk, embed and upsert. Requires an embedding provider.
pub struct Ingestor {
    store: Arc<dyn KnowledgeRepository>,
    embedder: Arc<dyn LlmClient>,
    fetcher: Arc<dyn PageFetcher>,
    config: KnowledgeConfig,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn KnowledgeRepository>,
        embedder: Arc<dyn LlmClient>,
        fetcher: Arc<dyn PageFetcher>,
        config: KnowledgeConfig,
    ) -> Self {
        Self { store, embedder, fetcher, config }
    }

    pub async fn run(&self, sites: &[String], now: DateTime<Utc>) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for site in sites {
            info!(event_name = "ingest.site.start", site = %site, "crawling site");
            let pages = crawl_site(
                self.fetcher.as_ref(),
                site,
                self.config.max_depth,
                self.config.min_pages,
            )
            .await;

            let drafts = pages
                .iter()
                .flat_map(|page| {
                    build_chunk_drafts(
                        &page.url,
                        &page.title,
                        &page.text,
                        self.config.chunk_size,
                        self.config.chunk_overlap,
                    )
                })
                .collect::<Vec<_>>();
            let chunks = self
                .embed_and_upsert(drafts, now)
                .await
                .with_context(|| format!("ingestion of {site} failed"))?;

            info!(
                event_name = "ingest.site.done",
                site = %site,
                pages = pages.len(),
                chunks,
                "site ingested"
            );
            report.pages += pages.len();
            report.chunks_upserted += chunks;
            report.sites.push(SiteReport { site: site.clone(), pages: pages.len(), chunks });
        }

        Ok(report)
    }

    async fn embed_and_upsert(&self, drafts: Vec<ChunkDraft>, now: DateTime<Utc>) -> Result<usize> {
        let batch_size = self.config.embedding_batch_size.max(1);
        let mut written = 0;

        for batch in drafts.chunks(batch_size) {
            let texts = batch.iter().map(|draft| draft.content.clone()).collect::<Vec<_>>();
            let vectors = self.embedder.embed(&texts).await.context("embedding batch failed")?;
            if vectors.len() != batch.len() {
                anyhow::bail!(
                    "embedding provider returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }

            let chunks = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(draft, vector)| draft.with_embedding(vector))
                .collect::<Vec<_>>();
            written += self.store.upsert_chunks(&chunks, now).await.context("chunk upsert failed")?;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use leadwise_core::config::AppConfig;
    use leadwise_db::repositories::{InMemoryKnowledgeRepository, KnowledgeRepository};
    use url::Url;

    use super::{crawl_site, extract_page, normalize_link, Ingestor, PageFetcher};
    use crate::test_support::ScriptedLlm;

    #[derive(Default)]
    struct StaticSite {
        pages: HashMap<String, String>,
        fetched: Mutex<Vec<String>>,
    }

    impl StaticSite {
        fn with(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages.iter().map(|(url, html)| (url.to_string(), html.to_string())).collect(),
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().expect("fetched lock").clone()
        }
    }

    #[async_trait]
    impl PageFetcher for StaticSite {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.fetched.lock().expect("fetched lock").push(url.to_string());
            self.pages.get(url).cloned().ok_or_else(|| anyhow!("404 for {url}"))
        }
    }

    fn sample_site() -> StaticSite {
        StaticSite::with(&[
            (
                "https://example.com",
                "<html><head><title>Главная</title></head><body><p>Делаем боты</p>\
                 <a href=\"/bots/\">Боты</a><a href=\"/sites#top\">Сайты</a>\
                 <a href=\"https://other.org/page\">Чужой</a><a href=\"mailto:a@b.c\">Почта</a>\
                 <a href=\"/missing\">Нет</a></body></html>",
            ),
            (
                "https://example.com/bots",
                "<html><body><h1>Боты</h1><p>Бот для записи</p><a href=\"/bots/deep\">Глубже</a></body></html>",
            ),
            ("https://example.com/sites", "<html><body><script>var x = 1;</script></body></html>"),
            ("https://example.com/bots/deep", "<html><body><p>Слишком глубоко</p></body></html>"),
        ])
    }

    #[test]
    fn links_are_resolved_and_normalized() {
        let base = Url::parse("https://example.com/catalog/").expect("base");

        assert_eq!(normalize_link(&base, "item#price"), Some("https://example.com/catalog/item".to_string()));
        assert_eq!(normalize_link(&base, "/about/"), Some("https://example.com/about".to_string()));
        assert_eq!(normalize_link(&base, "mailto:hi@example.com"), None);
        assert_eq!(normalize_link(&base, "javascript:void(0)"), None);
    }

    #[test]
    fn page_text_skips_scripts_and_recovers_title() {
        let page = extract_page(
            "<html><body><h1>Заголовок</h1><style>p{}</style><p>  Текст \n страницы </p></body></html>",
            "https://example.com/x",
        )
        .expect("page");

        assert_eq!(page.title, "Заголовок");
        assert_eq!(page.text, "Заголовок Текст страницы");
        assert!(extract_page("<html><body><script>1</script></body></html>", "https://e.com").is_none());
        assert_eq!(
            extract_page("<p>без заголовка</p>", "https://example.com/y").map(|page| page.title),
            Some("https://example.com/y".to_string())
        );
    }

    #[tokio::test]
    async fn crawl_stays_on_host_and_respects_depth() {
        let site = sample_site();

        let docs = crawl_site(&site, "https://example.com/", 1, 20).await;

        let urls = docs.iter().map(|doc| doc.url.as_str()).collect::<Vec<_>>();
        assert_eq!(urls, vec!["https://example.com", "https://example.com/bots"]);
        let fetched = site.fetched();
        assert!(fetched.contains(&"https://example.com/missing".to_string()));
        assert!(!fetched.iter().any(|url| url.contains("other.org") || url.ends_with("/deep")));
    }

    #[tokio::test]
    async fn crawl_stops_at_min_pages() {
        let site = sample_site();

        let docs = crawl_site(&site, "https://example.com", 2, 1).await;

        assert_eq!(docs.len(), 1);
        assert_eq!(site.fetched(), vec!["https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn repeated_ingestion_does_not_duplicate_chunks() {
        let store = Arc::new(InMemoryKnowledgeRepository::default());
        let ingestor = Ingestor::new(
            store.clone(),
            Arc::new(ScriptedLlm::default()),
            Arc::new(sample_site()),
            AppConfig::default().knowledge,
        );
        let sites = vec!["https://example.com".to_string()];

        let first = ingestor.run(&sites, Utc::now()).await.expect("first run");
        let count_after_first = store.count().await.expect("count");
        let second = ingestor.run(&sites, Utc::now()).await.expect("second run");

        assert_eq!(first.pages, 3);
        assert_eq!(first.sites[0].chunks, first.chunks_upserted);
        assert_eq!(second.chunks_upserted, first.chunks_upserted);
        assert_eq!(store.count().await.expect("count"), count_after_first);
    }

    #[tokio::test]
    async fn embedding_failure_fails_the_run() {
        let ingestor = Ingestor::new(
            Arc::new(InMemoryKnowledgeRepository::default()),
            Arc::new(ScriptedLlm::failing()),
            Arc::new(sample_site()),
            AppConfig::default().knowledge,
        );

        assert!(ingestor.run(&["https://example.com".to_string()], Utc::now()).await.is_err());
    }
}
