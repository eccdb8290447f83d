use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use scraper::Html;
use std::time::Duration;

use crate::error::PipelineError;
use crate::model::{Article, ContentSource};

pub const SNIPPET_MAX_CHARS: usize = 200;
const DEFAULT_USER_AGENT: &str = "Newsdesk/0.1.0";

/// Fetches every selected source concurrently and turns feed entries into
/// [`Article`]s. A failing source is logged and contributes nothing.
#[derive(Clone)]
pub struct FeedFetcher {
    client: Client,
    proxy_base: Option<String>,
    recency: chrono::Duration,
    max_attempts: u32,
}

impl FeedFetcher {
    pub fn new(proxy_base: Option<String>, timeout_secs: u64, recency_hours: i64) -> Result<Self> {
        Self::with_user_agent(proxy_base, timeout_secs, recency_hours, DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(
        proxy_base: Option<String>,
        timeout_secs: u64,
        recency_hours: i64,
        user_agent: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            proxy_base,
            recency: chrono::Duration::hours(recency_hours),
            max_attempts: 1,
        })
    }

    pub fn from_config(config: &common::Config) -> Result<Self> {
        let fetch = config.fetch.clone().unwrap_or_default();
        let user_agent = fetch.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let fetcher = Self::with_user_agent(
            fetch.proxy_base.clone(),
            config.fetch_timeout_seconds(),
            config.recency_hours(),
            user_agent,
        )?;
        Ok(fetcher.with_max_attempts(config.fetch_max_attempts()))
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Fetch all sources in parallel and join before returning. Articles come
    /// back grouped by source in source order, not yet deduplicated.
    pub async fn fetch_all(&self, sources: &[ContentSource]) -> Vec<Article> {
        let now = Utc::now();

        let handles: Vec<_> = sources
            .iter()
            .cloned()
            .map(|source| {
                let fetcher = self.clone();
                tokio::spawn(async move {
                    let result = fetcher.fetch_source(&source, now).await;
                    (source, result)
                })
            })
            .collect();

        let mut articles = Vec::new();
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok((_, Ok(mut items))) => articles.append(&mut items),
                Ok((source, Err(e))) => {
                    failed += 1;
                    tracing::warn!(source = %source.id, "Skipping source: {}", e);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Feed fetch task panicked: {}", e);
                }
            }
        }

        tracing::info!(
            sources = sources.len(),
            failed,
            articles = articles.len(),
            "Fetched feeds"
        );
        articles
    }

    async fn fetch_source(&self, source: &ContentSource, now: DateTime<Utc>) -> Result<Vec<Article>, PipelineError> {
        let fail = |reason: String| PipelineError::SourceFetch {
            source_id: source.id.clone(),
            reason,
        };

        let url = self.request_url(&source.url).map_err(|e| fail(e.to_string()))?;
        let body = self.get_with_retry(&url).await.map_err(|e| fail(format!("{:#}", e)))?;
        parse_feed(&body, source, now, self.recency).map_err(|e| fail(format!("{:#}", e)))
    }

    /// Source URL, wrapped in the relay proxy when one is configured.
    pub fn request_url(&self, source_url: &str) -> Result<String> {
        match &self.proxy_base {
            Some(base) => {
                let url = url::Url::parse_with_params(base, &[("url", source_url)])
                    .with_context(|| format!("invalid proxy base: {}", base))?;
                Ok(url.to_string())
            }
            None => Ok(source_url.to_string()),
        }
    }

    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s, 4s...
                tracing::info!("Retrying feed fetch for {} (attempt {}/{}) after {:?}...", url, attempt, self.max_attempts, backoff);
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response.bytes().await.context("failed to read response body")?;
                        return Ok(bytes.to_vec());
                    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(anyhow::anyhow!("feed fetch failed with status: {}", status));
                    } else {
                        // 4xx is permanent
                        anyhow::bail!("feed fetch failed with status: {}", status);
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
    }
}

/// Parse an RSS or Atom document into articles attributed to `source`.
///
/// Entries without a title or a link are dropped, as are entries published
/// more than `window` before `now`.
pub fn parse_feed(
    body: &[u8],
    source: &ContentSource,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Result<Vec<Article>> {
    let feed = parser::parse(body).context("failed to parse feed")?;

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| entry_to_article(entry, source, now))
        .filter(|article| now.signed_duration_since(article.published_at) <= window)
        .collect();

    Ok(articles)
}

fn entry_to_article(entry: Entry, source: &ContentSource, now: DateTime<Utc>) -> Option<Article> {
    let title = entry
        .title
        .as_ref()
        .map(|t| collapse_whitespace(&t.content))
        .filter(|t| !t.is_empty())?;

    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|l| !l.is_empty())?;

    let raw_snippet = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .filter(|s| !s.trim().is_empty())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();

    let published_at = entry.published.or(entry.updated).unwrap_or(now);

    Some(Article {
        id: Article::derive_id(&link, &title, &source.name, &source.category),
        title,
        link,
        source: source.name.clone(),
        category: source.category.clone(),
        subcategory: source.subcategory.clone(),
        content_snippet: truncate_chars(&html_to_text(&raw_snippet), SNIPPET_MAX_CHARS),
        published_at,
        analysis: None,
    })
}

/// Strip tags, decode entities and collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

// Titles arrive entity-decoded; anything tag-like in them is literal text.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
