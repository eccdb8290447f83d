//! The feed session: one reader's preferences, sources, caches and the
//! in-memory article state, with the pipeline operations on top.
//!
//! Pipeline operations (`open`, `refresh`, `load_more`, `reanalyze`) are
//! serialized by an async mutex. The article state sits behind an `RwLock`
//! so pages can be served while a refresh is running.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::analysis::{self, Analyzer, Briefer};
use crate::cache::{briefing_key, feed_key, BriefingRecord, CacheRecord, CacheStore, TtlCache};
use crate::dedup::dedup_and_sort;
use crate::error::PipelineError;
use crate::ingestion::FeedFetcher;
use crate::model::{Article, Briefing, ContentSource};
use crate::pagination::{self, SortMode, ViewState};
use crate::preferences::Preferences;
use crate::selection::select_for_analysis;

/// Articles handed to the briefing writer
pub const BRIEFING_ARTICLES: usize = 10;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub user_id: String,
    pub batch_size: usize,
    pub load_more_size: usize,
    pub page_size: usize,
    pub feed_ttl: chrono::Duration,
    pub briefing_ttl: chrono::Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            batch_size: 10,
            load_more_size: 10,
            page_size: 10,
            feed_ttl: chrono::Duration::minutes(30),
            briefing_ttl: chrono::Duration::hours(24),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &common::Config) -> Self {
        Self {
            user_id: config
                .user
                .as_ref()
                .map(|u| u.id.clone())
                .unwrap_or_else(|| "default".to_string()),
            batch_size: config.batch_size(),
            load_more_size: config.load_more_size(),
            page_size: config.page_size(),
            feed_ttl: chrono::Duration::minutes(config.feed_ttl_minutes()),
            briefing_ttl: chrono::Duration::hours(config.briefing_ttl_hours()),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    analyzed: Vec<Article>,
    all_fetched: Vec<Article>,
    fetched_at: Option<DateTime<Utc>>,
    /// Ids whose analysis failed in this session; skipped by load-more
    failed: HashSet<String>,
}

impl SessionState {
    fn record(&self) -> CacheRecord {
        CacheRecord {
            analyzed_articles: self.analyzed.clone(),
            all_fetched_articles: self.all_fetched.clone(),
            fetched_at: self.fetched_at.unwrap_or_else(Utc::now),
        }
    }

    fn backlog(&self) -> impl Iterator<Item = &Article> + '_ {
        let analyzed: HashSet<&str> = self.analyzed.iter().map(|a| a.id.as_str()).collect();
        self.all_fetched
            .iter()
            .filter(move |a| !analyzed.contains(a.id.as_str()) && !self.failed.contains(&a.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RefreshOutcome {
    /// No source produced any article
    Empty,
    Refreshed { fetched: usize, analyzed: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum Loaded {
    Cached { analyzed: usize, fetched: usize },
    Fresh { outcome: RefreshOutcome },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LoadMore {
    NothingToLoad,
    Loaded {
        requested: usize,
        analyzed: usize,
        remaining: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub analyzed: usize,
    pub fetched: usize,
    pub backlog: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub articles: Vec<Article>,
    pub filter: String,
    pub sort: SortMode,
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
    pub counts: Counts,
    pub fetched_at: Option<DateTime<Utc>>,
}

struct Inner {
    prefs: Preferences,
    sources: Vec<ContentSource>,
    fetcher: FeedFetcher,
    analyzer: Arc<dyn Analyzer>,
    briefer: Arc<dyn Briefer>,
    feed_cache: TtlCache<CacheRecord>,
    briefing_cache: TtlCache<BriefingRecord>,
    settings: SessionSettings,
    op_lock: Mutex<()>,
    state: RwLock<SessionState>,
    view: RwLock<ViewState>,
}

/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct FeedSession {
    inner: Arc<Inner>,
}

impl FeedSession {
    pub fn new(
        prefs: Preferences,
        sources: Vec<ContentSource>,
        fetcher: FeedFetcher,
        analyzer: Arc<dyn Analyzer>,
        briefer: Arc<dyn Briefer>,
        store: Arc<dyn CacheStore>,
        settings: SessionSettings,
    ) -> Self {
        let fingerprint = prefs.fingerprint();
        let feed_cache = TtlCache::new(
            store.clone(),
            feed_key(&settings.user_id, &fingerprint),
            settings.feed_ttl,
        );
        let briefing_cache = TtlCache::new(
            store,
            briefing_key(&settings.user_id, &fingerprint),
            settings.briefing_ttl,
        );

        Self {
            inner: Arc::new(Inner {
                prefs,
                sources,
                fetcher,
                analyzer,
                briefer,
                feed_cache,
                briefing_cache,
                settings,
                op_lock: Mutex::new(()),
                state: RwLock::new(SessionState::default()),
                view: RwLock::new(ViewState::default()),
            }),
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.inner.prefs
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Adopt the cached feed when it is still fresh, otherwise run a full refresh.
    pub async fn open(&self) -> Result<Loaded, PipelineError> {
        let _guard = self.inner.op_lock.lock().await;

        if let Some(record) = self.inner.feed_cache.load().await {
            let loaded = Loaded::Cached {
                analyzed: record.analyzed_articles.len(),
                fetched: record.all_fetched_articles.len(),
            };
            *self.inner.state.write().await = SessionState {
                analyzed: record.analyzed_articles,
                all_fetched: record.all_fetched_articles,
                fetched_at: Some(record.fetched_at),
                failed: HashSet::new(),
            };
            info!(?loaded, "Loaded feed from cache");
            return Ok(loaded);
        }

        let outcome = self.refresh_locked().await?;
        Ok(Loaded::Fresh { outcome })
    }

    /// Forced refresh: fetch, dedup, select, analyze, persist, replace state.
    pub async fn refresh(&self) -> Result<RefreshOutcome, PipelineError> {
        let _guard = self.inner.op_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<RefreshOutcome, PipelineError> {
        let inner = &self.inner;

        let fetched = inner.fetcher.fetch_all(&inner.sources).await;
        let all_fetched = dedup_and_sort(fetched);
        if all_fetched.is_empty() {
            info!("Feed is empty");
        }

        let batch = {
            let mut rng = rand::thread_rng();
            select_for_analysis(&all_fetched, &inner.prefs, inner.settings.batch_size, &mut rng)
        };
        let batch_ids: Vec<String> = batch.iter().map(|a| a.id.clone()).collect();

        let analyzed = analysis::analyze_batch(inner.analyzer.as_ref(), batch, &inner.prefs).await?;

        let analyzed_ids: HashSet<&str> = analyzed.iter().map(|a| a.id.as_str()).collect();
        let failed: HashSet<String> = batch_ids
            .into_iter()
            .filter(|id| !analyzed_ids.contains(id.as_str()))
            .collect();

        let outcome = if all_fetched.is_empty() {
            RefreshOutcome::Empty
        } else {
            RefreshOutcome::Refreshed {
                fetched: all_fetched.len(),
                analyzed: analyzed.len(),
            }
        };

        let record = {
            let mut state = inner.state.write().await;
            let now = Utc::now();
            // fetchedAt never goes backwards for one key
            let fetched_at = state.fetched_at.map_or(now, |prev| prev.max(now));
            *state = SessionState {
                analyzed,
                all_fetched,
                fetched_at: Some(fetched_at),
                failed,
            };
            state.record()
        };
        self.persist(&record).await;

        info!(?outcome, "Feed refreshed");
        Ok(outcome)
    }

    /// Analyze the next slice of the backlog without touching the network.
    pub async fn load_more(&self) -> Result<LoadMore, PipelineError> {
        let _guard = self.inner.op_lock.lock().await;
        let inner = &self.inner;

        let next: Vec<Article> = {
            let state = inner.state.read().await;
            state
                .backlog()
                .take(inner.settings.load_more_size)
                .cloned()
                .collect()
        };
        if next.is_empty() {
            info!("Nothing to load");
            return Ok(LoadMore::NothingToLoad);
        }

        let requested = next.len();
        let requested_ids: Vec<String> = next.iter().map(|a| a.id.clone()).collect();
        let newly = analysis::analyze_batch(inner.analyzer.as_ref(), next, &inner.prefs).await?;
        let analyzed = newly.len();

        let (record, remaining) = {
            let mut state = inner.state.write().await;
            let new_ids: HashSet<&str> = newly.iter().map(|a| a.id.as_str()).collect();
            for id in requested_ids {
                if !new_ids.contains(id.as_str()) {
                    state.failed.insert(id);
                }
            }
            for article in newly {
                if !state.analyzed.iter().any(|a| a.id == article.id) {
                    state.analyzed.push(article);
                }
            }
            (state.record(), state.backlog().count())
        };
        self.persist(&record).await;

        Ok(LoadMore::Loaded {
            requested,
            analyzed,
            remaining,
        })
    }

    /// Re-run analysis for one article. On failure nothing changes.
    pub async fn reanalyze(&self, article_id: &str) -> Result<Article, PipelineError> {
        let _guard = self.inner.op_lock.lock().await;
        let inner = &self.inner;

        let article = {
            let state = inner.state.read().await;
            state
                .analyzed
                .iter()
                .chain(state.all_fetched.iter())
                .find(|a| a.id == article_id)
                .cloned()
        }
        .ok_or_else(|| PipelineError::NotFound(article_id.to_string()))?;

        let updated = analysis::reanalyze(inner.analyzer.as_ref(), &article, &inner.prefs).await?;

        let record = {
            let mut state = inner.state.write().await;
            match state.analyzed.iter_mut().find(|a| a.id == article_id) {
                Some(existing) => *existing = updated.clone(),
                None => state.analyzed.push(updated.clone()),
            }
            state.failed.remove(article_id);
            state.record()
        };
        self.persist(&record).await;

        info!(article = %article_id, "Article re-analyzed");
        Ok(updated)
    }

    async fn persist(&self, record: &CacheRecord) {
        if let Err(e) = self.inner.feed_cache.save(record).await {
            warn!(key = %self.inner.feed_cache.key(), "Failed to persist feed: {}", e);
        }
    }

    pub async fn analyzed(&self) -> Vec<Article> {
        self.inner.state.read().await.analyzed.clone()
    }

    pub async fn all_fetched(&self) -> Vec<Article> {
        self.inner.state.read().await.all_fetched.clone()
    }

    pub async fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.read().await.fetched_at
    }

    pub async fn counts(&self) -> Counts {
        let state = self.inner.state.read().await;
        Counts {
            analyzed: state.analyzed.len(),
            fetched: state.all_fetched.len(),
            backlog: state.backlog().count(),
        }
    }

    pub async fn view_state(&self) -> ViewState {
        self.inner.view.read().await.clone()
    }

    pub async fn set_filter(&self, filter: &str) {
        self.inner.view.write().await.set_filter(filter);
    }

    pub async fn set_sort(&self, sort: SortMode) {
        self.inner.view.write().await.set_sort(sort);
    }

    pub async fn set_page(&self, page: usize) {
        self.inner.view.write().await.set_page(page);
    }

    /// The current page of analyzed articles under the current view state.
    pub async fn page(&self) -> Page {
        let view = self.view_state().await;
        let page_size = self.inner.settings.page_size;
        let state = self.inner.state.read().await;

        let filtered = pagination::filter_and_sort(&state.analyzed, &view.filter, view.sort);
        let total = filtered.len();
        let articles = pagination::view(&filtered, pagination::ALL_CATEGORIES, view.sort, view.page, page_size);

        Page {
            articles,
            filter: view.filter,
            sort: view.sort,
            page: view.page,
            total_pages: pagination::total_pages(total, page_size),
            total,
            counts: Counts {
                analyzed: state.analyzed.len(),
                fetched: state.all_fetched.len(),
                backlog: state.backlog().count(),
            },
            fetched_at: state.fetched_at,
        }
    }

    /// Today's briefing: served from its own cache, else written from the
    /// most personally relevant analyzed articles.
    pub async fn briefing(&self) -> Result<Briefing, PipelineError> {
        let inner = &self.inner;
        if let Some(record) = inner.briefing_cache.load().await {
            return Ok(record.briefing);
        }

        let top: Vec<Article> = {
            let state = inner.state.read().await;
            if state.analyzed.is_empty() {
                return Err(PipelineError::EmptyFeed);
            }
            pagination::filter_and_sort(&state.analyzed, pagination::ALL_CATEGORIES, SortMode::PersonalRelevance)
                .into_iter()
                .take(BRIEFING_ARTICLES)
                .collect()
        };

        let briefing = inner.briefer.write_briefing(&top, &inner.prefs).await?;
        let record = BriefingRecord {
            briefing: briefing.clone(),
            generated_at: Utc::now(),
        };
        if let Err(e) = inner.briefing_cache.save(&record).await {
            warn!(key = %inner.briefing_cache.key(), "Failed to persist briefing: {}", e);
        }
        info!(articles = top.len(), "Daily briefing generated");
        Ok(briefing)
    }

    /// Refresh every `period` until cancelled. The first refresh happens one
    /// full period after the call.
    pub fn start_auto_refresh(&self, period: Duration) -> AutoRefresh {
        // tokio panics on a zero interval
        let period = period.max(Duration::from_millis(1));
        let shutdown = Arc::new(Notify::new());
        let session = self.clone();
        let signal = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = signal.notified() => {
                        info!("Auto-refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match session.refresh().await {
                            Ok(outcome) => info!(?outcome, "Auto-refresh completed"),
                            Err(e) => warn!("Auto-refresh failed: {}", e),
                        }
                    }
                }
            }
        });

        AutoRefresh {
            shutdown,
            handle: Some(handle),
        }
    }
}

/// Handle to a running auto-refresh task. Dropping it aborts the task.
pub struct AutoRefresh {
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl AutoRefresh {
    /// Ask the task to stop after the refresh in flight, if any.
    pub fn cancel(&self) {
        self.shutdown.notify_one();
    }

    /// Cancel and wait for the task to exit.
    pub async fn stop(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Auto-refresh task ended abnormally: {}", e);
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
