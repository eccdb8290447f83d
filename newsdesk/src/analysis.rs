//! Sequential analysis of a selected batch.
//!
//! Calls go out one at a time to keep load on the LLM endpoint bounded. A
//! failed article is dropped from the batch and never retried here.

use crate::error::{AnalysisError, PipelineError};
use crate::model::{Analysis, Article, Briefing};
use crate::preferences::Preferences;

/// Produces an [`Analysis`] for one article.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        article: &Article,
        prefs: &Preferences,
    ) -> Result<Analysis, AnalysisError>;
}

/// Writes the daily briefing from a set of already analyzed articles.
#[async_trait::async_trait]
pub trait Briefer: Send + Sync {
    async fn write_briefing(
        &self,
        articles: &[Article],
        prefs: &Preferences,
    ) -> Result<Briefing, AnalysisError>;
}

/// Analyze `articles` in order and return only the successes, each carrying
/// its analysis. Zero successes is `Ok(vec![])`; only unusable preferences
/// abort the batch.
pub async fn analyze_batch(
    analyzer: &dyn Analyzer,
    articles: Vec<Article>,
    prefs: &Preferences,
) -> Result<Vec<Article>, PipelineError> {
    prefs.validate().map_err(PipelineError::BatchSubmission)?;

    let submitted = articles.len();
    let mut analyzed = Vec::with_capacity(submitted);

    for mut article in articles {
        match analyzer.analyze(&article, prefs).await {
            Ok(analysis) => {
                article.analysis = Some(analysis);
                analyzed.push(article);
            }
            Err(e) => {
                tracing::warn!(article = %article.id, "Analysis failed, dropping article: {}", e);
            }
        }
    }

    tracing::info!(
        submitted,
        succeeded = analyzed.len(),
        "Analyzed batch"
    );
    Ok(analyzed)
}

/// Re-run analysis for one article. On success the returned copy carries the
/// new analysis; the input is never modified.
pub async fn reanalyze(
    analyzer: &dyn Analyzer,
    article: &Article,
    prefs: &Preferences,
) -> Result<Article, PipelineError> {
    prefs.validate().map_err(PipelineError::BatchSubmission)?;

    let analysis = analyzer.analyze(article, prefs).await?;
    let mut updated = article.clone();
    updated.analysis = Some(analysis);
    Ok(updated)
}
