//! Error taxonomy for the feed pipeline.
//!
//! Per-unit failures (one source, one article, one cache read) are recovered
//! where they happen and only logged. The variants below are what crosses a
//! layer boundary.

use thiserror::Error;

/// Failure of a single analysis call. Recovered by the orchestrator: the
/// article is dropped from the batch.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The collaborator answered but the payload was not a usable analysis
    #[error("malformed analysis response: {0}")]
    Malformed(String),

    /// Transport or API error from the collaborator
    #[error("analysis upstream error: {0}")]
    Upstream(String),
}

/// Errors surfaced to callers of the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network, HTTP status or parse failure for one source
    #[error("source {source_id} failed: {reason}")]
    SourceFetch { source_id: String, reason: String },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// The batch could not be submitted at all (e.g. malformed preferences)
    #[error("batch submission rejected: {0}")]
    BatchSubmission(String),

    /// Stored record could not be read back
    #[error("cache read failed: {0}")]
    CacheRead(String),

    /// Cache substrate refused a write
    #[error("cache store error: {0}")]
    Store(String),

    #[error("article not found: {0}")]
    NotFound(String),

    /// Nothing has been analyzed yet, so there is nothing to summarize
    #[error("feed is empty")]
    EmptyFeed,
}
