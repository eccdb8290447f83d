//! Duplicate removal and canonical ordering of fetched articles.
//!
//! The key is the raw link (or the title when the link is empty). URLs are
//! not canonicalized, so the same story reached through two different links
//! survives twice.

use std::collections::HashSet;

use crate::model::Article;

pub fn dedup_key(article: &Article) -> &str {
    if article.link.is_empty() {
        &article.title
    } else {
        &article.link
    }
}

/// Keep the first occurrence of every key, preserving input order.
pub fn dedup(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = HashSet::with_capacity(articles.len());
    articles
        .into_iter()
        .filter(|a| seen.insert(dedup_key(a).to_string()))
        .collect()
}

/// Newest first. Stable, so equal timestamps keep their relative order.
pub fn sort_newest_first(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

/// Canonical feed order: deduplicated, then newest first.
pub fn dedup_and_sort(articles: Vec<Article>) -> Vec<Article> {
    let mut unique = dedup(articles);
    sort_newest_first(&mut unique);
    unique
}
