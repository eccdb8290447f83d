use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One configured RSS/Atom endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSource {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
}

impl ContentSource {
    pub fn new(id: &str, name: &str, url: &str, category: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            category: category.to_string(),
            subcategory: None,
        }
    }

    pub fn with_subcategory(mut self, subcategory: &str) -> Self {
        self.subcategory = Some(subcategory.to_string());
        self
    }
}

/// A normalized feed entry. `analysis` is only present once the analyst
/// succeeded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub link: String,
    /// Display name of the source
    pub source: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub content_snippet: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

impl Article {
    /// The canonical link when there is one, else a digest of title, source
    /// and category. Two unrelated articles sharing a long title prefix get
    /// different ids.
    pub fn derive_id(link: &str, title: &str, source: &str, category: &str) -> String {
        if !link.is_empty() {
            return link.to_string();
        }
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(category.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("article-{}", &digest[..16])
    }

    pub fn is_analyzed(&self) -> bool {
        self.analysis.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub summary: String,
    /// 1..=10
    pub general_relevance: u8,
    /// 0..=10
    pub personal_relevance: u8,
    pub fact_check: FactCheck,
    #[serde(default)]
    pub perspectives: Vec<Perspective>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactCheck {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub claim: String,
    /// e.g. "Verified", "Unverified", "Misleading", "Needs Context"
    pub verdict: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Perspective {
    pub viewpoint: String,
    pub summary: String,
}

/// Executive-style synthesis of the day's top articles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Briefing {
    pub title: String,
    pub executive_summary: String,
    #[serde(default)]
    pub key_developments: Vec<KeyDevelopment>,
    #[serde(default)]
    pub perspectives: Vec<Perspective>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDevelopment {
    pub summary: String,
    pub source_title: String,
    pub source_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_the_id_when_present() {
        let id = Article::derive_id("https://example.org/a", "Title", "Src", "News");
        assert_eq!(id, "https://example.org/a");
    }

    #[test]
    fn fallback_id_separates_shared_title_prefixes() {
        let prefix = "Breaking: parliament votes on the long-awaited budget reform package";
        let a = Article::derive_id("", &format!("{prefix} in Brazil"), "Folha", "Politics");
        let b = Article::derive_id("", &format!("{prefix} in Germany"), "DW", "Politics");
        assert!(a.starts_with("article-"));
        assert_ne!(a, b);
        // same inputs stay stable
        assert_eq!(
            a,
            Article::derive_id("", &format!("{prefix} in Brazil"), "Folha", "Politics")
        );
    }
}
