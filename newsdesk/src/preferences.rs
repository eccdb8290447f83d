//! User preferences, normalized once at the edge.
//!
//! Stored documents come in two shapes: the legacy flat `interests` map
//! (category -> weight) and the hierarchical `categoryInterests` map with
//! per-subcategory weights. Both are converted into [`Preferences`] here and
//! nothing downstream looks at the raw shape again.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::model::Article;

pub const MIN_WEIGHT: u8 = 1;
pub const MAX_WEIGHT: u8 = 5;

/// Weight of one category and its subcategories, each in `1..=5`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWeight {
    pub category: String,
    pub weight: u8,
    #[serde(default)]
    pub subcategories: BTreeMap<String, u8>,
}

impl CategoryWeight {
    pub fn new(category: &str, weight: u8) -> Self {
        Self {
            category: category.to_string(),
            weight,
            subcategories: BTreeMap::new(),
        }
    }

    pub fn with_subcategory(mut self, subcategory: &str, weight: u8) -> Self {
        self.subcategories.insert(subcategory.to_string(), weight);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Sorted by category name
    pub categories: Vec<CategoryWeight>,
    /// Selected content source ids
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Preferences document as persisted by the profile store
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPreferences {
    #[serde(default)]
    pub interests: BTreeMap<String, i64>,
    #[serde(default)]
    pub category_interests: BTreeMap<String, RawCategoryInterest>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCategoryInterest {
    pub weight: i64,
    #[serde(default)]
    pub subcategories: BTreeMap<String, RawSubcategoryInterest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSubcategoryInterest {
    pub weight: i64,
}

impl From<RawPreferences> for Preferences {
    fn from(raw: RawPreferences) -> Self {
        // Out-of-range values are kept as-is (saturated into u8) so that
        // `validate` can reject them instead of silently clamping.
        let to_weight = |w: i64| w.clamp(0, u8::MAX as i64) as u8;

        let categories = if !raw.category_interests.is_empty() {
            raw.category_interests
                .into_iter()
                .map(|(category, interest)| CategoryWeight {
                    category,
                    weight: to_weight(interest.weight),
                    subcategories: interest
                        .subcategories
                        .into_iter()
                        .map(|(sub, s)| (sub, to_weight(s.weight)))
                        .collect(),
                })
                .collect()
        } else {
            raw.interests
                .into_iter()
                .map(|(category, weight)| CategoryWeight::new(&category, to_weight(weight)))
                .collect()
        };

        Self {
            categories,
            sources: raw.sources,
            keywords: raw
                .keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

impl Preferences {
    /// Parse a preferences JSON document in either the legacy or hierarchical shape.
    pub fn from_json(s: &str) -> Result<Self> {
        let raw: RawPreferences =
            serde_json::from_str(s).context("Failed to parse preferences JSON")?;
        Ok(raw.into())
    }

    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read preferences: {}", path.as_ref().display()))?;
        Self::from_json(&data)
    }

    /// Check every weight is within `1..=5`.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let in_range = |w: u8| (MIN_WEIGHT..=MAX_WEIGHT).contains(&w);
        for cw in &self.categories {
            if !in_range(cw.weight) {
                return Err(format!(
                    "weight {} for category '{}' outside {}..={}",
                    cw.weight, cw.category, MIN_WEIGHT, MAX_WEIGHT
                ));
            }
            for (sub, w) in &cw.subcategories {
                if !in_range(*w) {
                    return Err(format!(
                        "weight {} for subcategory '{}/{}' outside {}..={}",
                        w, cw.category, sub, MIN_WEIGHT, MAX_WEIGHT
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn weight_for(&self, category: &str) -> Option<&CategoryWeight> {
        self.categories.iter().find(|cw| cw.category == category)
    }

    /// Stable short digest used to key caches per preferences combination.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let digest = format!("{:x}", Sha256::digest(json.as_bytes()));
        digest[..16].to_string()
    }
}

/// Local personal-relevance score in `0..=10`.
///
/// Baseline 3, plus the category weight (or the subcategory weight when the
/// article's source declares a subcategory the user weighted), plus 3 when a
/// keyword appears in the title or snippet.
pub fn personal_relevance(article: &Article, prefs: &Preferences) -> u8 {
    let mut score: u32 = 3;

    if let Some(cw) = prefs.weight_for(&article.category) {
        let sub_weight = article
            .subcategory
            .as_ref()
            .and_then(|sub| cw.subcategories.get(sub))
            .copied();
        score += sub_weight.unwrap_or(cw.weight) as u32;
    }

    let title = article.title.to_lowercase();
    let snippet = article.content_snippet.to_lowercase();
    let keyword_hit = prefs.keywords.iter().any(|kw| {
        let kw = kw.to_lowercase();
        title.contains(&kw) || snippet.contains(&kw)
    });
    if keyword_hit {
        score += 3;
    }

    score.min(10) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(category: &str, subcategory: Option<&str>, title: &str) -> Article {
        Article {
            id: title.to_string(),
            title: title.to_string(),
            link: String::new(),
            source: "Test".into(),
            category: category.into(),
            subcategory: subcategory.map(str::to_string),
            content_snippet: "snippet".into(),
            published_at: Utc::now(),
            analysis: None,
        }
    }

    #[test]
    fn hierarchical_shape_wins_over_legacy() {
        let json = r#"{
            "interests": {"Technology": 2},
            "categoryInterests": {
                "Technology": {"weight": 5, "subcategories": {"Cybersecurity": {"weight": 4}}},
                "Finance": {"weight": 1, "subcategories": {}}
            },
            "sources": ["hacker-news"],
            "keywords": ["rust", "  "]
        }"#;
        let prefs = Preferences::from_json(json).unwrap();
        assert_eq!(prefs.categories.len(), 2);
        // BTreeMap order
        assert_eq!(prefs.categories[0].category, "Finance");
        let tech = prefs.weight_for("Technology").unwrap();
        assert_eq!(tech.weight, 5);
        assert_eq!(tech.subcategories.get("Cybersecurity"), Some(&4));
        assert_eq!(prefs.keywords, vec!["rust".to_string()]);
        assert!(prefs.validate().is_ok());
    }

    #[test]
    fn legacy_flat_map_is_converted() {
        let prefs = Preferences::from_json(r#"{"interests": {"News": 3, "Science": 4}}"#).unwrap();
        assert_eq!(prefs.categories.len(), 2);
        assert_eq!(prefs.weight_for("Science").unwrap().weight, 4);
        assert!(prefs.weight_for("Science").unwrap().subcategories.is_empty());
    }

    #[test]
    fn out_of_range_weights_fail_validation() {
        let prefs = Preferences::from_json(r#"{"interests": {"News": 9}}"#).unwrap();
        assert!(prefs.validate().is_err());

        let prefs = Preferences {
            categories: vec![CategoryWeight::new("News", 3).with_subcategory("Local News", 0)],
            ..Default::default()
        };
        assert!(prefs.validate().is_err());
    }

    #[test]
    fn personal_relevance_uses_weights_and_keywords() {
        let prefs = Preferences {
            categories: vec![CategoryWeight::new("Technology", 4).with_subcategory("AI & Machine Learning", 5)],
            keywords: vec!["Rust".into()],
            ..Default::default()
        };
        assert_eq!(personal_relevance(&article("Technology", None, "Chips"), &prefs), 7);
        assert_eq!(
            personal_relevance(&article("Technology", Some("AI & Machine Learning"), "Models"), &prefs),
            8
        );
        // 3 + 5 + 3 capped at 10
        assert_eq!(
            personal_relevance(&article("Technology", Some("AI & Machine Learning"), "rust in AI"), &prefs),
            10
        );
        assert_eq!(personal_relevance(&article("Sports", None, "Cup final"), &prefs), 3);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = Preferences {
            categories: vec![CategoryWeight::new("News", 3)],
            ..Default::default()
        };
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.keywords.push("climate".into());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
