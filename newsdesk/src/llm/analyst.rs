//! Analyst and briefing writer on top of an [`LlmProvider`].

use serde::Deserialize;
use std::sync::Arc;

use super::{extract_json_from_text, LlmProvider, LlmRequest};
use crate::analysis::{Analyzer, Briefer};
use crate::error::AnalysisError;
use crate::model::{Analysis, Article, Briefing, FactCheck, Finding, KeyDevelopment, Perspective};
use crate::preferences::{personal_relevance, Preferences};

const MAX_PERSPECTIVES: usize = 3;

const ANALYST_PERSONA: &str = "You are a personal intelligence analyst. Stay neutral. \
Use only facts from the article and verifiable external sources. Answer with one JSON object.";

const BRIEFER_PERSONA: &str = "You write daily briefings in the style of a presidential daily brief. \
Answer with one JSON object.";

pub struct LlmAnalyst {
    analysis: Arc<dyn LlmProvider>,
    briefing: Arc<dyn LlmProvider>,
}

impl LlmAnalyst {
    /// One provider for both tasks
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            analysis: provider.clone(),
            briefing: provider,
        }
    }

    pub fn with_briefing_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.briefing = provider;
        self
    }

    async fn complete(
        provider: &dyn LlmProvider,
        system: &str,
        prompt: String,
        temperature: f32,
    ) -> Result<String, AnalysisError> {
        let request = LlmRequest::new(prompt)
            .with_system(system)
            .json()
            .with_temperature(temperature);
        let response = provider
            .generate(request)
            .await
            .map_err(|e| AnalysisError::Upstream(format!("{:#}", e)))?;

        extract_json_from_text(&response.content)
            .ok_or_else(|| AnalysisError::Malformed("no JSON object in response".into()))
    }
}

fn interests_line(prefs: &Preferences) -> String {
    prefs
        .categories
        .iter()
        .map(|cw| {
            if cw.subcategories.is_empty() {
                format!("{}: {}", cw.category, cw.weight)
            } else {
                let subs: Vec<String> = cw
                    .subcategories
                    .iter()
                    .map(|(s, w)| format!("{}: {}", s, w))
                    .collect();
                format!("{}: {} ({})", cw.category, cw.weight, subs.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn analysis_prompt(article: &Article, prefs: &Preferences) -> String {
    format!(
        r#"Analyze the article below.

USER PREFERENCES:
- Interests (category: weight 1-5): {interests}
- Keywords: {keywords}

ARTICLE:
- Title: {title}
- Source: {source}
- Category: {category}
- Snippet: {snippet}

OUTPUT FORMAT (strict JSON):
{{
  "summary": "neutral executive summary, under 150 words",
  "generalRelevance": 1-10 importance to the world or its topic,
  "factCheck": {{
    "summary": "whether the article makes verifiable claims and how credible they look",
    "findings": [{{"claim": "...", "verdict": "Verified | Unverified | Misleading | Needs Context", "source": "optional URL"}}]
  }},
  "perspectives": [{{"viewpoint": "e.g. Economic Perspective", "summary": "..."}}]
}}

Give at most 3 distinct, nuanced perspectives. If there are no verifiable claims, say so.
"#,
        interests = interests_line(prefs),
        keywords = prefs.keywords.join(", "),
        title = article.title,
        source = article.source,
        category = article.category,
        snippet = article.content_snippet,
    )
}

fn briefing_prompt(articles: &[Article]) -> String {
    let listing: Vec<String> = articles
        .iter()
        .map(|a| {
            let summary = a
                .analysis
                .as_ref()
                .map(|x| x.summary.as_str())
                .unwrap_or(a.content_snippet.as_str());
            format!("- {} ({}) <{}>: {}", a.title, a.source, a.link, summary)
        })
        .collect();

    format!(
        r#"Write today's briefing from these articles.

ARTICLES:
{listing}

OUTPUT FORMAT (strict JSON):
{{
  "title": "newspaper-style headline",
  "executiveSummary": "narrative synthesis, 300-400 words",
  "keyDevelopments": [{{"summary": "...", "sourceTitle": "article title", "sourceUrl": "article URL"}}],
  "perspectives": [{{"viewpoint": "...", "summary": "..."}}]
}}

List the 3-5 most important developments and 2-3 perspectives.
"#,
        listing = listing.join("\n"),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisJson {
    summary: String,
    general_relevance: f64,
    fact_check: FactCheckJson,
    #[serde(default)]
    perspectives: Vec<PerspectiveJson>,
}

#[derive(Debug, Deserialize)]
struct FactCheckJson {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    findings: Vec<FindingJson>,
}

#[derive(Debug, Deserialize)]
struct FindingJson {
    claim: String,
    #[serde(default)]
    verdict: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PerspectiveJson {
    viewpoint: String,
    summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BriefingJson {
    title: String,
    executive_summary: String,
    #[serde(default)]
    key_developments: Vec<KeyDevelopmentJson>,
    #[serde(default)]
    perspectives: Vec<PerspectiveJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyDevelopmentJson {
    summary: String,
    #[serde(default)]
    source_title: String,
    #[serde(default)]
    source_url: String,
}

impl From<PerspectiveJson> for Perspective {
    fn from(p: PerspectiveJson) -> Self {
        Perspective {
            viewpoint: p.viewpoint,
            summary: p.summary,
        }
    }
}

#[async_trait::async_trait]
impl Analyzer for LlmAnalyst {
    async fn analyze(&self, article: &Article, prefs: &Preferences) -> Result<Analysis, AnalysisError> {
        let prompt = analysis_prompt(article, prefs);
        let json = Self::complete(self.analysis.as_ref(), ANALYST_PERSONA, prompt, 0.2).await?;
        let parsed: AnalysisJson = serde_json::from_str(&json)
            .map_err(|e| AnalysisError::Malformed(format!("{} (input: {})", e, json)))?;

        let general = parsed.general_relevance.round().clamp(1.0, 10.0) as u8;

        Ok(Analysis {
            summary: parsed.summary,
            general_relevance: general,
            // scored locally so it tracks the user's current weights
            personal_relevance: personal_relevance(article, prefs),
            fact_check: FactCheck {
                summary: parsed.fact_check.summary,
                findings: parsed
                    .fact_check
                    .findings
                    .into_iter()
                    .map(|f| Finding {
                        claim: f.claim,
                        verdict: f.verdict,
                        source: f.source.filter(|s| !s.trim().is_empty()),
                    })
                    .collect(),
            },
            perspectives: parsed
                .perspectives
                .into_iter()
                .take(MAX_PERSPECTIVES)
                .map(Perspective::from)
                .collect(),
        })
    }
}

#[async_trait::async_trait]
impl Briefer for LlmAnalyst {
    async fn write_briefing(&self, articles: &[Article], _prefs: &Preferences) -> Result<Briefing, AnalysisError> {
        let prompt = briefing_prompt(articles);
        let json = Self::complete(self.briefing.as_ref(), BRIEFER_PERSONA, prompt, 0.5).await?;
        let parsed: BriefingJson = serde_json::from_str(&json)
            .map_err(|e| AnalysisError::Malformed(format!("{} (input: {})", e, json)))?;

        Ok(Briefing {
            title: parsed.title,
            executive_summary: parsed.executive_summary,
            key_developments: parsed
                .key_developments
                .into_iter()
                .map(|k| KeyDevelopment {
                    summary: k.summary,
                    source_title: k.source_title,
                    source_url: k.source_url,
                })
                .collect(),
            perspectives: parsed.perspectives.into_iter().map(Perspective::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use crate::preferences::CategoryWeight;
    use chrono::Utc;

    struct Canned(String);

    #[async_trait::async_trait]
    impl LlmProvider for Canned {
        async fn generate(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse {
                content: self.0.clone(),
                usage: UsageMetadata::default(),
                model: "canned".into(),
            })
        }
    }

    struct Down;

    #[async_trait::async_trait]
    impl LlmProvider for Down {
        async fn generate(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            anyhow::bail!("connection refused")
        }
    }

    fn article() -> Article {
        Article {
            id: "https://example.org/a".into(),
            title: "Rust 2.0 announced".into(),
            link: "https://example.org/a".into(),
            source: "Hacker News".into(),
            category: "Technology".into(),
            subcategory: None,
            content_snippet: "The language team...".into(),
            published_at: Utc::now(),
            analysis: None,
        }
    }

    fn prefs() -> Preferences {
        Preferences {
            categories: vec![CategoryWeight::new("Technology", 4)],
            keywords: vec!["rust".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn parses_fenced_analysis_and_scores_locally() {
        let reply = r#"Here is the analysis:
```json
{
  "summary": "A new major version.",
  "generalRelevance": 14,
  "personalRelevance": 1,
  "factCheck": {"summary": "Announced on the official blog.", "findings": [
    {"claim": "2.0 ships next year", "verdict": "Unverified", "source": ""}
  ]},
  "perspectives": [
    {"viewpoint": "A", "summary": "a"}, {"viewpoint": "B", "summary": "b"},
    {"viewpoint": "C", "summary": "c"}, {"viewpoint": "D", "summary": "d"}
  ]
}
```"#;
        let analyst = LlmAnalyst::new(Arc::new(Canned(reply.into())));
        let analysis = analyst.analyze(&article(), &prefs()).await.unwrap();
        assert_eq!(analysis.general_relevance, 10);
        // 3 + 4 + 3
        assert_eq!(analysis.personal_relevance, 10);
        assert_eq!(analysis.perspectives.len(), 3);
        assert_eq!(analysis.fact_check.findings[0].source, None);
    }

    #[tokio::test]
    async fn malformed_and_upstream_errors_are_distinguished() {
        let analyst = LlmAnalyst::new(Arc::new(Canned("I cannot help with that.".into())));
        assert!(matches!(
            analyst.analyze(&article(), &prefs()).await,
            Err(AnalysisError::Malformed(_))
        ));

        let analyst = LlmAnalyst::new(Arc::new(Canned(r#"{"summary": "missing fields"}"#.into())));
        assert!(matches!(
            analyst.analyze(&article(), &prefs()).await,
            Err(AnalysisError::Malformed(_))
        ));

        let analyst = LlmAnalyst::new(Arc::new(Down));
        assert!(matches!(
            analyst.analyze(&article(), &prefs()).await,
            Err(AnalysisError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn briefing_uses_its_own_provider() {
        let briefing = r#"{"title": "Morning Brief", "executiveSummary": "Quiet day.",
            "keyDevelopments": [{"summary": "Rust", "sourceTitle": "Rust 2.0 announced", "sourceUrl": "https://example.org/a"}],
            "perspectives": []}"#;
        let analyst = LlmAnalyst::new(Arc::new(Down)).with_briefing_provider(Arc::new(Canned(briefing.into())));
        let out = analyst.write_briefing(&[article()], &prefs()).await.unwrap();
        assert_eq!(out.title, "Morning Brief");
        assert_eq!(out.key_developments.len(), 1);
    }
}
