//! Filtering, sorting and paging of the analyzed feed.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::model::Article;

pub const ALL_CATEGORIES: &str = "all";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortMode {
    #[default]
    Date,
    PersonalRelevance,
    GeneralRelevance,
}

impl FromStr for SortMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(SortMode::Date),
            "personal" | "personalRelevance" => Ok(SortMode::PersonalRelevance),
            "general" | "generalRelevance" => Ok(SortMode::GeneralRelevance),
            other => anyhow::bail!("unknown sort mode: {}", other),
        }
    }
}

fn personal_score(a: &Article) -> u8 {
    a.analysis.as_ref().map(|x| x.personal_relevance).unwrap_or(0)
}

fn general_score(a: &Article) -> u8 {
    a.analysis.as_ref().map(|x| x.general_relevance).unwrap_or(0)
}

/// Filter by category (`"all"` keeps everything) and sort descending.
/// Ties keep their incoming order.
pub fn filter_and_sort(articles: &[Article], filter: &str, sort: SortMode) -> Vec<Article> {
    let mut out: Vec<Article> = articles
        .iter()
        .filter(|a| filter == ALL_CATEGORIES || a.category == filter)
        .cloned()
        .collect();

    match sort {
        SortMode::Date => out.sort_by(|a, b| b.published_at.cmp(&a.published_at)),
        SortMode::PersonalRelevance => out.sort_by(|a, b| personal_score(b).cmp(&personal_score(a))),
        SortMode::GeneralRelevance => out.sort_by(|a, b| general_score(b).cmp(&general_score(a))),
    }
    out
}

/// One 1-based page of the filtered, sorted articles. Page 0 reads as page 1;
/// a page past the end is empty.
pub fn view(articles: &[Article], filter: &str, sort: SortMode, page: usize, page_size: usize) -> Vec<Article> {
    let page_size = page_size.max(1);
    let start = page.saturating_sub(1).saturating_mul(page_size);
    filter_and_sort(articles, filter, sort)
        .into_iter()
        .skip(start)
        .take(page_size)
        .collect()
}

pub fn total_pages(count: usize, page_size: usize) -> usize {
    let page_size = page_size.max(1);
    count / page_size + usize::from(count % page_size != 0)
}

/// Current filter, sort and page of a reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub filter: String,
    pub sort: SortMode,
    pub page: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            filter: ALL_CATEGORIES.to_string(),
            sort: SortMode::Date,
            page: 1,
        }
    }
}

impl ViewState {
    pub fn set_filter(&mut self, filter: &str) {
        if self.filter != filter {
            self.filter = filter.to_string();
            self.page = 1;
        }
    }

    pub fn set_sort(&mut self, sort: SortMode) {
        if self.sort != sort {
            self.sort = sort;
            self.page = 1;
        }
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Analysis, FactCheck};
    use chrono::{Duration, Utc};

    fn article(id: &str, category: &str, minutes_ago: i64, general: u8, personal: u8) -> Article {
        Article {
            id: id.into(),
            title: id.into(),
            link: format!("https://example.org/{}", id),
            source: "Src".into(),
            category: category.into(),
            subcategory: None,
            content_snippet: String::new(),
            published_at: Utc::now() - Duration::minutes(minutes_ago),
            analysis: Some(Analysis {
                summary: String::new(),
                general_relevance: general,
                personal_relevance: personal,
                fact_check: FactCheck { summary: String::new(), findings: vec![] },
                perspectives: vec![],
            }),
        }
    }

    fn ids(v: &[Article]) -> Vec<&str> {
        v.iter().map(|a| a.id.as_str()).collect()
    }

    fn sample() -> Vec<Article> {
        vec![
            article("a", "News", 30, 5, 8),
            article("b", "Technology", 10, 9, 8),
            article("c", "News", 20, 5, 2),
            article("d", "Finance", 40, 7, 8),
        ]
    }

    #[test]
    fn sorts_descending_with_stable_ties() {
        let articles = sample();
        assert_eq!(ids(&filter_and_sort(&articles, "all", SortMode::Date)), vec!["b", "c", "a", "d"]);
        assert_eq!(
            ids(&filter_and_sort(&articles, "all", SortMode::PersonalRelevance)),
            vec!["a", "b", "d", "c"]
        );
        assert_eq!(
            ids(&filter_and_sort(&articles, "all", SortMode::GeneralRelevance)),
            vec!["b", "d", "a", "c"]
        );
    }

    #[test]
    fn filters_by_category() {
        let articles = sample();
        assert_eq!(ids(&filter_and_sort(&articles, "News", SortMode::Date)), vec!["c", "a"]);
        assert!(filter_and_sort(&articles, "Science", SortMode::Date).is_empty());
    }

    #[test]
    fn pages_are_one_based() {
        let articles = sample();
        assert_eq!(ids(&view(&articles, "all", SortMode::Date, 1, 3)), vec!["b", "c", "a"]);
        assert_eq!(ids(&view(&articles, "all", SortMode::Date, 2, 3)), vec!["d"]);
        assert!(view(&articles, "all", SortMode::Date, 3, 3).is_empty());
        assert_eq!(total_pages(4, 3), 2);
        assert_eq!(total_pages(0, 3), 0);
    }

    #[test]
    fn huge_pages_are_empty() {
        let articles = sample();
        assert!(view(&articles, "all", SortMode::Date, usize::MAX, 10).is_empty());
        assert!(view(&articles, "all", SortMode::Date, usize::MAX / 3 + 2, 3).is_empty());
        assert_eq!(total_pages(usize::MAX, usize::MAX), 1);
    }

    #[test]
    fn changing_filter_or_sort_resets_page() {
        let mut state = ViewState::default();
        state.set_page(3);
        state.set_filter("all");
        assert_eq!(state.page, 3);
        state.set_filter("News");
        assert_eq!(state.page, 1);

        state.set_page(2);
        state.set_sort(SortMode::GeneralRelevance);
        assert_eq!(state.page, 1);
    }

    #[test]
    fn parses_sort_modes() {
        assert_eq!("personal".parse::<SortMode>().unwrap(), SortMode::PersonalRelevance);
        assert_eq!("generalRelevance".parse::<SortMode>().unwrap(), SortMode::GeneralRelevance);
        assert!("random".parse::<SortMode>().is_err());
    }
}
