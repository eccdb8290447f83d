//! Catalog of content sources.
//!
//! A built-in list of well-known feeds, extended by `[[sources]]` entries
//! from the config file. Users pick sources by id in their preferences.

use common::SourceConfig;

use crate::model::ContentSource;

pub const CATEGORIES: &[&str] = &[
    "Technology",
    "News",
    "Brazilian News",
    "Politics",
    "Finance",
    "Science",
];

// (id, name, url, category)
const BUILTIN: &[(&str, &str, &str, &str)] = &[
    ("hacker-news", "Hacker News", "https://hnrss.org/frontpage", "Technology"),
    ("techcrunch", "TechCrunch", "https://techcrunch.com/feed/", "Technology"),
    ("the-verge", "The Verge", "https://www.theverge.com/rss/index.xml", "Technology"),
    ("ars-technica", "Ars Technica", "https://feeds.arstechnica.com/arstechnica/index", "Technology"),
    ("olhar-digital", "Olhar Digital", "https://olhardigital.com.br/feed/", "Technology"),
    ("tecmundo", "TecMundo", "https://www.tecmundo.com.br/feed", "Technology"),
    ("bbc-news", "BBC News", "http://feeds.bbci.co.uk/news/rss.xml", "News"),
    ("al-jazeera", "Al Jazeera", "https://www.aljazeera.com/xml/rss/all.xml", "News"),
    ("guardian", "The Guardian", "https://www.theguardian.com/world/rss", "News"),
    ("nyt", "New York Times", "https://rss.nytimes.com/services/xml/rss/nyt/World.xml", "News"),
    ("france24", "France 24", "https://www.france24.com/en/rss", "News"),
    ("dw", "Deutsche Welle", "https://rss.dw.com/xml/rss-en-all", "News"),
    ("npr", "NPR News", "https://feeds.npr.org/1001/rss.xml", "News"),
    ("politico", "Politico", "https://www.politico.com/rss/politics08.xml", "Politics"),
    ("the-hill", "The Hill", "https://thehill.com/feed/", "Politics"),
    ("foreign-policy", "Foreign Policy", "https://foreignpolicy.com/feed/", "Politics"),
    ("g1", "G1", "https://g1.globo.com/rss/g1/", "Brazilian News"),
    ("folha", "Folha de S.Paulo", "https://www1.folha.uol.com.br/rss/emcimadahora.xml", "Brazilian News"),
    ("estadao", "Estadão", "https://www.estadao.com.br/rss/ultimasnoticias.xml", "Brazilian News"),
    ("yahoo-finance", "Yahoo Finance", "https://finance.yahoo.com/news/rssindex", "Finance"),
    ("coindesk", "CoinDesk", "https://www.coindesk.com/arc/outboundfeeds/rss/", "Finance"),
    ("marketwatch", "MarketWatch", "http://feeds.marketwatch.com/marketwatch/topstories/", "Finance"),
    ("infomoney", "InfoMoney", "https://www.infomoney.com.br/feed/", "Finance"),
    ("mit-tech-review", "MIT Technology Review", "https://www.technologyreview.com/feed/", "Science"),
    ("science-daily", "ScienceDaily", "https://www.sciencedaily.com/rss/all.xml", "Science"),
    ("nature", "Nature", "https://www.nature.com/nature.rss", "Science"),
];

#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: Vec<ContentSource>,
}

impl SourceCatalog {
    pub fn builtin() -> Self {
        Self {
            sources: BUILTIN
                .iter()
                .map(|(id, name, url, category)| ContentSource::new(id, name, url, category))
                .collect(),
        }
    }

    /// Built-in catalog plus configured sources. A configured source with an
    /// id already in the catalog replaces it.
    pub fn with_configured(configured: &[SourceConfig]) -> Self {
        let mut catalog = Self::builtin();
        for sc in configured {
            let mut source = ContentSource::new(&sc.id, &sc.name, &sc.url, &sc.category);
            source.subcategory = sc.subcategory.clone();
            catalog.insert(source);
        }
        catalog
    }

    pub fn insert(&mut self, source: ContentSource) {
        match self.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ContentSource> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn all(&self) -> &[ContentSource] {
        &self.sources
    }

    /// Sources for the selected ids, in selection order. Unknown ids are
    /// skipped with a warning.
    pub fn resolve(&self, ids: &[String]) -> Vec<ContentSource> {
        ids.iter()
            .filter_map(|id| {
                let found = self.get(id).cloned();
                if found.is_none() {
                    tracing::warn!("Unknown content source id '{}', skipping", id);
                }
                found
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_ids_are_unique_and_categorized() {
        let catalog = SourceCatalog::builtin();
        let mut ids: Vec<&str> = catalog.all().iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), catalog.all().len());
        assert!(catalog.all().iter().all(|s| CATEGORIES.contains(&s.category.as_str())));
    }

    #[test]
    fn configured_sources_extend_and_override() {
        let configured = vec![
            SourceConfig {
                id: "local-paper".into(),
                name: "Local Paper".into(),
                url: "https://example.org/rss".into(),
                category: "News".into(),
                subcategory: Some("Local News".into()),
            },
            SourceConfig {
                id: "hacker-news".into(),
                name: "HN Best".into(),
                url: "https://hnrss.org/best".into(),
                category: "Technology".into(),
                subcategory: None,
            },
        ];
        let catalog = SourceCatalog::with_configured(&configured);
        assert_eq!(catalog.get("hacker-news").unwrap().url, "https://hnrss.org/best");
        assert_eq!(
            catalog.get("local-paper").unwrap().subcategory.as_deref(),
            Some("Local News")
        );

        let picked = catalog.resolve(&["local-paper".into(), "missing".into(), "npr".into()]);
        let ids: Vec<&str> = picked.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["local-paper", "npr"]);
    }
}
