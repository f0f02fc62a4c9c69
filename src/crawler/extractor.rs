//! Content-extraction collaborator
//!
//! Pulls the title, outgoing links and any rule-selected fields out of an
//! opened page. The orchestrator only counts what comes back.

use crate::crawler::fetcher::{FetchError, PageHandle};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// One named CSS selection; `attribute` picks an attribute instead of text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRules {
    #[serde(default)]
    pub rules: Vec<ExtractionRule>,
}

/// What came out of one page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub title: Option<String>,
    /// Absolute http(s) links, in document order
    pub links: Vec<String>,
    pub fields: BTreeMap<String, Vec<String>>,
}

impl Extraction {
    /// Number of data items counted toward `data_extracted`
    pub fn item_count(&self) -> usize {
        usize::from(self.title.is_some()) + self.fields.values().map(Vec::len).sum::<usize>()
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        page: &PageHandle,
        rules: &ExtractionRules,
    ) -> Result<Extraction, FetchError>;
}

/// HTML extraction with the `scraper` crate
#[derive(Debug, Default)]
pub struct HtmlExtractor;

#[async_trait]
impl Extractor for HtmlExtractor {
    async fn extract(
        &self,
        page: &PageHandle,
        rules: &ExtractionRules,
    ) -> Result<Extraction, FetchError> {
        extract_html(&page.body, &page.final_url, rules).map_err(|message| {
            FetchError::Extraction {
                url: page.requested_url.to_string(),
                message,
            }
        })
    }
}

/// Parses `html` and applies `rules`; links are resolved against `base_url`
pub fn extract_html(
    html: &str,
    base_url: &Url,
    rules: &ExtractionRules,
) -> Result<Extraction, String> {
    let document = Html::parse_document(html);

    let mut fields = BTreeMap::new();
    for rule in &rules.rules {
        let selector = Selector::parse(&rule.selector)
            .map_err(|e| format!("rule '{}': bad selector: {}", rule.name, e))?;

        let values: Vec<String> = document
            .select(&selector)
            .filter_map(|element| match &rule.attribute {
                Some(attr) => element.value().attr(attr).map(str::to_string),
                None => Some(element.text().collect::<String>().trim().to_string()),
            })
            .filter(|value| !value.is_empty())
            .collect();
        fields.insert(rule.name.clone(), values);
    }

    Ok(Extraction {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
        fields,
    })
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter(|element| element.value().attr("download").is_none())
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(href, base_url))
        .collect()
}

fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") || href.starts_with("data:") {
        return None;
    }

    let resolved = base_url.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        // mailto:/tel: links are passed through for the frontier's ignore rules
        "mailto" | "tel" => Some(href.to_string()),
        _ => None,
    }
}
