//! SerpAPI Client
//!
//! Provides search functionality using SerpAPI for:
//! - Google Light: Quick general web search (default)
//! - Google Scholar: Academic papers, for research-heavy questions
//!
//! Both engines return an `organic_results` array which is normalised into
//! [`SearchHit`]s.

use super::{SearchHit, SearchProvider};
use async_trait::async_trait;
use serde_json::Value;
use serpapi_search_rust::serp_api_search::SerpApiSearch;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during search operations
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("SerpAPI key not configured")]
    NoApiKey,

    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse search results: {0}")]
    ParseError(String),

    #[error("No results found for query")]
    NoResults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEngine {
    Light,
    Scholar,
}

impl SearchEngine {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "light" | "google_light" => Some(SearchEngine::Light),
            "scholar" | "google_scholar" => Some(SearchEngine::Scholar),
            _ => None,
        }
    }

    fn engine_param(&self) -> &'static str {
        match self {
            SearchEngine::Light => "google_light",
            SearchEngine::Scholar => "google_scholar",
        }
    }
}

/// SerpAPI client
pub struct SerpApiClient {
    api_key: String,
    engine: SearchEngine,
    max_results: usize,
}

impl SerpApiClient {
    /// Create a new SerpAPI client
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            engine: SearchEngine::Light,
            max_results: 5,
        }
    }

    /// Configure client from config
    pub fn from_config(config: &crate::config::SearchConfig) -> Result<Self, SearchError> {
        if config.serpapi_key.is_empty() {
            return Err(SearchError::NoApiKey);
        }

        Ok(Self {
            api_key: config.serpapi_key.clone(),
            engine: config.engine,
            max_results: config.max_results,
        })
    }

    /// Set maximum results per search
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn with_engine(mut self, engine: SearchEngine) -> Self {
        self.engine = engine;
        self
    }

    fn params(&self, query: &str) -> HashMap<String, String> {
        let mut params = HashMap::<String, String>::new();
        params.insert("engine".to_string(), self.engine.engine_param().to_string());
        params.insert("q".to_string(), query.to_string());
        params.insert("hl".to_string(), "en".to_string());
        if self.engine == SearchEngine::Light {
            params.insert("gl".to_string(), "us".to_string());
        }
        params.insert("num".to_string(), self.max_results.to_string());
        params
    }
}

#[async_trait]
impl SearchProvider for SerpApiClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        info!(query = %query, engine = ?self.engine, "Searching via SerpAPI");

        let search = SerpApiSearch::google(self.params(query), self.api_key.clone());

        let results = search
            .json()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

        debug!("Raw SerpAPI response received");

        let hits = parse_organic_results(&results, self.engine, self.max_results)?;
        info!(count = hits.len(), "SerpAPI search completed");
        Ok(hits)
    }
}

/// Normalise the `organic_results` array of a SerpAPI response
pub(crate) fn parse_organic_results(
    results: &Value,
    engine: SearchEngine,
    max_results: usize,
) -> Result<Vec<SearchHit>, SearchError> {
    if let Some(error) = results.get("error").and_then(|v| v.as_str()) {
        return Err(SearchError::RequestFailed(error.to_string()));
    }

    let organic_results = results.get("organic_results").ok_or(SearchError::NoResults)?;

    let results_array = organic_results
        .as_array()
        .ok_or_else(|| SearchError::ParseError("Expected array of results".to_string()))?;

    if results_array.is_empty() {
        return Err(SearchError::NoResults);
    }

    let hits = results_array
        .iter()
        .take(max_results)
        .map(|result| {
            let title = result
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled")
                .to_string();

            let mut snippet = result
                .get("snippet")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let mut link = result
                .get("link")
                .and_then(|v| v.as_str())
                .map(String::from);

            if engine == SearchEngine::Scholar {
                // "Authors - Journal, Year" gives the model something to cite
                if let Some(summary) = result
                    .get("publication_info")
                    .and_then(|p| p.get("summary"))
                    .and_then(|v| v.as_str())
                {
                    snippet = format!("{snippet} ({summary})");
                }
                if link.is_none() {
                    link = extract_doi(&snippet).map(|doi| format!("https://doi.org/{doi}"));
                }
            }

            SearchHit {
                title,
                link: link.unwrap_or_default(),
                snippet,
            }
        })
        .collect();

    Ok(hits)
}

/// Extract DOI from a string (URL or text)
fn extract_doi(text: &str) -> Option<String> {
    // DOI pattern: 10.xxxx/xxxxx
    let doi_patterns = ["doi.org/", "doi:", "DOI:", "DOI "];

    for pattern in doi_patterns {
        if let Some(pos) = text.find(pattern) {
            let start = pos + pattern.len();
            let doi_part: String = text[start..]
                .trim_start()
                .chars()
                .take_while(|c| !c.is_whitespace() && *c != '"' && *c != '>' && *c != '<' && *c != ')')
                .collect();
            if doi_part.starts_with("10.") {
                return Some(doi_part);
            }
        }
    }

    None
}
