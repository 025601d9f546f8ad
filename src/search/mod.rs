//! Search Module
//!
//! Web search used to gather evidence for answer revisions. The agent core only
//! sees the [`SearchProvider`] trait; SerpAPI (Google Light or Google Scholar)
//! is the bundled implementation.

pub mod serpapi;

pub use serpapi::{SearchEngine, SearchError, SerpApiClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single search result, engine independent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}
