// Reflexion Agent - iterative answer refinement through self-critique and search

pub mod agents;
pub mod config;
pub mod llm;
pub mod models;
pub mod search; // Search APIs (SerpAPI for Google Light and Scholar)
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use agents::{build_graph, FinalAnswer, ReflexionGraph};
pub use config::Config;
pub use models::{History, Message};
pub use types::{AppError, AppResult};
