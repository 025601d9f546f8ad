use crate::search::SearchEngine;
use crate::types::LLMProvider;
use anyhow::{anyhow, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LLMConfig,
    pub search: SearchConfig,
    pub agent: AgentConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub model: String,
    pub openai_api_key: String,
    pub groq_api_key: String,
    pub openrouter_api_key: String,
    /// Overrides the provider's default base URL (self-hosted gateways, tests)
    pub api_base: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_retries: u32,
}

impl LLMConfig {
    /// API key for the configured provider, if one is set
    pub fn active_api_key(&self) -> Option<String> {
        let key = match self.provider {
            LLMProvider::OpenAI => &self.openai_api_key,
            LLMProvider::Groq => &self.groq_api_key,
            LLMProvider::OpenRouter => &self.openrouter_api_key,
        };
        (!key.is_empty()).then(|| key.clone())
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub serpapi_key: String,
    pub engine: SearchEngine,
    pub max_results: usize,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Tool-result messages after which the loop ends
    pub max_iterations: usize,
    /// Fallback cap on revisions; defaults to twice `max_iterations`
    pub max_revisions: Option<usize>,
    pub tool_concurrency: usize,
    pub run_timeout_secs: Option<u64>,
}

impl AgentConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            max_revisions: None,
            tool_concurrency: 4,
            run_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub filter: String,
    pub log_dir: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let provider_name = env::var("REFLEXION_LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = LLMProvider::parse(&provider_name)
            .ok_or_else(|| anyhow!("Unsupported LLM provider: {}", provider_name))?;

        let engine_name = env::var("SEARCH_ENGINE").unwrap_or_else(|_| "light".to_string());
        let engine = SearchEngine::parse(&engine_name)
            .ok_or_else(|| anyhow!("Unsupported search engine: {}", engine_name))?;

        let config = Self {
            llm: LLMConfig {
                provider,
                model: env::var("REFLEXION_LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
                openrouter_api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
                api_base: env::var("REFLEXION_LLM_API_BASE").ok(),
                temperature: optional_var("REFLEXION_LLM_TEMPERATURE")?,
                max_tokens: optional_var("REFLEXION_LLM_MAX_TOKENS")?,
                max_retries: env::var("REFLEXION_LLM_MAX_RETRIES")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()?,
            },
            search: SearchConfig {
                serpapi_key: env::var("SERPAPI_API_KEY").unwrap_or_default(),
                engine,
                max_results: env::var("SEARCH_MAX_RESULTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            },
            agent: AgentConfig {
                max_iterations: env::var("REFLEXION_MAX_ITERATIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()?,
                max_revisions: optional_var("REFLEXION_MAX_REVISIONS")?,
                tool_concurrency: env::var("REFLEXION_TOOL_CONCURRENCY")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()?,
                run_timeout_secs: optional_var("REFLEXION_RUN_TIMEOUT_SECS")?,
            },
            log: LogConfig {
                filter: env::var("RUST_LOG").unwrap_or_else(|_| "reflexion_agent=info".to_string()),
                log_dir: env::var("LOG_DIR").ok(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(anyhow!("REFLEXION_MAX_ITERATIONS must be at least 1"));
        }
        if self.agent.tool_concurrency == 0 {
            return Err(anyhow!("REFLEXION_TOOL_CONCURRENCY must be at least 1"));
        }
        Ok(())
    }
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => Ok(Some(raw.trim().parse()?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            llm: LLMConfig {
                provider: LLMProvider::Groq,
                model: "llama-3.3-70b-versatile".to_string(),
                openai_api_key: "sk-openai".to_string(),
                groq_api_key: String::new(),
                openrouter_api_key: String::new(),
                api_base: None,
                temperature: None,
                max_tokens: None,
                max_retries: 2,
            },
            search: SearchConfig {
                serpapi_key: String::new(),
                engine: SearchEngine::Light,
                max_results: 5,
            },
            agent: AgentConfig::default(),
            log: LogConfig {
                filter: "reflexion_agent=info".to_string(),
                log_dir: None,
            },
        }
    }

    #[test]
    fn test_active_api_key_follows_provider() {
        let mut config = sample();
        assert_eq!(config.llm.active_api_key(), None);
        config.llm.provider = LLMProvider::OpenAI;
        assert_eq!(config.llm.active_api_key().as_deref(), Some("sk-openai"));
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = sample();
        assert!(config.validate().is_ok());
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agent_defaults() {
        let agent = AgentConfig::default();
        assert_eq!(agent.max_iterations, 2);
        assert_eq!(agent.run_timeout(), None);
    }
}
