//! Layered configuration: built-in defaults, then an optional TOML file, then
//! `SENSEMAKER_*` environment variables (`__` separates nested keys, e.g.
//! `SENSEMAKER_MODEL__API_KEY`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PipelineError;
use crate::model::{Limiter, RetryPolicy};

const CONFIG_FILE: &str = "sensemaker";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {}", .issues.join("; "))]
    Invalid { issues: Vec<String> },
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Vertex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    /// Overrides the provider's default endpoint root.
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub project: Option<String>,
    pub location: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".into(),
            api_base: None,
            api_key: None,
            project: None,
            location: "us-central1".into(),
            access_token: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensemakerConfig {
    /// Topics with fewer comments are skipped by the idea pipeline.
    pub min_comments: usize,
    pub max_ideas: usize,
    /// Ideas supported by fewer comments are dropped.
    pub min_proposals: usize,
    pub categorization_depth: u8,
    pub min_topics: usize,
    pub max_topics: usize,
    /// Concurrent in-flight model calls per gateway.
    pub model_parallelism: usize,
    /// Re-requests for comments the model left out of a batch answer.
    pub max_retries: u32,
    /// Attempts per model call, first attempt included.
    pub max_llm_retries: u32,
    pub llm_retry_delay_ms: u64,
    pub batch_size: usize,
    pub batch_token_budget: usize,
    pub consensus_threshold: f64,
    pub controversy_threshold: f64,
    /// Run the relevance-scoring pass after categorization in a full run.
    pub calculate_relevance: bool,
    pub model: ModelConfig,
}

impl Default for SensemakerConfig {
    fn default() -> Self {
        Self {
            min_comments: 5,
            max_ideas: 10,
            min_proposals: 3,
            categorization_depth: 2,
            min_topics: 3,
            max_topics: 10,
            model_parallelism: 2,
            max_retries: 3,
            max_llm_retries: 9,
            llm_retry_delay_ms: 5000,
            batch_size: 100,
            batch_token_budget: 12_000,
            consensus_threshold: 0.7,
            controversy_threshold: 0.5,
            calculate_relevance: false,
            model: ModelConfig::default(),
        }
    }
}

impl SensemakerConfig {
    /// Load from `path` if given, else from `./sensemaker.toml` when present,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(CONFIG_FILE).required(false),
        };
        let cfg: SensemakerConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("SENSEMAKER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        if self.model_parallelism == 0 {
            issues.push("model_parallelism must be at least 1".to_string());
        }
        if self.max_llm_retries == 0 {
            issues.push("max_llm_retries must be at least 1".to_string());
        }
        if !(1..=3).contains(&self.categorization_depth) {
            issues.push(format!(
                "categorization_depth must be 1, 2 or 3, got {}",
                self.categorization_depth
            ));
        }
        if self.min_topics > self.max_topics {
            issues.push(format!(
                "min_topics ({}) exceeds max_topics ({})",
                self.min_topics, self.max_topics
            ));
        }
        if self.max_ideas == 0 {
            issues.push("max_ideas must be at least 1".to_string());
        }
        if self.batch_size == 0 {
            issues.push("batch_size must be at least 1".to_string());
        }
        for (name, value) in [
            ("consensus_threshold", self.consensus_threshold),
            ("controversy_threshold", self.controversy_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                issues.push(format!("{name} must be within 0..=1, got {value}"));
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_llm_retries,
            Duration::from_millis(self.llm_retry_delay_ms),
        )
    }

    /// Gateway limiter: bounds in-flight model calls.
    pub fn limiter(&self) -> Limiter {
        Limiter::bounded(self.model_parallelism)
    }

    /// Fan-out limiter for batches and topics. Kept apart from the gateway
    /// limiter so a task holding a slot never waits on its own model calls.
    pub fn task_limiter(&self) -> Limiter {
        Limiter::bounded(self.model_parallelism)
    }
}
