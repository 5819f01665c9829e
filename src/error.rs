use thiserror::Error;

use crate::algo::schema::SchemaError;

/// Failures from a single model call. Every variant except `Exhausted` and
/// `Config` is retried by the gateway.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model transport error: {0}")]
    Transport(String),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("model response is not valid JSON: {0}")]
    MalformedJson(String),
    #[error(transparent)]
    SchemaViolation(#[from] SchemaError),
    #[error("model call failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ModelError>,
    },
    #[error("model configuration error: {0}")]
    Config(String),
}

impl ModelError {
    /// Whether the gateway should regenerate after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::Transport(_)
                | ModelError::EmptyResponse
                | ModelError::MalformedJson(_)
                | ModelError::SchemaViolation(_)
        )
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {}", .issues.join("; "))]
    InputValidation { issues: Vec<String> },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("batch {batch} panicked: {message}")]
    BatchPanicked { batch: usize, message: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn invalid(issue: impl Into<String>) -> Self {
        PipelineError::InputValidation {
            issues: vec![issue.into()],
        }
    }
}

/// Why one topic's idea run did not produce results. Captured per topic in
/// the run report; never aborts sibling topics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("topic '{topic}' failed during {phase}: {message}")]
pub struct TopicFailure {
    pub topic: String,
    pub phase: &'static str,
    pub message: String,
}
