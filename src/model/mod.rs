//! Model invocation gateway.
//!
//! `TextModel` is the injected capability: anything that turns a prompt into
//! text. `ModelGateway` wraps one model with a concurrency `Limiter` and a
//! `RetryPolicy`, and adds structured generation on top: the prompt gets the
//! schema plus a synthetic example instance, the answer is unfenced, parsed
//! and validated, and any retryable failure (transport, empty answer,
//! malformed JSON, schema violation) triggers a fresh generation until the
//! attempt ceiling is reached.

pub mod openai;
pub mod vertex;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use url::Url;

use crate::algo::schema::{self, Schema, SchemaError};
use crate::config::{ModelConfig, Provider, SensemakerConfig};
use crate::error::ModelError;

#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Bound on concurrent work. Cloning shares the same permits.
#[derive(Debug, Clone)]
pub struct Limiter {
    permits: Option<Arc<Semaphore>>,
    width: Option<usize>,
}

impl Limiter {
    /// At most `width` holders at once. A width of zero is treated as one.
    pub fn bounded(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Some(Arc::new(Semaphore::new(width))),
            width: Some(width),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            permits: None,
            width: None,
        }
    }

    pub fn width(&self) -> Option<usize> {
        self.width
    }

    /// Wait for a slot. The slot is released when the returned guard drops;
    /// an unbounded limiter returns `None` immediately.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.permits {
            Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, first attempt included.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Same ceiling, no pause between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(9, Duration::from_millis(5000))
    }
}

#[derive(Clone)]
pub struct ModelGateway {
    model: Arc<dyn TextModel>,
    limiter: Limiter,
    retry: RetryPolicy,
}

impl ModelGateway {
    pub fn new(model: Arc<dyn TextModel>, limiter: Limiter, retry: RetryPolicy) -> Self {
        Self {
            model,
            limiter,
            retry,
        }
    }

    /// Build the configured provider with the configured limiter and retries.
    pub fn from_config(cfg: &SensemakerConfig) -> Result<Self, ModelError> {
        Ok(Self::new(
            build_model(&cfg.model)?,
            cfg.limiter(),
            cfg.retry_policy(),
        ))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Free-form generation. Blank answers count as failures.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
        self.with_retries(prompt, |raw| {
            if raw.trim().is_empty() {
                Err(ModelError::EmptyResponse)
            } else {
                Ok(raw)
            }
        })
        .await
    }

    /// Structured generation: the returned value is guaranteed to satisfy
    /// `schema`.
    pub async fn generate_data(&self, prompt: &str, schema: &Schema) -> Result<Value, ModelError> {
        let prompt = structured_prompt(prompt, schema);
        self.with_retries(&prompt, |raw| parse_structured(&raw, schema))
            .await
    }

    /// Structured generation decoded into `T`. A value that passes the schema
    /// but fails to deserialize is retried like a schema violation.
    pub async fn generate_typed<T>(&self, prompt: &str, schema: &Schema) -> Result<T, ModelError>
    where
        T: DeserializeOwned,
    {
        let prompt = structured_prompt(prompt, schema);
        self.with_retries(&prompt, |raw| {
            let value = parse_structured(&raw, schema)?;
            serde_json::from_value(value)
                .map_err(|e| ModelError::SchemaViolation(SchemaError::with_issue(e.to_string())))
        })
        .await
    }

    async fn with_retries<T, F>(&self, prompt: &str, parse: F) -> Result<T, ModelError>
    where
        F: Fn(String) -> Result<T, ModelError>,
    {
        let max_attempts = self.retry.max_attempts;
        let mut last_error: Option<ModelError> = None;

        for attempt in 1..=max_attempts {
            let outcome = {
                let _permit = self.limiter.acquire().await;
                self.model.complete(prompt).await
            };
            match outcome.and_then(&parse) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "model call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempt, max_attempts, error = %err, "model call failed");
                    last_error = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(ModelError::Exhausted {
            attempts: max_attempts,
            last: Box::new(last_error.unwrap_or(ModelError::EmptyResponse)),
        })
    }
}

fn structured_prompt(prompt: &str, schema: &Schema) -> String {
    format!("{prompt}\n\n{}", schema::format_instructions(schema))
}

fn parse_structured(raw: &str, schema: &Schema) -> Result<Value, ModelError> {
    let body = schema::strip_code_fences(raw);
    if body.is_empty() {
        return Err(ModelError::EmptyResponse);
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| ModelError::MalformedJson(e.to_string()))?;
    schema.validate(&value)?;
    Ok(value)
}

/// Instantiate the provider named in `cfg`.
pub fn build_model(cfg: &ModelConfig) -> Result<Arc<dyn TextModel>, ModelError> {
    Ok(match cfg.provider {
        Provider::OpenAi => Arc::new(openai::OpenAiModel::from_config(cfg)?),
        Provider::Vertex => Arc::new(vertex::VertexModel::from_config(cfg)?),
    })
}

/// Join `path` onto `base`, treating `base` as a directory.
pub(crate) fn endpoint(base: &str, path: &str) -> Result<Url, ModelError> {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    Url::parse(&base)
        .and_then(|u| u.join(path))
        .map_err(|e| ModelError::Config(format!("invalid endpoint '{base}{path}': {e}")))
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| ModelError::Config(format!("failed to build HTTP client: {e}")))
}

/// Shorten an error body for logs and messages.
pub(crate) fn truncate(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        body.to_string()
    } else {
        let cut: String = body.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::testing::ScriptedModel;
    use super::*;
    use crate::algo::schema::Property;

    fn gateway(model: Arc<ScriptedModel>) -> ModelGateway {
        ModelGateway::new(model, Limiter::bounded(2), RetryPolicy::immediate(9))
    }

    fn names_schema() -> Schema {
        Schema::array(Schema::string())
    }

    #[tokio::test]
    async fn text_retries_blank_answers() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("  "), Ok("hello")]));
        let text = gateway(model.clone()).generate_text("hi").await.unwrap();
        assert_eq!(text, "hello");
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn data_strips_fences_and_validates() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("not json"),
            Ok("[1, 2]"),
            Ok("```json\n[\"a\", \"b\"]\n```"),
        ]));
        let value = gateway(model.clone())
            .generate_data("list", &names_schema())
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!(["a", "b"]));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn structured_prompt_carries_example_instance() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("[]")]));
        gateway(model.clone())
            .generate_data("Name things.", &names_schema())
            .await
            .unwrap();
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("Name things."));
        assert!(prompts[0].contains("Example of the expected format"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ceiling_is_exact() {
        let model = Arc::new(ScriptedModel::new(vec![Err("HTTP 429")]));
        let gw = ModelGateway::new(model.clone(), Limiter::bounded(2), RetryPolicy::default());
        let err = gw.generate_text("hi").await.unwrap_err();
        assert_eq!(model.calls(), 9);
        match err {
            ModelError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 9);
                assert!(matches!(*last, ModelError::Transport(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn answers_that_never_validate_stop_at_the_ceiling() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(r#"{"x": 1}"#)]));
        let gw = ModelGateway::new(model.clone(), Limiter::bounded(2), RetryPolicy::default());
        let err = gw
            .generate_data("list", &names_schema())
            .await
            .unwrap_err();
        assert_eq!(model.calls(), 9);
        match err {
            ModelError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 9);
                assert!(matches!(*last, ModelError::SchemaViolation(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn typed_generation_decodes() {
        #[derive(serde::Deserialize)]
        struct Row {
            id: String,
        }
        let schema = Schema::array(Schema::object(vec![Property::required(
            "id",
            Schema::string(),
        )]));
        let model = Arc::new(ScriptedModel::new(vec![Ok(r#"[{"id": "c1"}]"#)]));
        let rows: Vec<Row> = gateway(model).generate_typed("x", &schema).await.unwrap();
        assert_eq!(rows[0].id, "c1");
    }

    struct SlowModel {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TextModel for SlowModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".into())
        }
    }

    #[tokio::test]
    async fn limiter_bounds_in_flight_calls() {
        let model = Arc::new(SlowModel {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let gw = ModelGateway::new(model.clone(), Limiter::bounded(2), RetryPolicy::immediate(1));
        let calls = (0..6).map(|_| gw.generate_text("p"));
        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(model.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn endpoint_joins_paths() {
        let url = endpoint("https://api.example.com/v1", "chat/completions").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/chat/completions");
        assert!(endpoint("not a url", "x").is_err());
    }
}
