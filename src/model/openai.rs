//! OpenAI-compatible chat completions provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{endpoint, http_client, truncate, TextModel};
use crate::config::ModelConfig;
use crate::error::ModelError;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiModel {
    client: reqwest::Client,
    url: Url,
    api_key: Option<String>,
    model: String,
}

impl OpenAiModel {
    pub fn new(
        api_base: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            url: endpoint(api_base, "chat/completions")?,
            api_key,
            model: model.into(),
        })
    }

    /// The key comes from the config or `OPENAI_API_KEY`. A missing key is
    /// allowed so local OpenAI-compatible servers work without auth.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        Self::new(
            cfg.api_base.as_deref().unwrap_or(DEFAULT_API_BASE),
            api_key,
            cfg.model.clone(),
            cfg.timeout_secs,
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn response_text(resp: ChatResponse) -> Result<String, ModelError> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(ModelError::EmptyResponse)
}

#[async_trait]
impl TextModel for OpenAiModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        });
        let mut request = self.client.post(self.url.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::Transport(format!(
                "HTTP {status} from {}: {}",
                self.url,
                truncate(&text, 300)
            )));
        }
        let parsed: ChatResponse = resp.json().await?;
        let text = response_text(parsed)?;
        debug!(model = %self.model, chars = text.len(), "chat completion received");
        Ok(text)
    }
}
