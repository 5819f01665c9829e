//! Vertex AI model-garden provider (`generateContent`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{endpoint, http_client, truncate, TextModel};
use crate::config::ModelConfig;
use crate::error::ModelError;

pub struct VertexModel {
    client: reqwest::Client,
    url: Url,
    access_token: String,
}

impl VertexModel {
    pub fn new(url: Url, access_token: String, timeout_secs: u64) -> Result<Self, ModelError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            url,
            access_token,
        })
    }

    /// Needs a project and a bearer token (config or `GOOGLE_ACCESS_TOKEN`).
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, ModelError> {
        let project = cfg
            .project
            .as_deref()
            .ok_or_else(|| ModelError::Config("vertex provider requires model.project".into()))?;
        let token = cfg
            .access_token
            .clone()
            .or_else(|| std::env::var("GOOGLE_ACCESS_TOKEN").ok())
            .ok_or_else(|| {
                ModelError::Config(
                    "vertex provider requires model.access_token or GOOGLE_ACCESS_TOKEN".into(),
                )
            })?;
        let default_base = format!("https://{}-aiplatform.googleapis.com/v1", cfg.location);
        let base = cfg.api_base.as_deref().unwrap_or(&default_base);
        let path = format!(
            "projects/{project}/locations/{}/publishers/google/models/{}:generateContent",
            cfg.location, cfg.model
        );
        Self::new(endpoint(base, &path)?, token, cfg.timeout_secs)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

fn response_text(resp: GenerateResponse) -> Result<String, ModelError> {
    let text: String = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        Err(ModelError::EmptyResponse)
    } else {
        Ok(text)
    }
}

#[async_trait]
impl TextModel for VertexModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0, "topP": 0},
        });
        let resp = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::Transport(format!(
                "HTTP {status} from {}: {}",
                self.url,
                truncate(&text, 300)
            )));
        }
        let parsed: GenerateResponse = resp.json().await?;
        let text = response_text(parsed)?;
        debug!(chars = text.len(), "vertex generation received");
        Ok(text)
    }
}
