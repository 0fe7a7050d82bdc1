use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prompt::build_retry_prompt;

/// Text-generation backend shared by extraction, community reports and
/// query rewriting.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Like `generate`, but the answer must parse as JSON.
    async fn generate_json(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    max_retries: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            max_retries: 3,
            client: reqwest::Client::new(),
        }
    }

    pub fn local() -> Self {
        Self::new("http://localhost:11434".to_string(), "llama3".to_string())
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    async fn request(&self, prompt: &str, json: bool) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: json.then(|| "json".to_string()),
        };

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    /// Generate with retry for invalid JSON
    pub async fn generate_json_with_retry(&self, prompt: &str, max_retries: usize) -> Result<String> {
        for attempt in 0..max_retries {
            let response = self.request(prompt, true).await?;
            if is_json(&response) {
                return Ok(response);
            }

            // If invalid, retry with correction prompt
            if attempt + 1 < max_retries {
                warn!(attempt, model = %self.model, "Model returned invalid JSON, asking for a fix");
                let corrected = self.request(&build_retry_prompt(&response), true).await?;
                if is_json(&corrected) {
                    return Ok(corrected);
                }
            }
        }

        anyhow::bail!("Failed to get valid JSON after {} retries", max_retries)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "Generating");
        self.request(prompt, false).await
    }

    async fn generate_json(&self, prompt: &str) -> Result<String> {
        self.generate_json_with_retry(prompt, self.max_retries).await
    }
}

fn is_json(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text).is_ok()
}
