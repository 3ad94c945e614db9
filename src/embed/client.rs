//! Embedding client for Ollama and OpenAI-compatible servers

use crate::config::{EmbeddingServiceConfig, LLMProvider};
use crate::embed::{EmbedError, EmbedResult, EmbeddingService};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for interacting with LLM APIs to generate embeddings
pub struct EmbeddingClient {
    client: Client,
    provider: LLMProvider,
    api_key: Option<String>,
    api_base_url: String,
}

impl EmbeddingClient {
    /// Create a new embedding client based on configuration
    pub fn new(config: &EmbeddingServiceConfig) -> EmbedResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Config(e.to_string()))?;

        if config.provider == LLMProvider::OpenAI && config.api_key.is_none() {
            return Err(EmbedError::Config("OpenAI requires API key".to_string()));
        }

        let api_base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| config.provider.default_base_url().to_string());

        Ok(Self {
            client,
            provider: config.provider,
            api_key: config.api_key.clone(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn openai_embedding(&self, text: &str, model: &str) -> EmbedResult<Vec<f32>> {
        #[derive(Serialize)]
        struct OpenAIRequest<'a> {
            input: &'a str,
            model: &'a str,
        }

        #[derive(Deserialize)]
        struct OpenAIResponse {
            data: Vec<OpenAIData>,
        }

        #[derive(Deserialize)]
        struct OpenAIData {
            embedding: Vec<f32>,
        }

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EmbedError::Config("OpenAI requires API key".to_string()))?;

        let url = format!("{}/embeddings", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&OpenAIRequest { input: text, model })
            .send()
            .await
            .map_err(transport_error)?;

        let resp = check_status(resp, "OpenAI").await?;
        let result: OpenAIResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Serialization(e.to_string()))?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::Api("OpenAI returned no embedding".to_string()))
    }

    async fn ollama_embedding(&self, text: &str, model: &str) -> EmbedResult<Vec<f32>> {
        #[derive(Serialize)]
        struct OllamaRequest<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct OllamaResponse {
            embedding: Vec<f32>,
        }

        let url = format!("{}/api/embeddings", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .json(&OllamaRequest { model, prompt: text })
            .send()
            .await
            .map_err(transport_error)?;

        let resp = check_status(resp, "Ollama").await?;
        let result: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Serialization(e.to_string()))?;
        Ok(result.embedding)
    }
}

#[async_trait]
impl EmbeddingService for EmbeddingClient {
    async fn embed(&self, text: &str, model_version: &str) -> EmbedResult<Vec<f32>> {
        debug!(provider = ?self.provider, model = model_version, chars = text.len(), "embedding text");
        let vector = match self.provider {
            LLMProvider::OpenAI => self.openai_embedding(text, model_version).await?,
            LLMProvider::Ollama => self.ollama_embedding(text, model_version).await?,
        };
        if vector.is_empty() {
            return Err(EmbedError::Api("service returned an empty vector".to_string()));
        }
        Ok(vector)
    }
}

fn transport_error(e: reqwest::Error) -> EmbedError {
    EmbedError::Unavailable(e.to_string())
}

async fn check_status(resp: reqwest::Response, provider: &str) -> EmbedResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let error_text = resp.text().await.unwrap_or_default();
    let message = format!("{} returned {}: {}", provider, status, error_text);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(EmbedError::Unavailable(message))
    } else {
        Err(EmbedError::Api(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_key() {
        let config = EmbeddingServiceConfig {
            provider: LLMProvider::OpenAI,
            ..Default::default()
        };
        assert!(matches!(EmbeddingClient::new(&config), Err(EmbedError::Config(_))));
    }

    #[test]
    fn test_default_base_url() {
        let client = EmbeddingClient::new(&EmbeddingServiceConfig::default()).unwrap();
        assert_eq!(client.api_base_url, "http://localhost:11434");

        let config = EmbeddingServiceConfig {
            api_base_url: Some("http://gpu-box:11434/".to_string()),
            ..Default::default()
        };
        let client = EmbeddingClient::new(&config).unwrap();
        assert_eq!(client.api_base_url, "http://gpu-box:11434");
    }
}
