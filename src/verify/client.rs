//! LLM client for verification prompts

use crate::config::{LLMProvider, VerifierConfig};
use crate::graph::VerifierIdentity;
use crate::verify::{VerificationPrompt, VerificationService, VerifyError, VerifyResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct LlmClient {
    client: Client,
    config: VerifierConfig,
    api_base_url: String,
}

impl LlmClient {
    pub fn new(config: &VerifierConfig) -> VerifyResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VerifyError::Config(e.to_string()))?;

        if config.provider == LLMProvider::OpenAI && config.api_key.is_none() {
            return Err(VerifyError::Config("OpenAI requires API key".to_string()));
        }

        let api_base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| config.provider.default_base_url().to_string());

        Ok(Self {
            client,
            config: config.clone(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn openai_chat(&self, prompt: &VerificationPrompt) -> VerifyResult<String> {
        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            temperature: f32,
            response_format: ResponseFormat,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MessageContent,
        }

        #[derive(Deserialize)]
        struct MessageContent {
            content: Option<String>,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| VerifyError::Config("OpenAI requires API key".to_string()))?;

        let url = format!("{}/chat/completions", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&Request {
                model: &self.config.model,
                messages: vec![
                    Message { role: "system", content: &prompt.system },
                    Message { role: "user", content: &prompt.user },
                ],
                temperature: self.config.temperature,
                response_format: ResponseFormat { kind: "json_object" },
            })
            .send()
            .await
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;

        let resp = check_status(resp, "OpenAI").await?;
        let result: Response = resp
            .json()
            .await
            .map_err(|e| VerifyError::Api(format!("unexpected OpenAI response: {}", e)))?;
        Ok(result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn ollama_generate(&self, prompt: &VerificationPrompt) -> VerifyResult<String> {
        #[derive(Serialize)]
        struct Options {
            temperature: f32,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            prompt: &'a str,
            system: &'a str,
            stream: bool,
            format: &'static str,
            options: Options,
        }

        #[derive(Deserialize)]
        struct Response {
            response: String,
        }

        let url = format!("{}/api/generate", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .json(&Request {
                model: &self.config.model,
                prompt: &prompt.user,
                system: &prompt.system,
                stream: false,
                format: "json",
                options: Options {
                    temperature: self.config.temperature,
                },
            })
            .send()
            .await
            .map_err(|e| VerifyError::Unavailable(e.to_string()))?;

        let resp = check_status(resp, "Ollama").await?;
        let result: Response = resp
            .json()
            .await
            .map_err(|e| VerifyError::Api(format!("unexpected Ollama response: {}", e)))?;
        Ok(result.response)
    }
}

#[async_trait]
impl VerificationService for LlmClient {
    async fn complete(&self, prompt: &VerificationPrompt) -> VerifyResult<String> {
        match self.config.provider {
            LLMProvider::OpenAI => self.openai_chat(prompt).await,
            LLMProvider::Ollama => self.ollama_generate(prompt).await,
        }
    }

    fn identity(&self) -> VerifierIdentity {
        VerifierIdentity::new(&self.config.model, &self.config.model_version)
    }
}

async fn check_status(resp: reqwest::Response, provider: &str) -> VerifyResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = format!("{} error {}: {}", provider, status, text);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(VerifyError::Unavailable(message))
    } else {
        Err(VerifyError::Api(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_uses_model_and_version() {
        let config = VerifierConfig {
            model: "mistral".to_string(),
            model_version: "7b-instruct-q4".to_string(),
            ..Default::default()
        };
        let client = LlmClient::new(&config).unwrap();
        assert_eq!(client.identity().to_string(), "mistral@7b-instruct-q4");
        assert_eq!(client.api_base_url, "http://localhost:11434");
    }

    #[test]
    fn test_openai_requires_key() {
        let config = VerifierConfig {
            provider: LLMProvider::OpenAI,
            ..Default::default()
        };
        assert!(matches!(LlmClient::new(&config), Err(VerifyError::Config(_))));
    }
}
