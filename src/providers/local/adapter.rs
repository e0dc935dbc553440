use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::mpsc;
use url::Url;

use super::models::*;
use crate::models::Role;
use crate::providers::traits::ResponseSource;
use crate::providers::types::{ChatMessage, ProviderError, ResponseRequest, StreamEvent};

#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    pub base_url: Url,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
}

/// Response source backed by an OpenAI-compatible `/v1/chat/completions`
/// endpoint (llama.cpp, LM Studio, Ollama, vLLM, ...).
pub struct LocalProvider {
    client: Client,
    config: LocalProviderConfig,
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn translate_role(role: &Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.as_str().trim_end_matches('/')
        )
    }

    fn build_messages(system_prompt: Option<&str>, messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);

        if let Some(prompt) = system_prompt {
            if !prompt.is_empty() {
                result.push(OpenAiMessage {
                    role: "system".to_string(),
                    content: Some(prompt.to_string()),
                });
            }
        }

        result.extend(messages.iter().map(|msg| OpenAiMessage {
            role: Self::translate_role(&msg.role).to_string(),
            content: Some(msg.content.clone()),
        }));

        result
    }

    fn build_request(&self, request: &ResponseRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: self.config.model.clone(),
            messages: Self::build_messages(
                self.config.system_prompt.as_deref(),
                &request.messages,
            ),
            stream,
            temperature: self.config.temperature,
        }
    }

    fn build_auth_header(api_key: Option<&str>) -> Option<String> {
        match api_key {
            Some(key) if !key.is_empty() => Some(format!("Bearer {}", key)),
            _ => None,
        }
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    async fn post(&self, body: &OpenAiRequest) -> Result<reqwest::Response, ProviderError> {
        let mut req = self
            .client
            .post(self.completions_url())
            .header("content-type", "application/json")
            .json(body);

        if let Some(auth) = Self::build_auth_header(self.config.api_key.as_deref()) {
            req = req.header("Authorization", auth);
        }

        let response = req.send().await.map_err(|e| {
            ProviderError::NetworkError(format!(
                "Failed to connect to {}: {}",
                self.config.base_url, e
            ))
        })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl ResponseSource for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn fetch(&self, request: ResponseRequest) -> Result<String, ProviderError> {
        let body = self.build_request(&request, false);
        let response = self.post(&body).await?;

        let openai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "No content in response".to_string(),
            ));
        }

        Ok(content)
    }

    async fn stream(
        &self,
        request: ResponseRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        use super::stream::parse_sse_stream;

        let body = self.build_request(&request, true);
        let response = self.post(&body).await?;
        parse_sse_stream(response.bytes_stream(), tx).await;
        Ok(())
    }
}
