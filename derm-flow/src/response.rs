//! Client side of the text-generation service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ResponseError;

pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

/// Request/response text-generation service.
#[async_trait]
pub trait ResponseService: Send + Sync {
    /// Generate a reply for `prompt` under the `system` instruction.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ResponseError>;
}

impl ResponseError {
    /// Natural-language message shown to the user in place of a reply.
    pub fn user_message(&self) -> String {
        match self {
            ResponseError::Timeout => "⏱️ Yanıt servisi zamanında cevap vermedi. Lütfen sorunuzu birkaç saniye sonra yeniden deneyin.".to_string(),
            ResponseError::Transport(details) => format!(
                "⚠️ Yanıt servisine ulaşılamadı: {}\n\nLütfen sorunuzu yeniden deneyin.",
                details
            ),
            ResponseError::Upstream { status, body } => format!(
                "⚠️ Yanıt oluşturulurken bir hata oluştu: API Hatası (Status Code: {}): {}\n\nLütfen sorunuzu yeniden deneyin.",
                status, body
            ),
            ResponseError::InvalidResponse(details) => format!(
                "⚠️ Yanıt servisinden beklenmeyen bir cevap alındı: {}\n\nLütfen sorunuzu yeniden deneyin.",
                details
            ),
        }
    }
}

/// Settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// reqwest-based [`ResponseService`] with a client-wide timeout.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    settings: CompletionSettings,
}

impl ChatCompletionsClient {
    pub fn new(settings: CompletionSettings) -> Result<Self, ResponseError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ResponseError::Transport(e.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &CompletionSettings {
        &self.settings
    }
}

#[async_trait]
impl ResponseService for ChatCompletionsClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ResponseError> {
        let payload = ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let response = self
            .client
            .post(&self.settings.endpoint)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Completion request rejected");
            return Err(ResponseError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ResponseError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ResponseError::InvalidResponse("no completion returned".to_string()))?;

        info!(characters = content.len(), "Completion received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    async fn spawn_endpoint(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    fn client_for(endpoint: String, timeout: Duration) -> ChatCompletionsClient {
        ChatCompletionsClient::new(CompletionSettings {
            endpoint,
            api_key: "test-key".to_string(),
            timeout,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_returns_first_choice() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "llama3-8b-8192");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "soru");
                assert_eq!(body["max_tokens"], 1000);
                Json(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "Tedavi önerisi..." } },
                        { "message": { "role": "assistant", "content": "ignored" } }
                    ]
                }))
            }),
        );
        let client = client_for(spawn_endpoint(router).await, Duration::from_secs(5));

        let reply = client.complete("sistem", "soru").await.unwrap();
        assert_eq!(reply, "Tedavi önerisi...");
    }

    #[tokio::test]
    async fn test_non_success_keeps_status_and_body() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited") }),
        );
        let client = client_for(spawn_endpoint(router).await, Duration::from_secs(5));

        let err = client.complete("sistem", "soru").await.unwrap_err();
        assert_eq!(
            err,
            ResponseError::Upstream {
                status: 429,
                body: "rate limited".to_string()
            }
        );
        let message = err.user_message();
        assert!(message.contains("429"));
        assert!(message.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "choices": [] }))
            }),
        );
        let client = client_for(spawn_endpoint(router).await, Duration::from_millis(200));

        let err = client.complete("sistem", "soru").await.unwrap_err();
        assert_eq!(err, ResponseError::Timeout);
        assert!(err.user_message().contains("yeniden deneyin"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({ "choices": [] })) }),
        );
        let client = client_for(spawn_endpoint(router).await, Duration::from_secs(5));

        let err = client.complete("sistem", "soru").await.unwrap_err();
        assert!(matches!(err, ResponseError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(format!("http://{}/v1", addr), Duration::from_secs(5));
        let err = client.complete("sistem", "soru").await.unwrap_err();
        assert!(matches!(err, ResponseError::Transport(_)));
    }
}
