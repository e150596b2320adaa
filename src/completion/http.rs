//! OpenAI-compatible chat completion client.
//!
//! Works against OpenRouter (the default) or any endpoint exposing
//! `POST {base_url}/chat/completions`. Models do not report confidence
//! natively, so the system prompt asks for a small JSON object and the reply
//! is parsed leniently.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Completion, CompletionError, CompletionRequest, CompletionService};
use crate::config::CompletionConfig;

const SYSTEM_PROMPT: &str = r#"You fill fields of formal project documents from reference material.
Reply with ONLY a JSON object of the form {"value": "<text>", "confidence": <number between 0 and 1>}.
If the material does not contain the requested information, reply {"value": "NOT_FOUND", "confidence": 0}.
Do not add explanations or markdown."#;

/// Completion service backed by an HTTP chat-completions API.
#[derive(Debug, Clone)]
pub struct HttpCompletionService {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletionService {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(&config.base_url, &config.model, config.api_key.clone())
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            max_tokens: Some(request.max_tokens),
            temperature: Some(0.1),
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("HTTP-Referer", "docket")
            .header("X-Title", "Docket Document Assembly")
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CompletionError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let response: ChatResponse = response.json().await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(CompletionError::NoResponse)?;

        Ok(parse_reply(&content))
    }

    fn name(&self) -> &str {
        "completion-api"
    }
}

/// Parse a model reply into a [`Completion`].
///
/// Accepts bare JSON, JSON inside a ```json fence, or backtick-wrapped JSON.
/// Anything else becomes the value with zero confidence, which the extractor
/// then treats as a low-confidence answer.
pub(crate) fn parse_reply(content: &str) -> Completion {
    let json_text = strip_fences(content);

    match serde_json::from_str::<ReplyBody>(json_text) {
        Ok(reply) => {
            let value = match reply.value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            Completion::new(value.trim(), reply.confidence.unwrap_or(0.0))
        }
        Err(_) => Completion::new(content.trim(), 0.0),
    }
}

fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some((_, rest)) = trimmed.split_once("```json") {
        return rest.split("```").next().unwrap_or(rest).trim();
    }
    if let Some(inner) = trimmed.strip_prefix("```") {
        return inner.strip_suffix("```").unwrap_or(inner).trim();
    }
    trimmed.trim_matches('`').trim()
}

#[derive(Debug, Deserialize)]
struct ReplyBody {
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    confidence: Option<f64>,
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
