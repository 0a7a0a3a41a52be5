//! Chat-completions transport.
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol with
//! `stream: true`, decoding server-sent events line by line and handing
//! each content delta to the caller as it arrives.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Transport-level failures. Any of these abandons the current round.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no API key found; set the {env_var} environment variable")]
    MissingApiKey { env_var: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream read error: {0}")]
    Read(#[from] std::io::Error),

    #[error("could not decode stream event: {0}")]
    Decode(String),

    #[error("stream cancelled")]
    Cancelled,
}

/// Resolved model settings, built once at startup and passed in.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Where the key was looked up; only used for error messages
    pub api_key_env: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

impl ModelConfig {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), path)
    }

    fn key(&self) -> Result<&str, StreamError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| StreamError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            })
    }
}

/// The seam between the interaction loop and the model provider.
pub trait ModelClient {
    /// Send the conversation and stream the reply. `on_delta` sees every
    /// content fragment in order; the full reply text is returned. Setting
    /// `cancel` aborts the stream with [`StreamError::Cancelled`].
    fn stream_chat(
        &self,
        messages: &[ChatMessage],
        on_delta: &mut dyn FnMut(&str),
        cancel: &AtomicBool,
    ) -> Result<String, StreamError>;

    /// Model identifiers offered by the endpoint.
    fn list_models(&self) -> Result<Vec<String>, StreamError>;

    /// Model id used for requests.
    fn model(&self) -> &str;
}

/// One decoded server-sent event line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

/// Decode a single SSE line from a streaming chat completion.
pub fn decode_sse_line(line: &str) -> Result<SseEvent, StreamError> {
    let trimmed = line.trim();
    let Some(data) = trimmed.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let value: Value =
        serde_json::from_str(data).map_err(|e| StreamError::Decode(format!("{e}: {data}")))?;

    if let Some(err) = value.get("error") {
        return Err(StreamError::Decode(err.to_string()));
    }

    let content = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("delta").or_else(|| choice.get("message")))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str());

    Ok(match content {
        Some(text) if !text.is_empty() => SseEvent::Delta(text.to_string()),
        _ => SseEvent::Skip,
    })
}

/// Blocking client for OpenAI-compatible endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    cfg: ModelConfig,
    http: Client,
}

impl OpenAiClient {
    pub fn new(cfg: ModelConfig) -> Result<Self, StreamError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self { cfg, http })
    }

    fn build_payload(&self, messages: &[ChatMessage]) -> Value {
        let mut payload = json!({
            "model": self.cfg.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(max) = self.cfg.max_tokens {
            payload["max_tokens"] = json!(max);
        }
        if let Some(t) = self.cfg.temperature {
            payload["temperature"] = json!(t);
        }
        payload
    }
}

impl ModelClient for OpenAiClient {
    #[tracing::instrument(skip_all, fields(model = %self.cfg.model, messages = messages.len()))]
    fn stream_chat(
        &self,
        messages: &[ChatMessage],
        on_delta: &mut dyn FnMut(&str),
        cancel: &AtomicBool,
    ) -> Result<String, StreamError> {
        let key = self.cfg.key()?;
        let resp = self
            .http
            .post(self.cfg.url("chat/completions"))
            .bearer_auth(key)
            .json(&self.build_payload(messages))
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut full = String::new();
        let reader = std::io::BufReader::new(resp);
        for line in reader.lines() {
            if cancel.load(Ordering::Relaxed) {
                tracing::info!(received = full.len(), "stream cancelled by user");
                return Err(StreamError::Cancelled);
            }
            match decode_sse_line(&line?)? {
                SseEvent::Delta(text) => {
                    on_delta(&text);
                    full.push_str(&text);
                }
                SseEvent::Done => break,
                SseEvent::Skip => {}
            }
        }

        tracing::debug!(bytes = full.len(), "stream finished");
        Ok(full)
    }

    fn list_models(&self) -> Result<Vec<String>, StreamError> {
        let key = self.cfg.key()?;
        let resp = self
            .http
            .get(self.cfg.url("models"))
            .bearer_auth(key)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json()?;
        let mut ids: Vec<String> = body
            .get("data")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    fn model(&self) -> &str {
        &self.cfg.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_content_deltas() {
        let line = r####"data: {"choices":[{"delta":{"content":"### FILE"}}]}"####;
        assert_eq!(
            decode_sse_line(line).unwrap(),
            SseEvent::Delta("### FILE".into())
        );
    }

    #[test]
    fn done_and_noise() {
        assert_eq!(decode_sse_line("data: [DONE]").unwrap(), SseEvent::Done);
        assert_eq!(decode_sse_line(": keep-alive").unwrap(), SseEvent::Skip);
        assert_eq!(decode_sse_line("").unwrap(), SseEvent::Skip);
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(decode_sse_line(role_only).unwrap(), SseEvent::Skip);
    }

    #[test]
    fn provider_errors_surface() {
        let line = r#"data: {"error":{"message":"overloaded"}}"#;
        assert!(matches!(
            decode_sse_line(line),
            Err(StreamError::Decode(msg)) if msg.contains("overloaded")
        ));
        assert!(matches!(
            decode_sse_line("data: {not json"),
            Err(StreamError::Decode(_))
        ));
    }

    #[test]
    fn missing_key_is_reported_before_any_request() {
        let client = OpenAiClient::new(ModelConfig {
            endpoint: "http://127.0.0.1:9".into(),
            model: "gpt-4o".into(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".into(),
            max_tokens: None,
            temperature: None,
            timeout_secs: 1,
        })
        .unwrap();

        let cancel = AtomicBool::new(false);
        let err = client
            .stream_chat(&[ChatMessage::user("hi")], &mut |_| {}, &cancel)
            .unwrap_err();
        assert!(matches!(err, StreamError::MissingApiKey { env_var } if env_var == "OPENAI_API_KEY"));
    }

    #[test]
    fn roles_serialize_lowercase() {
        let v = serde_json::to_value(ChatMessage::assistant("x")).unwrap();
        assert_eq!(v["role"], "assistant");
    }
}
