//! Model Caller: synchronous chat completion against an OpenAI-compatible endpoint.

use std::time::{Duration, Instant};

use anyhow::Context;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::{ErrorKind, Message, TokenUsage};

/// Statuses that signal a bad outgoing request; retrying the same request cannot help.
const NON_RETRIABLE_STATUSES: [u16; 3] = [400, 404, 422];

const ERROR_BODY_LIMIT: usize = 2_000;

/// One successful model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub text: String,
    /// Full response payload as returned by the endpoint.
    pub raw: Value,
    pub latency_ms: u64,
    pub usage: Option<TokenUsage>,
}

/// A model call that did not produce usable text.
#[derive(Debug, Error)]
pub enum CallerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("endpoint rejected the request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("could not build request: {0}")]
    InvalidRequest(String),

    #[error("malformed response: {reason}")]
    Malformed { reason: String, body: String },
}

impl CallerError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = truncate(body, ERROR_BODY_LIMIT);
        if NON_RETRIABLE_STATUSES.contains(&status) {
            CallerError::Rejected { status, body }
        } else {
            CallerError::Status { status, body }
        }
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            CallerError::Timeout(timeout)
        } else if err.is_builder() {
            CallerError::InvalidRequest(err.to_string())
        } else {
            CallerError::Transport(err.to_string())
        }
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self {
            CallerError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::ProviderError,
        }
    }

    /// `false` when the fault stems from the outgoing request itself.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            CallerError::Rejected { .. } | CallerError::InvalidRequest(_)
        )
    }

    /// Stand-in for `raw_response.json` when no payload was received.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "error": self.error_kind().as_str(),
            "message": self.to_string(),
            "retriable": self.is_retriable(),
        });
        match self {
            CallerError::Status { status, body } | CallerError::Rejected { status, body } => {
                payload["status"] = json!(status);
                payload["body"] = json!(body);
            }
            CallerError::Malformed { body, .. } => {
                payload["body"] = json!(body);
            }
            _ => {}
        }
        payload
    }
}

/// Collaborator performing one chat completion per call.
pub trait ModelCaller {
    fn chat(&self, messages: &[Message]) -> Result<ChatResponse, CallerError>;
}

/// Generation parameters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Blocking client for `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::blocking::Client,
    base_url: String,
    settings: ChatSettings,
    timeout: Duration,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: &str,
        settings: ChatSettings,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
            timeout,
        })
    }

    /// Model ids served by the endpoint (`GET {base_url}/models`).
    #[instrument(skip_all, fields(base_url = %self.base_url))]
    pub fn list_models(&self) -> Result<Vec<String>, CallerError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| CallerError::from_reqwest(err, self.timeout))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| CallerError::from_reqwest(err, self.timeout))?;
        if !status.is_success() {
            return Err(CallerError::from_status(status.as_u16(), &body));
        }
        parse_model_list(&body)
    }
}

impl ModelCaller for OpenAiCompatClient {
    #[instrument(skip_all, fields(model = %self.settings.model, messages = messages.len()))]
    fn chat(&self, messages: &[Message]) -> Result<ChatResponse, CallerError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let started = Instant::now();
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .map_err(|err| CallerError::from_reqwest(err, self.timeout))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| CallerError::from_reqwest(err, self.timeout))?;
        let latency_ms = elapsed_ms(started);

        if !status.is_success() {
            warn!(status = status.as_u16(), latency_ms, "model call failed");
            return Err(CallerError::from_status(status.as_u16(), &body));
        }
        let parsed = parse_chat_response(&body, latency_ms)?;
        debug!(latency_ms, chars = parsed.text.len(), "model call finished");
        Ok(parsed)
    }
}

/// Parse a chat completion body; text comes from `choices[0].message.content`.
pub fn parse_chat_response(body: &str, latency_ms: u64) -> Result<ChatResponse, CallerError> {
    let raw: Value = serde_json::from_str(body).map_err(|err| CallerError::Malformed {
        reason: format!("response is not JSON: {err}"),
        body: truncate(body, ERROR_BODY_LIMIT),
    })?;
    let text = raw
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| CallerError::Malformed {
            reason: "missing choices[0].message.content".to_string(),
            body: truncate(body, ERROR_BODY_LIMIT),
        })?
        .to_string();
    let usage = raw.get("usage").map(|usage| TokenUsage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
    });

    Ok(ChatResponse {
        text,
        raw,
        latency_ms,
        usage,
    })
}

fn parse_model_list(body: &str) -> Result<Vec<String>, CallerError> {
    let raw: Value = serde_json::from_str(body).map_err(|err| CallerError::Malformed {
        reason: format!("response is not JSON: {err}"),
        body: truncate(body, ERROR_BODY_LIMIT),
    })?;
    let entries = raw
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| CallerError::Malformed {
            reason: "missing data array".to_string(),
            body: truncate(body, ERROR_BODY_LIMIT),
        })?;
    Ok(entries
        .iter()
        .filter_map(|entry| entry.get("id").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_and_usage() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"name\":\"Ann\"}"}}],
            "usage":{"prompt_tokens":12,"completion_tokens":5,"total_tokens":17}}"#;
        let response = parse_chat_response(body, 42).expect("parse");

        assert_eq!(response.text, "{\"name\":\"Ann\"}");
        assert_eq!(response.latency_ms, 42);
        assert_eq!(
            response.usage,
            Some(TokenUsage {
                prompt_tokens: Some(12),
                completion_tokens: Some(5),
                total_tokens: Some(17),
            })
        );
        assert_eq!(response.raw["choices"][0]["message"]["role"], "assistant");
    }

    #[test]
    fn missing_content_is_malformed() {
        let err = parse_chat_response(r#"{"choices":[]}"#, 1).expect_err("malformed");
        assert!(matches!(err, CallerError::Malformed { .. }));
        assert_eq!(err.error_kind(), ErrorKind::ProviderError);
        assert!(err.is_retriable());

        let err = parse_chat_response("<html>", 1).expect_err("malformed");
        assert_eq!(err.to_payload()["body"], "<html>");
    }

    #[test]
    fn status_classification() {
        let rejected = CallerError::from_status(400, "bad model");
        assert!(!rejected.is_retriable());
        assert_eq!(rejected.to_payload()["status"], 400);

        let overloaded = CallerError::from_status(503, "busy");
        assert!(overloaded.is_retriable());
        assert_eq!(overloaded.error_kind(), ErrorKind::ProviderError);

        let timeout = CallerError::Timeout(Duration::from_secs(120));
        assert!(timeout.is_retriable());
        assert_eq!(timeout.error_kind(), ErrorKind::Timeout);
        assert_eq!(timeout.to_payload()["error"], "timeout");
    }

    #[test]
    fn parses_model_list() {
        let models =
            parse_model_list(r#"{"data":[{"id":"a"},{"id":"b"},{"object":"x"}]}"#).expect("parse");
        assert_eq!(models, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
