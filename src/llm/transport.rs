// src/llm/transport.rs
//
// Wire types for OpenAI-compatible chat completions and the seam between
// the retry policy and the network.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::GenerationError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Usage {
    #[serde(default)]
    pub completion_tokens: u64,
}

/// One HTTP exchange, before any interpretation of the status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// Sends one request. Errors are network-level only; every HTTP status,
/// including failures, comes back as a `RawResponse`.
pub trait Transport {
    fn send(&self, request: &ChatRequest) -> Result<RawResponse, GenerationError>;
}

/// Blocking wait used between rate-limited retries and between tasks.
pub trait Sleeper {
    fn sleep(&self, d: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

pub struct HttpTransport {
    client: Client,
    url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(cfg: &ApiConfig) -> Result<Self, GenerationError> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(GenerationError::MissingApiKey)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: cfg.base_url.clone(),
            api_key,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &ChatRequest) -> Result<RawResponse, GenerationError> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let retry_after = parse_retry_after(resp.headers());
        let body = resp
            .text()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Reads `Retry-After` as whole seconds; HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static(" 7 "));
        assert_eq!(parse_retry_after(&h), Some(Duration::from_secs(7)));
    }

    #[test]
    fn retry_after_date_is_ignored() {
        let mut h = HeaderMap::new();
        h.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&h), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn transport_requires_api_key() {
        let cfg = ApiConfig::default();
        assert!(matches!(
            HttpTransport::new(&cfg),
            Err(GenerationError::MissingApiKey)
        ));
    }

    #[test]
    fn request_serializes_sampling_parameters() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage {
                role: "user",
                content: "hi".into(),
            }],
            max_tokens: 400,
            temperature: 0.5,
            top_k: 50,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["max_tokens"], 400);
        assert_eq!(v["top_k"], 50);
        assert_eq!(v["messages"][0]["role"], "user");
    }
}
