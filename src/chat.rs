//! Chat-completions client used by `/chat`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// First retry delay; doubles on every attempt.
const BASE_BACKOFF: Duration = Duration::from_millis(500);

pub struct Client {
    api_key: String,
    api_url: String,
    model: String,
    max_retries: u32,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl Client {
    pub fn new(api_key: String, api_url: String, model: String, timeout: Duration, max_retries: u32) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self { api_key, api_url, model, max_retries, http })
    }

    /// Send a single user prompt and return the assistant's reply.
    ///
    /// Transport errors, rate limits and server errors are retried with
    /// exponential backoff up to `max_retries` times.
    pub async fn complete(&self, prompt: &str) -> Result<String, Error> {
        let mut attempt = 0;
        loop {
            match self.request_once(prompt).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = backoff(attempt);
                    warn!("Chat request failed ({e}), retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(&self, prompt: &str) -> Result<String, Error> {
        let request = build_request(&self.model, prompt);

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| Error::Http(e.to_string()))?;
        debug!("Chat response status: {status}");

        if !status.is_success() {
            return Err(Error::Api { status: status.as_u16(), body });
        }

        extract_reply(&body)
    }
}

fn build_request<'a>(model: &'a str, prompt: &'a str) -> ApiRequest<'a> {
    ApiRequest {
        model,
        messages: vec![ApiMessage { role: "user", content: prompt }],
    }
}

fn extract_reply(body: &str) -> Result<String, Error> {
    let parsed: ApiResponse = serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(Error::Empty)
}

fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.saturating_pow(attempt)
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api { status: u16, body: String },
    Parse(String),
    Empty,
}

impl Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) => true,
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            Error::Parse(_) | Error::Empty => false,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api { status, body } => write!(f, "API error: {status}: {body}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let json = serde_json::to_value(build_request("gpt-3.5-turbo", "hi there")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-3.5-turbo",
                "messages": [{"role": "user", "content": "hi there"}]
            })
        );
    }

    #[test]
    fn test_extract_reply() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hello!"}}]}"#;
        assert_eq!(extract_reply(body).unwrap(), "Hello!");
    }

    #[test]
    fn test_extract_reply_empty() {
        assert!(matches!(extract_reply(r#"{"choices":[]}"#), Err(Error::Empty)));
        assert!(matches!(
            extract_reply(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(Error::Empty)
        ));
        assert!(matches!(extract_reply("not json"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Http("timeout".into()).is_retryable());
        assert!(Error::Api { status: 429, body: String::new() }.is_retryable());
        assert!(Error::Api { status: 503, body: String::new() }.is_retryable());
        assert!(!Error::Api { status: 401, body: String::new() }.is_retryable());
        assert!(!Error::Empty.is_retryable());
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_http_error() {
        let client = Client::new(
            "key".into(),
            "http://127.0.0.1:9/v1/chat/completions".into(),
            DEFAULT_MODEL.into(),
            Duration::from_secs(2),
            0,
        )
        .unwrap();
        assert!(matches!(client.complete("hi").await, Err(Error::Http(_))));
    }
}
