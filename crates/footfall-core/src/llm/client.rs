//! Chat-completions client for the language-model service
//!
//! Provides an async HTTP client with:
//! - A bounded per-request timeout
//! - Retry with exponential backoff on transient failures
//! - Model fallback when a model is unavailable or rate limited

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, error, info, warn};

use crate::answer::AnswerGenerator;
use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::types::{ChatRequest, ChatResponse, LlmResponse, Message};

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// Wait assumed for a 429 that carries no retry hint
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// Chat-completions client
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
    backoff_base_ms: u64,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("default_model", &self.config.default_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    backoff_base_ms: Option<u64>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the base URL from the configuration
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Base delay of the retry backoff
    pub fn backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = Some(ms);
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        let config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::ConfigError("API key is required".to_string()))?;

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| config.base_url.clone())
            .trim_end_matches('/')
            .to_string();

        Ok(LlmClient {
            http_client,
            config,
            api_key,
            base_url,
            timeout_secs,
            backoff_base_ms: self.backoff_base_ms.unwrap_or(BACKOFF_BASE_MS),
        })
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new()
            .config(config)
            .api_key(api_key)
            .build()
    }

    /// Build a client from configuration, reading the API key from the environment
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .map_err(|e| Error::ConfigError(e.to_string()))?
            .ok_or_else(|| {
                Error::ConfigError(
                    "No API key found. Set FOOTFALL_API_KEY or GROQ_API_KEY".to_string(),
                )
            })?;

        Self::new(config.clone(), api_key)
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn fallback_models(&self) -> &[String] {
        &self.config.fallback_models
    }

    /// Make a chat completion request against one model, retrying transient failures
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        model: Option<&str>,
    ) -> Result<LlmResponse> {
        let model = model.unwrap_or(&self.config.default_model);
        self.complete_model(messages, model, true).await
    }

    async fn complete_model(
        &self,
        messages: Vec<Message>,
        model: &str,
        retry_rate_limits: bool,
    ) -> Result<LlmResponse> {
        let request = ChatRequest::new(model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        self.execute_request(&request, retry_rate_limits).await
    }

    /// Make a chat completion request with automatic fallback
    ///
    /// Tries the default model first, then each fallback model in order when
    /// the previous one is rate limited or unavailable. Any other failure is
    /// returned immediately. A rate-limited model is only waited on when it
    /// is the last one left.
    pub async fn complete_with_fallback(&self, messages: Vec<Message>) -> Result<LlmResponse> {
        let mut models = vec![self.config.default_model.clone()];
        models.extend(self.config.fallback_models.iter().cloned());

        let mut last_error = None;

        for (idx, model) in models.iter().enumerate() {
            debug!(model = %model, "Attempting chat completion");
            let is_last = idx + 1 == models.len();

            match self.complete_model(messages.clone(), model, is_last).await {
                Ok(response) => {
                    info!(model = %model, tokens = response.tokens_used, "Chat completion successful");
                    return Ok(response);
                }
                Err(Error::RateLimited(secs)) => {
                    warn!(model = %model, wait_secs = secs, "Rate limited, trying next model");
                    last_error = Some(Error::RateLimited(secs));
                }
                Err(Error::UpstreamService(msg)) if is_model_error(&msg) => {
                    warn!(model = %model, error = %msg, "Model error, trying next model");
                    last_error = Some(Error::UpstreamService(msg));
                }
                Err(e) => {
                    error!(model = %model, error = %e, "Non-recoverable error");
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::UpstreamService("No model configured".to_string())))
    }

    async fn execute_request(
        &self,
        request: &ChatRequest,
        retry_rate_limits: bool,
    ) -> Result<LlmResponse> {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(e)
                    if e.is_transient()
                        && attempts <= self.config.max_retries
                        && (retry_rate_limits || !matches!(e, Error::RateLimited(_))) =>
                {
                    let suggested_wait = match &e {
                        Error::RateLimited(secs) => *secs,
                        _ => 0,
                    };
                    let backoff = calculate_backoff(self.backoff_base_ms, attempts, suggested_wait);
                    warn!(
                        model = %request.model,
                        attempt = attempts,
                        wait_ms = backoff,
                        error = %e,
                        "Transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();

        if !status.is_success() {
            return Err(handle_error_response(status, response).await);
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let chat_response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::UpstreamService(format!("Failed to parse response: {}", e)))?;

        LlmResponse::from_chat_response(chat_response)
            .ok_or_else(|| Error::UpstreamService("Empty response from API".to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout_secs)
        } else {
            Error::NetworkError(e)
        }
    }
}

#[async_trait]
impl AnswerGenerator for LlmClient {
    async fn generate(&self, system_message: &str, user_message: &str) -> Result<String> {
        let messages = vec![Message::system(system_message), Message::user(user_message)];
        let response = self.complete_with_fallback(messages).await?;
        Ok(response.content)
    }
}

/// Map a non-success HTTP response onto the error taxonomy
async fn handle_error_response(status: reqwest::StatusCode, response: reqwest::Response) -> Error {
    let header_wait = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        401 => Error::UpstreamService(
            "Unauthorized: Invalid API key. Set FOOTFALL_API_KEY or GROQ_API_KEY environment variable."
                .to_string(),
        ),
        403 => Error::UpstreamService(format!("Forbidden: {}", body)),
        429 => {
            let wait_secs = header_wait
                .or_else(|| extract_retry_after(&body))
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS);
            Error::RateLimited(wait_secs)
        }
        400 => Error::UpstreamService(format!("Bad request: {}", body)),
        404 => Error::UpstreamService(format!(
            "Model not found or endpoint unavailable: {}",
            body
        )),
        500..=599 => Error::UpstreamService(format!("Server error ({}): {}", status, body)),
        _ => Error::UpstreamService(format!("HTTP error {}: {}", status, body)),
    }
}

/// Check if an error message indicates a model-specific error
fn is_model_error(msg: &str) -> bool {
    let model_error_patterns = [
        "model not found",
        "model_not_found",
        "does not exist",
        "decommissioned",
        "unavailable",
        "not available",
        "overloaded",
        "capacity",
    ];

    let msg_lower = msg.to_lowercase();
    model_error_patterns
        .iter()
        .any(|pattern| msg_lower.contains(pattern))
}

/// Calculate backoff delay with jitter
fn calculate_backoff(base_ms: u64, attempt: u32, suggested_wait: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = base_ms.saturating_mul(1u64 << exponent);
    let delay = base.max(suggested_wait.saturating_mul(1000));

    // up to 10% jitter
    let jitter = delay / 10;
    delay + (rand_jitter() % jitter.max(1))
}

fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 1000)
        .unwrap_or(0)
}

/// Extract a retry-after hint from an error body
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error").and_then(|e| e.get("retry_after")))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_key: None,
            base_url: "https://example.com/v1".to_string(),
            default_model: "primary".to_string(),
            fallback_models: vec!["backup".to_string()],
            temperature: 0.2,
            max_tokens: 256,
            timeout_secs: 5,
            max_retries: 2,
        }
    }

    fn client_for(server: &Server, config: LlmConfig) -> LlmClient {
        LlmClient::builder()
            .config(config)
            .api_key("test-key")
            .base_url(server.url())
            .backoff_base_ms(1)
            .build()
            .unwrap()
    }

    fn completion_body(model: &str, content: &str) -> String {
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1746057600,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
        .to_string()
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::builder()
            .config(test_config())
            .api_key("test-key")
            .base_url("https://example.com/")
            .timeout_secs(60)
            .build()
            .unwrap();

        assert_eq!(client.default_model(), "primary");
        assert_eq!(client.base_url, "https://example.com");
        assert_eq!(client.timeout_secs, 60);
    }

    #[test]
    fn test_base_url_comes_from_config() {
        let client = LlmClient::new(test_config(), "test-key").unwrap();
        assert_eq!(client.base_url, "https://example.com/v1");
        assert_eq!(client.fallback_models(), &["backup"]);
    }

    #[test]
    fn test_client_builder_requires_api_key() {
        assert!(LlmClient::builder().config(test_config()).build().is_err());
        assert!(
            LlmClient::builder()
                .config(test_config())
                .api_key("  ")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_from_config_rejects_stored_key() {
        let mut config = test_config();
        config.api_key = Some("sk-stored".to_string());
        let err = LlmClient::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_client_debug_hides_key() {
        let client = LlmClient::new(test_config(), "secret-key").unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("LlmClient"));
        assert!(debug.contains("primary"));
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmClient>();
    }

    #[test]
    fn test_is_model_error() {
        assert!(is_model_error("Model not found or endpoint unavailable: {}"));
        assert!(is_model_error("The model `x` has been decommissioned"));
        assert!(is_model_error("Server error (503): over capacity"));
        assert!(!is_model_error("Unauthorized: Invalid API key"));
        assert!(!is_model_error("Network timeout"));
    }

    #[test]
    fn test_calculate_backoff() {
        assert!(calculate_backoff(BACKOFF_BASE_MS, 1, 0) >= BACKOFF_BASE_MS);
        assert!(calculate_backoff(BACKOFF_BASE_MS, 2, 0) >= BACKOFF_BASE_MS * 2);
        assert!(calculate_backoff(BACKOFF_BASE_MS, 1, 5) >= 5000);
        assert!(calculate_backoff(1, 1, 0) <= 1);
        // no overflow on absurd attempt counts
        assert!(calculate_backoff(BACKOFF_BASE_MS, 200, 0) > 0);
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(extract_retry_after(r#"{"retry_after": 30}"#), Some(30));
        assert_eq!(extract_retry_after(r#"{"error": {"retry_after": 60}}"#), Some(60));
        assert_eq!(extract_retry_after(r#"{"message": "rate limited"}"#), None);
        assert_eq!(extract_retry_after("not json"), None);
    }

    #[tokio::test]
    async fn test_complete_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({"model": "primary", "max_tokens": 256})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("primary", "Alpha had 10 visitors."))
            .create_async()
            .await;

        let client = client_for(&server, test_config());
        let response = client
            .complete(vec![Message::user("How many?")], None)
            .await
            .unwrap();

        assert_eq!(response.content, "Alpha had 10 visitors.");
        assert_eq!(response.tokens_used, 15);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fallback_on_missing_model() {
        let mut server = Server::new_async().await;
        let primary = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "primary"})))
            .with_status(404)
            .with_body(r#"{"error": {"message": "model_not_found"}}"#)
            .expect(1)
            .create_async()
            .await;
        let backup = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "backup"})))
            .with_status(200)
            .with_body(completion_body("backup", "fallback answer"))
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, test_config());
        let response = client
            .complete_with_fallback(vec![Message::user("q")])
            .await
            .unwrap();

        assert_eq!(response.model, "backup");
        assert_eq!(response.content, "fallback answer");
        primary.assert_async().await;
        backup.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .expect(3)
            .create_async()
            .await;

        let client = client_for(&server, test_config());
        let err = client
            .complete(vec![Message::user("q")], None)
            .await
            .unwrap_err();

        match err {
            Error::UpstreamService(msg) => assert!(msg.starts_with("Server error")),
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried_or_failed_over() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": {"message": "invalid key"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, test_config());
        let err = client
            .complete_with_fallback(vec![Message::user("q")])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Unauthorized"));
        assert!(!err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_hint_is_reported() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error": {"retry_after": 0}}"#)
            .create_async()
            .await;

        let mut config = test_config();
        config.max_retries = 0;
        config.fallback_models.clear();
        let client = client_for(&server, config);
        let err = client
            .complete_with_fallback(vec![Message::user("q")])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RateLimited(0)));
    }

    #[tokio::test]
    async fn test_rate_limited_model_fails_over_without_waiting() {
        let mut server = Server::new_async().await;
        let primary = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "primary"})))
            .with_status(429)
            .with_body(r#"{"error": {"message": "slow down"}}"#)
            .expect(1)
            .create_async()
            .await;
        let backup = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "backup"})))
            .with_status(200)
            .with_body(completion_body("backup", "from backup"))
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, test_config());
        let response = tokio::time::timeout(
            Duration::from_secs(10),
            client.complete_with_fallback(vec![Message::user("q")]),
        )
        .await
        .expect("fallback should not wait out the rate limit")
        .unwrap();

        assert_eq!(response.content, "from backup");
        primary.assert_async().await;
        backup.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_sends_system_and_user_messages() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({
                "messages": [
                    {"role": "system", "content": "standing context"},
                    {"role": "user", "content": "the question"}
                ]
            })))
            .with_status(200)
            .with_body(completion_body("primary", "answer text"))
            .create_async()
            .await;

        let client = client_for(&server, test_config());
        let answer = client
            .generate("standing context", "the question")
            .await
            .unwrap();

        assert_eq!(answer, "answer text");
        mock.assert_async().await;
    }
}
