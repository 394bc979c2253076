//! Outbound client for the OpenRouter chat-completions API.
//!
//! One retrying entry point, [`UpstreamClient::send_chat`], is shared by both
//! pipeline stages; they differ only in prompt, model, token budget and
//! per-attempt timeout.

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{error, info, warn};

use crate::error::UpstreamError;
use crate::utils::preview;

const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

const HTTP_REFERER: &str = "https://foodscan.app";
const APP_TITLE: &str = "FoodScan AI Proxy";

/// Bounded exponential backoff for upstream calls.
///
/// Injectable so tests can run with zero delays. The per-attempt timeout is
/// handed to [`UpstreamClient::send_chat`] per call and is NOT cumulative:
/// a call can occupy up to
/// `max_attempts * timeout + sum(delay_for(1..max_attempts))`
/// of wall clock before it resolves, which is the effective request deadline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }

    pub fn retryable_status(&self, status: u16) -> bool {
        RETRYABLE_STATUS_CODES.contains(&status)
    }
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Single-turn vision request: one user message carrying the prompt text
    /// and the image as a data URI with low fidelity for cost control.
    pub fn vision(model: &str, max_tokens: u32, prompt: String, image_data_url: String) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            response_format: ResponseFormat::json_object(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::text(prompt),
                    ContentPart::image(image_data_url, "low"),
                ],
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format: &'static str,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self { format: "json_object" }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text {
        #[serde(rename = "type")]
        content_type: &'static str,
        text: String,
    },
    ImageUrl {
        #[serde(rename = "type")]
        content_type: &'static str,
        image_url: ImageData,
    },
}

impl ContentPart {
    pub fn text(text: String) -> Self {
        Self::Text { content_type: "text", text }
    }

    pub fn image(url: String, detail: &'static str) -> Self {
        Self::ImageUrl {
            content_type: "image_url",
            image_url: ImageData { url, detail },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImageData {
    pub url: String,
    pub detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

/// Final response of one upstream call: the last status and body seen after
/// the retry budget, whatever they were.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(base_url: String, api_key: String, policy: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            policy,
        }
    }

    /// POSTs `request` to the chat-completions endpoint.
    ///
    /// Statuses in the retryable set are retried with backoff; after the last
    /// attempt the response is returned as-is so the caller can inspect it.
    /// Any other status returns immediately without consuming retry budget.
    /// Timeouts and connection failures are retried the same way and surface
    /// as an error once the attempts are exhausted. `timeout` bounds each
    /// individual attempt, not the whole call.
    pub async fn send_chat(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<RawResponse, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt: u32 = 1;
        loop {
            let sent = self
                .http
                .post(&url)
                .timeout(timeout)
                .bearer_auth(&self.api_key)
                .header("HTTP-Referer", HTTP_REFERER)
                .header("X-Title", APP_TITLE)
                .json(request)
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if self.policy.retryable_status(status) && attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            status,
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "retryable upstream status, backing off"
                        );
                        time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    if self.policy.retryable_status(status) {
                        error!(status, attempts = attempt, "upstream still failing after retries");
                    }
                    let body = response
                        .text()
                        .await
                        .map_err(|e| UpstreamError::Network(e.to_string()))?;
                    return Ok(RawResponse { status, body });
                }
                Err(e) => {
                    let timed_out = e.is_timeout();
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            timed_out,
                            error = %e,
                            "upstream request failed, backing off"
                        );
                        time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    error!(attempts = attempt, error = %e, "upstream request failed after retries");
                    return Err(if timed_out {
                        UpstreamError::Timeout(e.to_string())
                    } else {
                        UpstreamError::Network(e.to_string())
                    });
                }
            }
        }
    }
}

/// Pulls the assistant text out of a 200 chat-completions body, logging token
/// usage when the provider reports it. Structural surprises become
/// [`UpstreamError::Payload`].
pub fn extract_content(raw: &RawResponse) -> Result<String, UpstreamError> {
    let parsed: ChatResponse = serde_json::from_str(&raw.body).map_err(|e| {
        UpstreamError::Payload(format!(
            "body is not valid JSON ({e}): {}",
            preview(&raw.body, 200)
        ))
    })?;

    if let Some(usage) = &parsed.usage {
        info!(
            prompt_tokens = ?usage.prompt_tokens,
            completion_tokens = ?usage.completion_tokens,
            total_tokens = ?usage.total_tokens,
            "upstream token usage"
        );
    }

    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| UpstreamError::Payload("response carries no choices".into()))
}

/// Encodes image bytes as a `data:` URI for multimodal chat content.
pub fn image_data_url(bytes: &[u8], mime: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        general_purpose::STANDARD.encode(bytes)
    )
}
