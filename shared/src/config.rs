use std::time::Duration;

use serde::Deserialize;

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

fn default_max_image_size() -> usize {
    5 * 1024 * 1024
}

fn default_gate_min_confidence() -> f64 {
    0.4
}

fn default_gate_med_confidence() -> f64 {
    0.6
}

fn default_gate_timeout_secs() -> f64 {
    15.0
}

fn default_recognition_timeout_secs() -> f64 {
    20.0
}

fn default_log_level() -> String {
    "info".into()
}

fn default_http_bind() -> String {
    "0.0.0.0".into()
}

fn default_http_port() -> u16 {
    8080
}

/// Service settings, loaded from the process environment.
///
/// `openrouter_api_key`, `openrouter_model` and `api_proxy_secret` are
/// mandatory; everything else carries a production default.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub openrouter_api_key: String,
    pub openrouter_model: String,
    /// Cheaper model used for the food gate. Falls back to the main model.
    #[serde(default)]
    pub openrouter_gate_model: Option<String>,
    #[serde(default = "default_base_url")]
    pub openrouter_base_url: String,
    /// Shared secret expected in the X-API-Key header of inbound requests.
    pub api_proxy_secret: String,
    #[serde(default = "default_max_image_size")]
    pub max_image_size_bytes: usize,
    /// Gate confidence below this rejects the image as not food.
    #[serde(default = "default_gate_min_confidence")]
    pub gate_min_confidence: f64,
    /// Gate confidence below this marks the request as low-confidence; an
    /// empty recognition result is then reported as LOW_CONFIDENCE instead of
    /// EMPTY_RESULT.
    #[serde(default = "default_gate_med_confidence")]
    pub gate_med_confidence: f64,
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: f64,
    #[serde(default = "default_recognition_timeout_secs")]
    pub recognition_timeout_secs: f64,
    /// Legacy clients cannot read non-200 statuses; when set, error responses
    /// are delivered with HTTP 200 and the body remains authoritative.
    #[serde(default)]
    pub legacy_http_200: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.openrouter_api_key.is_empty(),
            "OPENROUTER_API_KEY must not be empty"
        );
        anyhow::ensure!(
            !self.api_proxy_secret.is_empty(),
            "API_PROXY_SECRET must not be empty"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.gate_min_confidence)
                && (0.0..=1.0).contains(&self.gate_med_confidence),
            "gate confidence thresholds must lie in [0, 1]"
        );
        anyhow::ensure!(
            self.gate_min_confidence <= self.gate_med_confidence,
            "GATE_MIN_CONFIDENCE must not exceed GATE_MED_CONFIDENCE"
        );
        anyhow::ensure!(
            self.gate_timeout_secs > 0.0 && self.recognition_timeout_secs > 0.0,
            "upstream timeouts must be positive"
        );
        Ok(())
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.gate_timeout_secs)
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recognition_timeout_secs)
    }

    /// Model used for the gate call; the dedicated gate model when configured.
    pub fn gate_model(&self) -> &str {
        self.openrouter_gate_model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.openrouter_model)
    }
}
