//! Configuration types.
//!
//! Every struct has a `Default` matching production values and a
//! `from_env()` constructor that overrides individual fields from the
//! environment. Unset variables fall back to the default; set-but-invalid
//! variables are reported as `ConfigError::InvalidValue`.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Delivery method that routes a message through the legislative channel.
pub const DEFAULT_LEGISLATIVE_ROUTE: &str = "cwc";

/// Top-level moderation configuration.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Delivery method identifier that marks a message as congressional.
    pub legislative_route_id: String,
    /// Fast severe-harm screen.
    pub safety: StageConfig,
    /// Deeper intent/appropriateness review.
    pub contextual: StageConfig,
    /// Tone and credibility review for direct outreach.
    pub credibility: StageConfig,
    /// External delivery system.
    pub delivery: DeliveryConfig,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            legislative_route_id: DEFAULT_LEGISLATIVE_ROUTE.to_string(),
            safety: StageConfig {
                backend: LlmBackend::OpenAi,
                model: "gpt-4o-mini".to_string(),
                timeout: Duration::from_secs(15),
                max_tokens: 256,
                temperature: 0.0,
            },
            contextual: StageConfig {
                backend: LlmBackend::Anthropic,
                model: "claude-sonnet-4-20250514".to_string(),
                timeout: Duration::from_secs(30),
                max_tokens: 512,
                temperature: 0.1,
            },
            credibility: StageConfig {
                backend: LlmBackend::Anthropic,
                model: "claude-sonnet-4-20250514".to_string(),
                timeout: Duration::from_secs(30),
                max_tokens: 512,
                temperature: 0.1,
            },
            delivery: DeliveryConfig::default(),
        }
    }
}

impl ModerationConfig {
    /// Build from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            legislative_route_id: std::env::var("MODERATION_LEGISLATIVE_ROUTE")
                .unwrap_or(defaults.legislative_route_id),
            safety: StageConfig::from_env("MODERATION_SAFETY", defaults.safety)?,
            contextual: StageConfig::from_env("MODERATION_CONTEXTUAL", defaults.contextual)?,
            credibility: StageConfig::from_env("MODERATION_CREDIBILITY", defaults.credibility)?,
            delivery: DeliveryConfig::from_env(defaults.delivery)?,
        })
    }
}

/// Settings for one classifier stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub backend: LlmBackend,
    pub model: String,
    /// Per-call request timeout. Expiry is treated as an unparseable response.
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl StageConfig {
    fn from_env(prefix: &str, defaults: StageConfig) -> Result<Self, ConfigError> {
        let backend = match std::env::var(format!("{prefix}_BACKEND")) {
            Ok(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: format!("{prefix}_BACKEND"),
                message,
            })?,
            Err(_) => defaults.backend,
        };
        Ok(Self {
            backend,
            model: std::env::var(format!("{prefix}_MODEL")).unwrap_or(defaults.model),
            timeout: env_secs(&format!("{prefix}_TIMEOUT_SECS"), defaults.timeout)?,
            max_tokens: env_parse(&format!("{prefix}_MAX_TOKENS"), defaults.max_tokens)?,
            temperature: defaults.temperature,
        })
    }
}

/// Delivery system connection and job polling policy.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Base URL of the delivery API, e.g. `https://delivery.internal`.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: Option<SecretString>,
    /// Timeout for the `/submit` round trip.
    pub submit_timeout: Duration,
    pub poll: PollPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787".to_string(),
            api_key: None,
            submit_timeout: Duration::from_secs(30),
            poll: PollPolicy::default(),
        }
    }
}

impl DeliveryConfig {
    fn from_env(defaults: DeliveryConfig) -> Result<Self, ConfigError> {
        let poll = PollPolicy {
            initial_delay: env_secs("DELIVERY_POLL_INITIAL_DELAY_SECS", defaults.poll.initial_delay)?,
            retry_delay: env_secs("DELIVERY_POLL_RETRY_DELAY_SECS", defaults.poll.retry_delay)?,
            deadline: env_secs("DELIVERY_POLL_DEADLINE_SECS", defaults.poll.deadline)?,
            request_timeout: env_secs(
                "DELIVERY_POLL_REQUEST_TIMEOUT_SECS",
                defaults.poll.request_timeout,
            )?,
        };
        poll.validate()?;
        Ok(Self {
            base_url: std::env::var("DELIVERY_BASE_URL")
                .map_err(|_| ConfigError::MissingEnvVar("DELIVERY_BASE_URL".to_string()))?,
            api_key: std::env::var("DELIVERY_API_KEY").ok().map(SecretString::from),
            submit_timeout: env_secs("DELIVERY_SUBMIT_TIMEOUT_SECS", defaults.submit_timeout)?,
            poll,
        })
    }
}

/// Job-status polling schedule.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Wait before the first poll.
    pub initial_delay: Duration,
    /// Wait between subsequent polls.
    pub retry_delay: Duration,
    /// Hard wall-clock ceiling measured from submission.
    pub deadline: Duration,
    /// Ceiling for a single `GET /jobs/{id}` round trip.
    pub request_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(10),
            deadline: Duration::from_secs(300), // 5 minutes
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    /// Retry delay and deadline must both be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "DELIVERY_POLL_RETRY_DELAY_SECS".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        if self.deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "DELIVERY_POLL_DEADLINE_SECS".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }
}

/// HTTP listener, audit storage and template seed file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    /// JSON array of templates to serve; none loaded when unset.
    pub templates_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: "./data/moderation.db".to_string(),
            templates_path: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            port: env_parse("MODERATION_PORT", defaults.port)?,
            db_path: std::env::var("MODERATION_DB_PATH").unwrap_or(defaults.db_path),
            templates_path: std::env::var("MODERATION_TEMPLATES_PATH").ok(),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}
