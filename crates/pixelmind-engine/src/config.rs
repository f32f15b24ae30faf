use std::env;
use std::path::PathBuf;
use std::time::Duration;

use pixelmind_contracts::models::DEFAULT_IMAGE_MODEL;

use crate::non_empty_env;

pub const DEFAULT_LEONARDO_API_BASE: &str = "https://cloud.leonardo.ai/api/rest/v1";
pub const DEFAULT_TRANSLATION_API_BASE: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_TRANSLATION_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_WORKSPACE_ROOT: &str = "uploads/temp";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workspace_root: PathBuf,
    pub leonardo: LeonardoConfig,
    pub translation: TranslationConfig,
    pub image_model: String,
    pub defaults: GenerationDefaults,
    pub poll: PollPolicy,
}

#[derive(Debug, Clone)]
pub struct LeonardoConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationDefaults {
    pub num_images: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            num_images: 4,
            width: 512,
            height: 512,
        }
    }
}

/// Replaces the fixed sleep-then-check with a first delay followed by capped
/// exponential backoff, bounded by `max_attempts` status checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(20),
            interval: Duration::from_secs(5),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(30),
            max_attempts: 40,
        }
    }
}

impl PollPolicy {
    /// Delay to wait after the `attempt`-th (0-based) unfinished check.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(64) as i32);
        let scaled = self.interval.as_secs_f64() * factor;
        let capped = scaled.min(self.max_interval.as_secs_f64().max(self.interval.as_secs_f64()));
        Duration::from_secs_f64(capped.max(0.0))
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            interval: Duration::ZERO,
            backoff_factor: 1.0,
            max_interval: Duration::ZERO,
            max_attempts,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let request_timeout = Duration::from_secs_f64(
            env_f64("PIXELMIND_HTTP_TIMEOUT_S")
                .unwrap_or(60.0)
                .clamp(1.0, 600.0),
        );
        let defaults = GenerationDefaults::default();
        let poll_defaults = PollPolicy::default();
        Self {
            workspace_root: non_empty_env("PIXELMIND_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE_ROOT)),
            leonardo: LeonardoConfig {
                api_key: non_empty_env("LEONARDO_API_KEY")
                    .or_else(|| non_empty_env("LEONARDO_AI_API_KEY")),
                api_base: api_base_from_env("LEONARDO_BASE_URL", DEFAULT_LEONARDO_API_BASE),
                request_timeout,
            },
            translation: TranslationConfig {
                api_key: non_empty_env("GEMINI_API_KEY"),
                api_base: api_base_from_env("GEMINI_BASE_URL", DEFAULT_TRANSLATION_API_BASE),
                model: non_empty_env("GEMINI_MODEL")
                    .unwrap_or_else(|| DEFAULT_TRANSLATION_MODEL.to_string()),
                request_timeout,
            },
            image_model: non_empty_env("PIXELMIND_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            defaults,
            poll: PollPolicy {
                initial_delay: env_secs("PIXELMIND_POLL_INITIAL_DELAY_S", 0.0, 600.0)
                    .unwrap_or(poll_defaults.initial_delay),
                interval: env_secs("PIXELMIND_POLL_INTERVAL_S", 0.0, 300.0)
                    .unwrap_or(poll_defaults.interval),
                backoff_factor: env_f64("PIXELMIND_POLL_BACKOFF")
                    .map(|value| value.clamp(1.0, 10.0))
                    .unwrap_or(poll_defaults.backoff_factor),
                max_interval: env_secs("PIXELMIND_POLL_MAX_INTERVAL_S", 0.0, 600.0)
                    .unwrap_or(poll_defaults.max_interval),
                max_attempts: non_empty_env("PIXELMIND_POLL_MAX_ATTEMPTS")
                    .and_then(|value| value.parse::<u32>().ok())
                    .filter(|value| *value > 0)
                    .unwrap_or(poll_defaults.max_attempts),
            },
        }
    }
}

fn api_base_from_env(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_f64(key: &str) -> Option<f64> {
    non_empty_env(key)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

fn env_secs(key: &str, min: f64, max: f64) -> Option<Duration> {
    env_f64(key).map(|value| Duration::from_secs_f64(value.clamp(min, max)))
}
