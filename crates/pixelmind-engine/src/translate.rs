use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::ACCEPT;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::TranslationConfig;
use crate::error::EngineError;
use crate::{read_reply, truncate_text};

const SYSTEM_PROMPT: &str = "Translate the following text to English, preserving meaning and tone.";

/// Turns a free-form instruction in any language into English.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str, source_hint: Option<&str>) -> Result<String, EngineError>;
}

/// Translator backed by an OpenAI-compatible `chat/completions` endpoint
/// (Gemini exposes one).
pub struct ChatTranslator {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl ChatTranslator {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| EngineError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
            http,
        })
    }

    pub fn from_config(config: &TranslationConfig) -> Result<Self, EngineError> {
        Self::new(
            &config.api_base,
            config.api_key.clone(),
            &config.model,
            config.request_timeout,
        )
    }
}

impl Translator for ChatTranslator {
    fn translate(&self, text: &str, source_hint: Option<&str>) -> Result<String, EngineError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EngineError::TranslationFailed(
                "GEMINI_API_KEY not set".to_string(),
            ));
        };
        let mut system = SYSTEM_PROMPT.to_string();
        if let Some(hint) = source_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
            system.push_str(&format!(" The source language is {hint}."));
        }
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": text },
            ],
        });
        let endpoint = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header(ACCEPT, "application/json")
            .json(&payload)
            .send()
            .map_err(|err| {
                EngineError::TranslationFailed(format!("request failed ({endpoint}): {err}"))
            })?;
        let reply = read_reply(response).map_err(EngineError::TranslationFailed)?;
        if !reply.success {
            return Err(EngineError::TranslationFailed(format!(
                "status {}: {}",
                reply.code,
                truncate_text(&reply.body, 512)
            )));
        }
        let parsed: Value = serde_json::from_str(&reply.body).map_err(|err| {
            EngineError::TranslationFailed(format!("invalid JSON payload: {err}"))
        })?;
        let translated = parsed
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                EngineError::TranslationFailed("response carried no translation".to_string())
            })?;
        debug!(model = %self.model, chars = translated.len(), "instruction translated");
        Ok(translated.to_string())
    }
}
