use std::path::Path;

use serde_json::{Map, Value};

use crate::error::EngineError;

/// Single-shot wrapper around an asynchronous remote image-synthesis API.
/// No call retries; the orchestrator decides polling cadence.
pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;
    fn upload_image(&self, path: &Path) -> Result<String, EngineError>;
    fn submit_job(&self, request: &SubmitJobRequest) -> Result<String, EngineError>;
    fn poll_status(&self, remote_job_id: &str) -> Result<RemoteJobStatus, EngineError>;
    fn fetch_image_bytes(&self, url: &str) -> Result<FetchedImage, EngineError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitJobRequest {
    pub image_id: String,
    pub prompt: String,
    pub model_id: String,
    pub width: u32,
    pub height: u32,
    pub num_images: u32,
    /// Model-specific payload fields; never override the core fields above.
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Pending,
    Complete,
    Failed,
    Other(String),
}

impl RemoteState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "PENDING" | "PROCESSING" | "IN_PROGRESS" | "QUEUED" => Self::Pending,
            "COMPLETE" | "COMPLETED" => Self::Complete,
            "FAILED" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Pending | Self::Other(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteImage {
    pub id: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobStatus {
    pub state: RemoteState,
    pub raw_status: String,
    /// Empty unless `state` is `Complete`.
    pub images: Vec<RemoteImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::RemoteState;

    #[test]
    fn remote_state_parsing_is_case_insensitive() {
        assert_eq!(RemoteState::parse("COMPLETE"), RemoteState::Complete);
        assert_eq!(RemoteState::parse("complete"), RemoteState::Complete);
        assert_eq!(RemoteState::parse("PENDING"), RemoteState::Pending);
        assert_eq!(RemoteState::parse(""), RemoteState::Pending);
        assert_eq!(RemoteState::parse("Failed"), RemoteState::Failed);
        assert_eq!(
            RemoteState::parse("moderated"),
            RemoteState::Other("MODERATED".to_string())
        );
        assert!(RemoteState::parse("moderated").is_in_progress());
        assert!(!RemoteState::Complete.is_in_progress());
    }
}
