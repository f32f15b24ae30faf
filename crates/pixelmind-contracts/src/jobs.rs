use std::fmt;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const SESSION_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Uploading,
    Translating,
    Submitted,
    Polling,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Uploading => "UPLOADING",
            Self::Translating => "TRANSLATING",
            Self::Submitted => "SUBMITTED",
            Self::Polling => "POLLING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Forward-only: a status is never re-entered once left, and FAILED is
    /// reachable from every non-terminal status.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() == self.rank() + 1
    }

    fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Uploading => 1,
            Self::Translating => 2,
            Self::Submitted => 3,
            Self::Polling => 4,
            Self::Complete => 5,
            Self::Failed => u8::MAX,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FileNotFound,
    UploadFailed,
    SubmissionFailed,
    PollFailed,
    DownloadFailed,
    TranslationFailed,
    SessionNotFound,
    InvalidJobId,
    NoImagesGenerated,
    PollTimeout,
    RemoteJobFailed,
    InvalidRequest,
    InvalidTransition,
    Storage,
    Config,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileNotFound => "file_not_found",
            Self::UploadFailed => "upload_failed",
            Self::SubmissionFailed => "submission_failed",
            Self::PollFailed => "poll_failed",
            Self::DownloadFailed => "download_failed",
            Self::TranslationFailed => "translation_failed",
            Self::SessionNotFound => "session_not_found",
            Self::InvalidJobId => "invalid_job_id",
            Self::NoImagesGenerated => "no_images_generated",
            Self::PollTimeout => "poll_timeout",
            Self::RemoteJobFailed => "remote_job_failed",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidTransition => "invalid_transition",
            Self::Storage => "storage",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultImage {
    /// 1-based ordinal, matching the `generated_<index>` file name.
    pub index: usize,
    pub local_path: PathBuf,
    pub public_url: String,
}

/// One end-to-end generation request. This is also the persisted session
/// record (`session.json`), so a later process can resume status checks from
/// the workspace alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub status: JobStatus,
    pub original_image: Option<String>,
    pub original_instruction: String,
    pub working_instruction: Option<String>,
    pub enriched_prompt: Option<String>,
    pub remote_image_id: Option<String>,
    pub remote_job_id: Option<String>,
    pub model_id: String,
    pub num_images: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub poll_attempts: u32,
    #[serde(default)]
    pub result_images: Vec<ResultImage>,
    pub failure: Option<JobFailure>,
}

impl GenerationJob {
    pub fn new(
        session_id: impl Into<String>,
        original_instruction: impl Into<String>,
        model_id: impl Into<String>,
        num_images: u32,
        width: u32,
        height: u32,
    ) -> Self {
        let now = now_utc_iso();
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            session_id: session_id.into(),
            created_at: now.clone(),
            updated_at: now,
            status: JobStatus::Created,
            original_image: None,
            original_instruction: original_instruction.into(),
            working_instruction: None,
            enriched_prompt: None,
            remote_image_id: None,
            remote_job_id: None,
            model_id: model_id.into(),
            num_images,
            width,
            height,
            poll_attempts: 0,
            result_images: Vec::new(),
            failure: None,
        }
    }

    pub fn advance(&mut self, next: JobStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "session {} cannot move from {} to {}",
                self.session_id, self.status, next
            ));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) -> Result<(), String> {
        self.advance(JobStatus::Failed)?;
        self.failure = Some(JobFailure {
            kind,
            detail: detail.into(),
        });
        Ok(())
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.failure.as_ref().map(|failure| failure.detail.as_str())
    }

    pub fn touch(&mut self) {
        self.updated_at = now_utc_iso();
    }
}

fn default_schema_version() -> u64 {
    SESSION_SCHEMA_VERSION
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
