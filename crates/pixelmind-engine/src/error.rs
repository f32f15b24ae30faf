use pixelmind_contracts::jobs::{FailureKind, JobFailure};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("image upload failed: {0}")]
    UploadFailed(String),

    #[error("generation submission failed ({}): {body}", status_label(.status))]
    SubmissionFailed { status: Option<u16>, body: String },

    #[error("status poll failed: {0}")]
    PollFailed(String),

    #[error("image download failed: {0}")]
    DownloadFailed(String),

    #[error("translation failed: {0}")]
    TranslationFailed(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid print job id: {0}")]
    InvalidJobId(i64),

    #[error("remote service reported completion without images: {0}")]
    NoImagesGenerated(String),

    #[error("generation did not finish after {attempts} status checks")]
    PollTimeout { attempts: u32 },

    #[error("remote generation failed: {0}")]
    RemoteJobFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{}", .0.detail)]
    Recorded(JobFailure),
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::FileNotFound(_) => FailureKind::FileNotFound,
            Self::UploadFailed(_) => FailureKind::UploadFailed,
            Self::SubmissionFailed { .. } => FailureKind::SubmissionFailed,
            Self::PollFailed(_) => FailureKind::PollFailed,
            Self::DownloadFailed(_) => FailureKind::DownloadFailed,
            Self::TranslationFailed(_) => FailureKind::TranslationFailed,
            Self::SessionNotFound(_) => FailureKind::SessionNotFound,
            Self::InvalidJobId(_) => FailureKind::InvalidJobId,
            Self::NoImagesGenerated(_) => FailureKind::NoImagesGenerated,
            Self::PollTimeout { .. } => FailureKind::PollTimeout,
            Self::RemoteJobFailed(_) => FailureKind::RemoteJobFailed,
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::InvalidTransition(_) => FailureKind::InvalidTransition,
            Self::Storage(_) => FailureKind::Storage,
            Self::Config(_) => FailureKind::Config,
            Self::Recorded(failure) => failure.kind,
        }
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    pub fn to_failure(&self) -> JobFailure {
        if let Self::Recorded(failure) = self {
            return failure.clone();
        }
        JobFailure {
            kind: self.kind(),
            detail: self.to_string(),
        }
    }

    /// Rebuilds the error a FAILED session recorded, so repeated status
    /// checks surface the same kind and detail as the call that failed it.
    pub fn from_failure(failure: &JobFailure) -> Self {
        Self::Recorded(failure.clone())
    }
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|code| format!("status {code}"))
        .unwrap_or_else(|| "no response".to_string())
}

#[cfg(test)]
mod tests {
    use pixelmind_contracts::jobs::FailureKind;

    use super::EngineError;

    #[test]
    fn submission_failure_message_carries_status_and_body() {
        let err = EngineError::SubmissionFailed {
            status: Some(402),
            body: "insufficient tokens".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "generation submission failed (status 402): insufficient tokens"
        );
        assert_eq!(err.kind(), FailureKind::SubmissionFailed);
    }

    #[test]
    fn recorded_failure_rebuilds_same_kind_and_message() {
        for err in [
            EngineError::NoImagesGenerated("gen-1".to_string()),
            EngineError::PollTimeout { attempts: 40 },
            EngineError::UploadFailed("presign returned 500".to_string()),
            EngineError::DownloadFailed("404".to_string()),
        ] {
            let failure = err.to_failure();
            let rebuilt = EngineError::from_failure(&failure);
            assert_eq!(rebuilt.kind(), err.kind());
            assert_eq!(rebuilt.to_string(), err.to_string());
            assert_eq!(rebuilt.to_failure(), failure);
        }
    }
}
