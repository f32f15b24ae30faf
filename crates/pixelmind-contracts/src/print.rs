use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::jobs::now_utc_iso;

pub type PrintJobId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl PrintStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PrintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintJob {
    pub job_id: PrintJobId,
    pub image_path: PathBuf,
    pub copies: u32,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub status: PrintStatus,
    pub error: Option<String>,
    pub queued_at: String,
}

impl PrintJob {
    pub fn queued(
        job_id: PrintJobId,
        image_path: PathBuf,
        copies: u32,
        options: BTreeMap<String, String>,
    ) -> Self {
        Self {
            job_id,
            image_path,
            copies,
            options,
            status: PrintStatus::Queued,
            error: None,
            queued_at: now_utc_iso(),
        }
    }
}
