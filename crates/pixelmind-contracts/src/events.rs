use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::jobs::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Milestones of a generation session, in the order a healthy job hits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    SessionCreated,
    ImageUploaded,
    InstructionTranslated,
    TranslationFallback,
    JobSubmitted,
    StatusPolled,
    ImagesDownloaded,
    JobFailed,
}

impl SessionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionCreated => "session_created",
            Self::ImageUploaded => "image_uploaded",
            Self::InstructionTranslated => "instruction_translated",
            Self::TranslationFallback => "translation_fallback",
            Self::JobSubmitted => "job_submitted",
            Self::StatusPolled => "status_polled",
            Self::ImagesDownloaded => "images_downloaded",
            Self::JobFailed => "job_failed",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appends session milestones to `<workspace>/events.jsonl`, one compact
/// object per line with `type`, `session_id` and `ts` set by the writer.
/// Payload keys never replace those three.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn emit(&self, event: SessionEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let Some(workspace) = self.inner.path.parent() else {
            anyhow::bail!("event log path has no parent directory");
        };
        // Cleanup owns workspace removal; a late event must not bring it back.
        if !workspace.is_dir() {
            anyhow::bail!("session workspace {} is gone", workspace.display());
        }

        let mut record = payload;
        record.insert("type".to_string(), Value::String(event.as_str().to_string()));
        record.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        record.insert("ts".to_string(), Value::String(now_utc_iso()));
        let line = serde_json::to_string(&record)?;

        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(record))
    }
}

pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn writer_fields_win_over_payload_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("remote_job_id".to_string(), Value::String("gen-1".to_string()));
        payload.insert("type".to_string(), Value::String("spoofed".to_string()));
        let emitted = writer.emit(SessionEvent::JobSubmitted, payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("job_submitted".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-123".to_string()));
        assert_eq!(parsed["remote_job_id"], Value::String("gen-1".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn emit_appends_lines_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        writer.emit(SessionEvent::SessionCreated, EventPayload::new())?;
        writer.emit(SessionEvent::ImageUploaded, EventPayload::new())?;

        let events = read_events(&path)?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], Value::String("session_created".to_string()));
        assert_eq!(events[1]["type"], Value::String("image_uploaded".to_string()));
        Ok(())
    }

    #[test]
    fn emit_refuses_to_recreate_removed_workspace() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let workspace = temp.path().join("session-123");
        let writer = EventWriter::new(workspace.join("events.jsonl"), "session-123");

        assert!(writer.emit(SessionEvent::StatusPolled, EventPayload::new()).is_err());
        assert!(!workspace.exists());
        Ok(())
    }
}
