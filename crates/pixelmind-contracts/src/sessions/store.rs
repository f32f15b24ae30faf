use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{bail, Context};

use crate::events::EventWriter;
use crate::jobs::GenerationJob;

pub const SESSION_RECORD_FILE: &str = "session.json";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const RESULT_IMAGE_PREFIX: &str = "generated_";

/// Filesystem layout of session workspaces: `<root>/<session_id>/` holds the
/// original upload, `session.json`, `events.jsonl` and `generated_<n>.<ext>`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Session ids are opaque tokens; anything that could escape the root
    /// directory is rejected.
    pub fn is_valid_session_id(session_id: &str) -> bool {
        !session_id.is_empty()
            && session_id.len() <= 128
            && session_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    }

    pub fn workspace(&self, session_id: &str) -> Option<PathBuf> {
        if !Self::is_valid_session_id(session_id) {
            return None;
        }
        Some(self.root.join(session_id))
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.workspace(session_id)
            .map(|dir| dir.is_dir())
            .unwrap_or(false)
    }

    pub fn create_workspace(&self, session_id: &str) -> anyhow::Result<PathBuf> {
        let Some(dir) = self.workspace(session_id) else {
            bail!("invalid session id '{session_id}'");
        };
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        fs::create_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Returns `None` when the workspace or its record is missing.
    pub fn load(&self, session_id: &str) -> anyhow::Result<Option<GenerationJob>> {
        let Some(dir) = self.workspace(session_id) else {
            return Ok(None);
        };
        let path = dir.join(SESSION_RECORD_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading {}", path.display()))
            }
        };
        let job: GenerationJob = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt session record {}", path.display()))?;
        if job.session_id != session_id {
            bail!(
                "session record {} belongs to '{}'",
                path.display(),
                job.session_id
            );
        }
        Ok(Some(job))
    }

    /// Writes `session.json` through a temporary file and a rename so a crash
    /// mid-write leaves the previous record intact.
    pub fn save(&self, job: &GenerationJob) -> anyhow::Result<()> {
        let Some(dir) = self.workspace(&job.session_id) else {
            bail!("invalid session id '{}'", job.session_id);
        };
        if !dir.is_dir() {
            bail!("session workspace {} does not exist", dir.display());
        }
        let path = dir.join(SESSION_RECORD_FILE);
        let tmp = dir.join(format!("{SESSION_RECORD_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(job)?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Deletes the whole workspace. Returns `false` when there was nothing to
    /// delete.
    pub fn remove(&self, session_id: &str) -> anyhow::Result<bool> {
        let Some(dir) = self.workspace(session_id) else {
            return Ok(false);
        };
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", dir.display())),
        }
    }

    pub fn events(&self, session_id: &str) -> Option<EventWriter> {
        let dir = self.workspace(session_id)?;
        Some(EventWriter::new(dir.join(EVENTS_FILE), session_id))
    }

    pub fn original_image_path(&self, session_id: &str, file_name: &str) -> Option<PathBuf> {
        let dir = self.workspace(session_id)?;
        Some(dir.join(format!("original_{}", sanitize_file_name(file_name))))
    }

    pub fn result_image_path(&self, session_id: &str, index: usize, ext: &str) -> Option<PathBuf> {
        let dir = self.workspace(session_id)?;
        Some(dir.join(format!("{RESULT_IMAGE_PREFIX}{index}.{ext}")))
    }
}

/// Keeps only the final path component and replaces anything outside a
/// conservative character set.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload.jpg".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::jobs::{FailureKind, GenerationJob, JobStatus};

    use super::{sanitize_file_name, SessionStore, SESSION_RECORD_FILE};

    #[test]
    fn save_and_load_roundtrip_survives_new_store_instance() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SessionStore::new(temp.path().join("sessions"));
        store.create_workspace("abc-123")?;

        let mut job = GenerationJob::new("abc-123", "làm sáng ảnh", "model-1", 2, 512, 512);
        job.remote_job_id = Some("gen-42".to_string());
        job.advance(JobStatus::Uploading).map_err(anyhow::Error::msg)?;
        store.save(&job)?;

        let reopened = SessionStore::new(temp.path().join("sessions"));
        let loaded = reopened.load("abc-123")?;
        assert_eq!(loaded, Some(job));
        assert!(!temp
            .path()
            .join("sessions/abc-123/session.json.tmp")
            .exists());
        Ok(())
    }

    #[test]
    fn load_missing_workspace_or_record_is_none() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SessionStore::new(temp.path());
        assert_eq!(store.load("missing")?, None);

        store.create_workspace("empty")?;
        assert_eq!(store.load("empty")?, None);
        Ok(())
    }

    #[test]
    fn load_rejects_corrupt_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SessionStore::new(temp.path());
        let dir = store.create_workspace("broken")?;
        fs::write(dir.join(SESSION_RECORD_FILE), "{not json")?;
        assert!(store.load("broken").is_err());
        Ok(())
    }

    #[test]
    fn save_does_not_recreate_removed_workspace() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SessionStore::new(temp.path());
        store.create_workspace("gone")?;
        assert!(store.remove("gone")?);
        assert!(!store.remove("gone")?);

        let mut job = GenerationJob::new("gone", "x", "model-1", 1, 512, 512);
        job.fail(FailureKind::PollFailed, "boom")
            .map_err(anyhow::Error::msg)?;
        assert!(store.save(&job).is_err());
        assert!(!store.exists("gone"));
        Ok(())
    }

    #[test]
    fn traversal_session_ids_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = SessionStore::new(temp.path().join("sessions"));
        assert!(store.workspace("../escape").is_none());
        assert!(store.workspace("").is_none());
        assert!(store.create_workspace("a/b").is_err());
        assert_eq!(store.load("..")?, None);
        assert!(!store.remove("..")?);
        Ok(())
    }

    #[test]
    fn sanitize_file_name_keeps_last_component() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\photos\\me 1.jpg"), "me_1.jpg");
        assert_eq!(sanitize_file_name(""), "upload.jpg");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
    }
}
