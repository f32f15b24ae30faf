use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use pixelmind_contracts::events::{EventPayload, SessionEvent};
use pixelmind_contracts::jobs::{FailureKind, GenerationJob, JobFailure, JobStatus, ResultImage};
use pixelmind_contracts::models::{ModelSelector, ModelSpec, DEFAULT_IMAGE_MODEL};
use pixelmind_contracts::sessions::SessionStore;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, GenerationDefaults, PollPolicy};
use crate::error::EngineError;
use crate::generation::{
    FetchedImage, GenerationService, RemoteJobStatus, RemoteState, SubmitJobRequest,
};
use crate::leonardo::LeonardoClient;
use crate::prompt::enrich_prompt;
use crate::translate::{ChatTranslator, Translator};
use crate::extension_for_image;

/// Where the photo to transform comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes { file_name: String, bytes: Vec<u8> },
}

impl ImageSource {
    /// Decodes a base64 payload, with or without a `data:image/...;base64,`
    /// prefix. A file name without extension picks one up from the prefix.
    pub fn from_data_url(file_name: &str, payload: &str) -> Result<Self, EngineError> {
        let payload = payload.trim();
        let (mime, encoded) = match payload.strip_prefix("data:") {
            Some(rest) => {
                let Some((header, data)) = rest.split_once(',') else {
                    return Err(EngineError::InvalidRequest(
                        "data URL has no payload".to_string(),
                    ));
                };
                let mime = header.split(';').next().map(str::trim).unwrap_or_default();
                (Some(mime.to_string()), data)
            }
            None => (None, payload),
        };
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|err| EngineError::InvalidRequest(format!("image is not valid base64: {err}")))?;
        let mut file_name = file_name.trim().to_string();
        if file_name.is_empty() {
            file_name = "upload".to_string();
        }
        if Path::new(&file_name).extension().is_none() {
            let ext = extension_for_image(mime.as_deref(), "");
            file_name = format!("{file_name}.{ext}");
        }
        Ok(Self::Bytes { file_name, bytes })
    }

    fn file_name(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("upload.jpg")
                .to_string(),
            Self::Bytes { file_name, .. } => file_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub image: ImageSource,
    pub instruction: String,
    pub num_images: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Catalog alias or raw model id.
    pub model: Option<String>,
    pub source_language: Option<String>,
}

impl SubmitRequest {
    pub fn new(image: ImageSource, instruction: impl Into<String>) -> Self {
        Self {
            image,
            instruction: instruction.into(),
            num_images: None,
            width: None,
            height: None,
            model: None,
            source_language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub session_id: String,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<String>,
    /// Ordered by index; only populated once COMPLETE.
    pub images: Vec<ResultImage>,
}

impl StatusReport {
    fn from_job(job: &GenerationJob, remote_status: Option<String>) -> Self {
        let message = match job.status {
            JobStatus::Complete => format!("Generated {} image(s)", job.result_images.len()),
            JobStatus::Polling | JobStatus::Submitted => "Generation in progress".to_string(),
            other => format!("Job is {other}"),
        };
        Self {
            session_id: job.session_id.clone(),
            status: job.status,
            message,
            remote_status,
            images: job.result_images.clone(),
        }
    }
}

/// Drives a job through CREATED → UPLOADING → TRANSLATING → SUBMITTED →
/// POLLING → COMPLETE, persisting the record after every transition so any
/// process can pick a session up again by id.
pub struct Orchestrator {
    store: SessionStore,
    generator: Box<dyn GenerationService>,
    translator: Box<dyn Translator>,
    models: ModelSelector,
    default_model: String,
    defaults: GenerationDefaults,
    poll: PollPolicy,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        store: SessionStore,
        generator: Box<dyn GenerationService>,
        translator: Box<dyn Translator>,
    ) -> Self {
        Self {
            store,
            generator,
            translator,
            models: ModelSelector::new(None),
            default_model: DEFAULT_IMAGE_MODEL.to_string(),
            defaults: GenerationDefaults::default(),
            poll: PollPolicy::default(),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let generator = LeonardoClient::from_config(&config.leonardo)?;
        let translator = ChatTranslator::from_config(&config.translation)?;
        Ok(Self::new(
            SessionStore::new(config.workspace_root.clone()),
            Box::new(generator),
            Box::new(translator),
        )
        .with_default_model(&config.image_model)
        .with_defaults(config.defaults)
        .with_poll_policy(config.poll))
    }

    /// Orchestrator over the local workspace only. Session lookups, cleanup
    /// and result access work without credentials; anything that needs the
    /// remote services fails with a configuration error.
    pub fn local(config: &EngineConfig) -> Self {
        Self::new(
            SessionStore::new(config.workspace_root.clone()),
            Box::new(Disconnected),
            Box::new(Disconnected),
        )
        .with_default_model(&config.image_model)
        .with_defaults(config.defaults)
        .with_poll_policy(config.poll)
    }

    pub fn with_default_model(mut self, model: &str) -> Self {
        self.default_model = model.trim().to_string();
        self
    }

    pub fn with_defaults(mut self, defaults: GenerationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn translate(&self, text: &str, source_hint: Option<&str>) -> Result<String, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::InvalidRequest("text is empty".to_string()));
        }
        self.translator.translate(text, source_hint)
    }

    /// Runs the submission pipeline. Step failures come back as `Ok` with a
    /// FAILED job; `Err` is reserved for rejected input and local storage
    /// problems before a record exists.
    pub fn submit(&self, request: SubmitRequest) -> Result<GenerationJob, EngineError> {
        let instruction = request.instruction.trim().to_string();
        if instruction.is_empty() {
            return Err(EngineError::InvalidRequest(
                "instruction is empty".to_string(),
            ));
        }
        let num_images = positive(request.num_images, self.defaults.num_images, "num_images")?;
        let width = positive(request.width, self.defaults.width, "width")?;
        let height = positive(request.height, self.defaults.height, "height")?;
        if let ImageSource::Bytes { bytes, .. } = &request.image {
            if bytes.is_empty() {
                return Err(EngineError::InvalidRequest("image payload is empty".to_string()));
            }
        }
        let model = self.select_model(request.model.as_deref())?;

        let session_id = Uuid::new_v4().to_string();
        self.store
            .create_workspace(&session_id)
            .map_err(EngineError::storage)?;
        let mut job = GenerationJob::new(
            &session_id,
            &instruction,
            &model.model_id,
            num_images,
            width,
            height,
        );
        self.store.save(&job).map_err(EngineError::storage)?;
        info!(session_id = %session_id, model = %model.name, num_images, width, height, "session created");
        self.record_event(
            &session_id,
            SessionEvent::SessionCreated,
            json!({
                "instruction": instruction,
                "model": model.name,
                "model_id": model.model_id,
                "num_images": num_images,
                "width": width,
                "height": height,
            }),
        );

        let stored = match self.store_original(&session_id, &request.image) {
            Ok(path) => path,
            Err(err) => return self.failed_submission(job, err),
        };
        job.original_image = Some(stored.display().to_string());
        if let Err(err) = self.transition(&mut job, JobStatus::Uploading) {
            return self.failed_submission(job, err);
        }

        let image_id = match self.generator.upload_image(&stored) {
            Ok(image_id) => image_id,
            Err(err) => return self.failed_submission(job, err),
        };
        job.remote_image_id = Some(image_id.clone());
        self.record_event(
            &session_id,
            SessionEvent::ImageUploaded,
            json!({ "remote_image_id": image_id, "provider": self.generator.name() }),
        );
        if let Err(err) = self.transition(&mut job, JobStatus::Translating) {
            return self.failed_submission(job, err);
        }

        let working = match self
            .translator
            .translate(&instruction, request.source_language.as_deref())
        {
            Ok(translated) => {
                debug!(session_id = %session_id, "instruction translated");
                self.record_event(
                    &session_id,
                    SessionEvent::InstructionTranslated,
                    json!({ "original": instruction, "translated": translated }),
                );
                translated
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "translation failed; using original instruction");
                self.record_event(
                    &session_id,
                    SessionEvent::TranslationFallback,
                    json!({ "error": err.to_string() }),
                );
                instruction.clone()
            }
        };
        let prompt = enrich_prompt(&working);
        job.working_instruction = Some(working);
        job.enriched_prompt = Some(prompt.clone());

        let submit = SubmitJobRequest {
            image_id,
            prompt,
            model_id: model.model_id.clone(),
            width,
            height,
            num_images,
            extra: model.payload_defaults.clone(),
        };
        let remote_job_id = match self.generator.submit_job(&submit) {
            Ok(remote_job_id) => remote_job_id,
            Err(err) => return self.failed_submission(job, err),
        };
        job.remote_job_id = Some(remote_job_id.clone());
        if let Err(err) = self.transition(&mut job, JobStatus::Submitted) {
            return self.failed_submission(job, err);
        }
        info!(session_id = %session_id, remote_job_id = %remote_job_id, "generation submitted");
        self.record_event(
            &session_id,
            SessionEvent::JobSubmitted,
            json!({ "remote_job_id": remote_job_id, "prompt": submit.prompt }),
        );
        Ok(job)
    }

    /// Polls the remote job once and folds the answer into the record.
    /// COMPLETE sessions are answered from the record; FAILED sessions return
    /// the failure they recorded.
    pub fn check_status(&self, session_id: &str) -> Result<StatusReport, EngineError> {
        self.with_session_lock(session_id, || self.poll_once(session_id))
    }

    fn poll_once(&self, session_id: &str) -> Result<StatusReport, EngineError> {
        let mut job = self.load_job(session_id)?;
        match job.status {
            JobStatus::Complete => return Ok(StatusReport::from_job(&job, None)),
            JobStatus::Failed => return Err(EngineError::from_failure(&recorded_failure(&job))),
            _ => {}
        }
        let Some(remote_job_id) = job.remote_job_id.clone() else {
            return Err(EngineError::SessionNotFound(format!(
                "{session_id}: no remote job recorded"
            )));
        };

        if job.poll_attempts >= self.poll.max_attempts {
            let err = EngineError::PollTimeout {
                attempts: job.poll_attempts,
            };
            return Err(self.fail_job(&mut job, err));
        }
        job.poll_attempts += 1;
        job.touch();

        let remote = match self.generator.poll_status(&remote_job_id) {
            Ok(remote) => remote,
            Err(err) => return Err(self.fail_job(&mut job, err)),
        };
        debug!(
            session_id,
            remote_job_id = %remote_job_id,
            remote_status = %remote.raw_status,
            attempt = job.poll_attempts,
            "status polled"
        );
        self.record_event(
            session_id,
            SessionEvent::StatusPolled,
            json!({
                "remote_status": remote.raw_status,
                "attempt": job.poll_attempts,
                "images": remote.images.len(),
            }),
        );

        let state = remote.state.clone();
        match state {
            state if state.is_in_progress() => {
                if job.status == JobStatus::Submitted {
                    job.advance(JobStatus::Polling)
                        .map_err(EngineError::InvalidTransition)?;
                }
                self.store.save(&job).map_err(EngineError::storage)?;
                Ok(StatusReport::from_job(&job, Some(remote.raw_status)))
            }
            RemoteState::Failed => {
                let err = EngineError::RemoteJobFailed(format!(
                    "remote job {remote_job_id} reported {}",
                    remote.raw_status
                ));
                Err(self.fail_job(&mut job, err))
            }
            _ => self.complete(job, &remote_job_id, remote),
        }
    }

    /// Sleeps the initial delay, then checks status with capped exponential
    /// backoff until the job is terminal. The attempt budget enforced by
    /// `check_status` bounds the loop.
    pub fn wait_for_completion(&self, session_id: &str) -> Result<StatusReport, EngineError> {
        let job = self.load_job(session_id)?;
        if job.status.is_terminal() {
            return self.check_status(session_id);
        }
        if job.poll_attempts == 0 && !self.poll.initial_delay.is_zero() {
            info!(session_id, delay_s = self.poll.initial_delay.as_secs_f64(), "waiting before first status check");
            thread::sleep(self.poll.initial_delay);
        }
        let mut attempt = 0;
        loop {
            let report = self.check_status(session_id)?;
            if report.status.is_terminal() {
                return Ok(report);
            }
            let delay = self.poll.delay_after(attempt);
            debug!(session_id, attempt, delay_s = delay.as_secs_f64(), "generation still running");
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            attempt += 1;
        }
    }

    /// Deletes the session workspace. Unknown sessions succeed silently.
    pub fn cleanup_session(&self, session_id: &str) -> Result<(), EngineError> {
        self.with_session_lock(session_id, || {
            let removed = self.store.remove(session_id).map_err(EngineError::storage)?;
            info!(session_id, removed, "session cleaned up");
            Ok(())
        })
    }

    pub fn load_job(&self, session_id: &str) -> Result<GenerationJob, EngineError> {
        self.store
            .load(session_id)
            .map_err(EngineError::storage)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Downloaded result `index` (1-based) of a COMPLETE session.
    pub fn result_image(&self, session_id: &str, index: usize) -> Result<ResultImage, EngineError> {
        let job = self.load_job(session_id)?;
        let Some(image) = job
            .result_images
            .iter()
            .find(|image| image.index == index)
            .cloned()
        else {
            return Err(EngineError::FileNotFound(format!(
                "session {session_id} has no result image {index}"
            )));
        };
        if !image.local_path.is_file() {
            return Err(EngineError::FileNotFound(image.local_path.display().to_string()));
        }
        Ok(image)
    }

    fn complete(
        &self,
        mut job: GenerationJob,
        remote_job_id: &str,
        remote: RemoteJobStatus,
    ) -> Result<StatusReport, EngineError> {
        if remote.images.is_empty() {
            let err = EngineError::NoImagesGenerated(remote_job_id.to_string());
            return Err(self.fail_job(&mut job, err));
        }
        if job.status == JobStatus::Submitted {
            job.advance(JobStatus::Polling)
                .map_err(EngineError::InvalidTransition)?;
        }

        let mut results = Vec::with_capacity(remote.images.len());
        for (offset, image) in remote.images.iter().enumerate() {
            let index = offset + 1;
            let fetched = match self.generator.fetch_image_bytes(&image.url) {
                Ok(fetched) => fetched,
                Err(err) => return Err(self.fail_job(&mut job, err)),
            };
            let ext = extension_for_image(fetched.mime_type.as_deref(), &image.url);
            let Some(path) = self.store.result_image_path(&job.session_id, index, &ext) else {
                return Err(EngineError::SessionNotFound(job.session_id.clone()));
            };
            if let Err(err) = fs::write(&path, &fetched.bytes) {
                let err = EngineError::Storage(format!("failed to write {}: {err}", path.display()));
                return Err(self.fail_job(&mut job, err));
            }
            results.push(ResultImage {
                index,
                local_path: path,
                public_url: image.url.clone(),
            });
        }

        job.result_images = results;
        job.advance(JobStatus::Complete)
            .map_err(EngineError::InvalidTransition)?;
        self.store.save(&job).map_err(EngineError::storage)?;
        info!(session_id = %job.session_id, images = job.result_images.len(), "generation complete");
        self.record_event(
            &job.session_id,
            SessionEvent::ImagesDownloaded,
            json!({
                "remote_job_id": remote_job_id,
                "images": job
                    .result_images
                    .iter()
                    .map(|image| json!({
                        "index": image.index,
                        "local_path": image.local_path.display().to_string(),
                        "public_url": image.public_url,
                    }))
                    .collect::<Vec<_>>(),
            }),
        );
        Ok(StatusReport::from_job(&job, Some(remote.raw_status)))
    }

    fn select_model(&self, requested: Option<&str>) -> Result<ModelSpec, EngineError> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let selection = self
            .models
            .select(requested, &self.default_model)
            .map_err(EngineError::Config)?;
        if let Some(reason) = selection.fallback_reason.as_deref() {
            warn!(requested, selected = %selection.model.name, reason, "model fallback");
        }
        Ok(selection.model)
    }

    fn store_original(&self, session_id: &str, image: &ImageSource) -> Result<PathBuf, EngineError> {
        let Some(target) = self.store.original_image_path(session_id, &image.file_name()) else {
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        };
        match image {
            ImageSource::Path(source) => {
                if !source.is_file() {
                    return Err(EngineError::FileNotFound(source.display().to_string()));
                }
                fs::copy(source, &target).map_err(|err| {
                    EngineError::Storage(format!(
                        "failed to copy {} into workspace: {err}",
                        source.display()
                    ))
                })?;
            }
            ImageSource::Bytes { bytes, .. } => {
                fs::write(&target, bytes).map_err(|err| {
                    EngineError::Storage(format!("failed to write {}: {err}", target.display()))
                })?;
            }
        }
        Ok(target)
    }

    fn transition(&self, job: &mut GenerationJob, next: JobStatus) -> Result<(), EngineError> {
        job.advance(next).map_err(EngineError::InvalidTransition)?;
        self.store.save(job).map_err(EngineError::storage)?;
        debug!(session_id = %job.session_id, status = %next, "status changed");
        Ok(())
    }

    fn failed_submission(
        &self,
        mut job: GenerationJob,
        err: EngineError,
    ) -> Result<GenerationJob, EngineError> {
        self.fail_job(&mut job, err);
        Ok(job)
    }

    /// Marks the job FAILED, persists it and hands the error back for the
    /// caller to return.
    fn fail_job(&self, job: &mut GenerationJob, err: EngineError) -> EngineError {
        let failure = err.to_failure();
        let previous = job.status;
        if let Err(reason) = job.fail(failure.kind, failure.detail.clone()) {
            return EngineError::InvalidTransition(reason);
        }
        if let Err(save_err) = self.store.save(job) {
            error!(session_id = %job.session_id, error = %format!("{save_err:#}"), "failed to persist failed job");
        }
        error!(
            session_id = %job.session_id,
            kind = %failure.kind,
            from = %previous,
            detail = %failure.detail,
            "job failed"
        );
        self.record_event(
            &job.session_id,
            SessionEvent::JobFailed,
            json!({
                "kind": failure.kind.as_str(),
                "detail": failure.detail,
                "from_status": previous.as_str(),
            }),
        );
        err
    }

    fn record_event(&self, session_id: &str, event: SessionEvent, payload: Value) {
        let Some(writer) = self.store.events(session_id) else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = writer.emit(event, payload) {
            warn!(session_id, event = %event, error = %format!("{err:#}"), "failed to append session event");
        }
    }

    /// Runs `op` holding the per-session lock. Ids without a workspace get no
    /// lock entry, and an entry is dropped once its last holder releases it.
    fn with_session_lock<T>(&self, session_id: &str, op: impl FnOnce() -> T) -> T {
        if !self.store.exists(session_id) {
            return op();
        }
        let lock = self
            .session_locks
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            op()
        };
        let mut locks = self.session_locks.lock();
        drop(lock);
        if locks
            .get(session_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(session_id);
        }
        result
    }
}

/// Stands in for the remote services when none are configured.
struct Disconnected;

impl Disconnected {
    fn refuse<T>(&self) -> Result<T, EngineError> {
        Err(EngineError::Config(
            "remote services are not configured for this operation".to_string(),
        ))
    }
}

impl GenerationService for Disconnected {
    fn name(&self) -> &str {
        "disconnected"
    }

    fn upload_image(&self, _path: &Path) -> Result<String, EngineError> {
        self.refuse()
    }

    fn submit_job(&self, _request: &SubmitJobRequest) -> Result<String, EngineError> {
        self.refuse()
    }

    fn poll_status(&self, _remote_job_id: &str) -> Result<RemoteJobStatus, EngineError> {
        self.refuse()
    }

    fn fetch_image_bytes(&self, _url: &str) -> Result<FetchedImage, EngineError> {
        self.refuse()
    }
}

impl Translator for Disconnected {
    fn translate(&self, _text: &str, _source_hint: Option<&str>) -> Result<String, EngineError> {
        self.refuse()
    }
}

fn positive(value: Option<u32>, default: u32, field: &str) -> Result<u32, EngineError> {
    match value {
        None => Ok(default),
        Some(0) => Err(EngineError::InvalidRequest(format!(
            "{field} must be positive"
        ))),
        Some(value) => Ok(value),
    }
}

fn recorded_failure(job: &GenerationJob) -> JobFailure {
    job.failure.clone().unwrap_or_else(|| JobFailure {
        kind: FailureKind::Storage,
        detail: format!("session {} failed without a recorded reason", job.session_id),
    })
}
