use std::collections::BTreeMap;

use pixelmind_contracts::jobs::GenerationJob;
use pixelmind_contracts::print::{PrintJob, PrintJobId};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::orchestrator::{Orchestrator, StatusReport, SubmitRequest};
use crate::print_queue::PrintQueue;

/// Caller-facing operations: generation sessions plus printing of their
/// results.
pub struct Booth {
    orchestrator: Orchestrator,
    prints: PrintQueue,
}

impl Booth {
    pub fn new(orchestrator: Orchestrator, prints: PrintQueue) -> Self {
        Self {
            orchestrator,
            prints,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self::new(
            Orchestrator::from_config(config)?,
            PrintQueue::default(),
        ))
    }

    /// Booth for workspace-only work (cleanup, printing finished results)
    /// that needs no API keys.
    pub fn local(config: &EngineConfig) -> Self {
        Self::new(Orchestrator::local(config), PrintQueue::default())
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn submit(&self, request: SubmitRequest) -> Result<GenerationJob, EngineError> {
        self.orchestrator.submit(request)
    }

    pub fn check_status(&self, session_id: &str) -> Result<StatusReport, EngineError> {
        self.orchestrator.check_status(session_id)
    }

    pub fn wait_for_completion(&self, session_id: &str) -> Result<StatusReport, EngineError> {
        self.orchestrator.wait_for_completion(session_id)
    }

    pub fn cleanup(&self, session_id: &str) -> Result<(), EngineError> {
        self.orchestrator.cleanup_session(session_id)
    }

    pub fn translate(&self, text: &str, source_hint: Option<&str>) -> Result<String, EngineError> {
        self.orchestrator.translate(text, source_hint)
    }

    /// Queues prints of the session's `image_index`-th (1-based) result.
    pub fn enqueue_print(
        &self,
        session_id: &str,
        image_index: usize,
        copies: u32,
        options: BTreeMap<String, String>,
    ) -> Result<PrintJobId, EngineError> {
        if copies == 0 {
            return Err(EngineError::InvalidRequest(
                "copies must be at least 1".to_string(),
            ));
        }
        if image_index == 0 {
            return Err(EngineError::InvalidRequest(
                "image index starts at 1".to_string(),
            ));
        }
        let image = self.orchestrator.result_image(session_id, image_index)?;
        let job_id = self.prints.enqueue(image.local_path, copies, options)?;
        info!(session_id, image_index, job_id, "print requested");
        Ok(job_id)
    }

    pub fn print_status(&self, job_id: PrintJobId) -> Result<PrintJob, EngineError> {
        self.prints.get_status(job_id)
    }

    pub fn process_print(&self, job_id: PrintJobId) -> Result<PrintJob, EngineError> {
        self.prints.process(job_id)
    }
}
