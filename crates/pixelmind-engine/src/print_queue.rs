use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use pixelmind_contracts::print::{PrintJob, PrintJobId, PrintStatus};
use tracing::{error, info};

use crate::error::EngineError;

/// Append-only arena of print jobs. A job's id is its index and is never
/// reused; `append` must assign ids atomically.
pub trait PrintStore: Send + Sync {
    fn append(&self, build: &mut dyn FnMut(PrintJobId) -> PrintJob) -> PrintJobId;
    fn get(&self, job_id: PrintJobId) -> Option<PrintJob>;
    fn update(&self, job_id: PrintJobId, apply: &mut dyn FnMut(&mut PrintJob)) -> Option<PrintJob>;
    fn len(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryPrintStore {
    jobs: Mutex<Vec<PrintJob>>,
}

impl InMemoryPrintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrintStore for InMemoryPrintStore {
    fn append(&self, build: &mut dyn FnMut(PrintJobId) -> PrintJob) -> PrintJobId {
        let mut jobs = self.jobs.lock();
        let job_id = jobs.len() as PrintJobId;
        jobs.push(build(job_id));
        job_id
    }

    fn get(&self, job_id: PrintJobId) -> Option<PrintJob> {
        let index = usize::try_from(job_id).ok()?;
        self.jobs.lock().get(index).cloned()
    }

    fn update(&self, job_id: PrintJobId, apply: &mut dyn FnMut(&mut PrintJob)) -> Option<PrintJob> {
        let index = usize::try_from(job_id).ok()?;
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(index)?;
        apply(job);
        Some(job.clone())
    }

    fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}

/// The physical print action.
pub trait Printer: Send + Sync {
    fn print(&self, job: &PrintJob) -> Result<(), String>;
}

/// Stand-in for printer hardware: logs the job and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedPrinter;

impl Printer for SimulatedPrinter {
    fn print(&self, job: &PrintJob) -> Result<(), String> {
        info!(
            job_id = job.job_id,
            image = %job.image_path.display(),
            copies = job.copies,
            "simulated print"
        );
        Ok(())
    }
}

pub struct PrintQueue {
    store: Box<dyn PrintStore>,
    printer: Box<dyn Printer>,
}

impl Default for PrintQueue {
    fn default() -> Self {
        Self::new(Box::new(InMemoryPrintStore::new()), Box::new(SimulatedPrinter))
    }
}

impl PrintQueue {
    pub fn new(store: Box<dyn PrintStore>, printer: Box<dyn Printer>) -> Self {
        Self { store, printer }
    }

    /// Queues `copies` prints of `image_path`. The file must exist now; the
    /// returned id is the queue length before the append.
    pub fn enqueue(
        &self,
        image_path: impl Into<PathBuf>,
        copies: u32,
        options: BTreeMap<String, String>,
    ) -> Result<PrintJobId, EngineError> {
        let image_path = image_path.into();
        if copies == 0 {
            return Err(EngineError::InvalidRequest(
                "copies must be at least 1".to_string(),
            ));
        }
        if !image_path.is_file() {
            return Err(EngineError::FileNotFound(image_path.display().to_string()));
        }
        let mut options = Some(options);
        let mut path = Some(image_path);
        let job_id = self.store.append(&mut |job_id| {
            PrintJob::queued(
                job_id,
                path.take().unwrap_or_default(),
                copies,
                options.take().unwrap_or_default(),
            )
        });
        info!(job_id, copies, "print job queued");
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: PrintJobId) -> Result<PrintJob, EngineError> {
        self.store
            .get(job_id)
            .ok_or(EngineError::InvalidJobId(job_id))
    }

    /// QUEUED → PROCESSING → COMPLETED, or FAILED when the printer errors.
    /// Jobs that already left QUEUED are returned unchanged. The QUEUED check
    /// and the claim happen in one store update, so concurrent callers print
    /// a job at most once.
    pub fn process(&self, job_id: PrintJobId) -> Result<PrintJob, EngineError> {
        let mut claimed = false;
        let job = self
            .store
            .update(job_id, &mut |job| {
                if job.status == PrintStatus::Queued {
                    job.status = PrintStatus::Processing;
                    claimed = true;
                }
            })
            .ok_or(EngineError::InvalidJobId(job_id))?;
        if !claimed {
            return Ok(job);
        }

        let outcome = self.printer.print(&job);
        let finished = self
            .store
            .update(job_id, &mut |job| match &outcome {
                Ok(()) => job.status = PrintStatus::Completed,
                Err(reason) => {
                    job.status = PrintStatus::Failed;
                    job.error = Some(reason.clone());
                }
            })
            .ok_or(EngineError::InvalidJobId(job_id))?;
        match &finished.error {
            Some(reason) => error!(job_id, error = %reason, "print job failed"),
            None => info!(job_id, "print job completed"),
        }
        Ok(finished)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use pixelmind_contracts::print::{PrintJob, PrintJobId, PrintStatus};

    use crate::error::EngineError;

    use super::{InMemoryPrintStore, PrintQueue, PrintStore, Printer};

    struct JammedPrinter;

    impl Printer for JammedPrinter {
        fn print(&self, _job: &PrintJob) -> Result<(), String> {
            Err("paper jam".to_string())
        }
    }

    struct CountingPrinter(Arc<AtomicUsize>);

    impl Printer for CountingPrinter {
        fn print(&self, _job: &PrintJob) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Widens the window between reading a job and changing it.
    struct SlowStore(InMemoryPrintStore);

    impl PrintStore for SlowStore {
        fn append(&self, build: &mut dyn FnMut(PrintJobId) -> PrintJob) -> PrintJobId {
            self.0.append(build)
        }

        fn get(&self, job_id: PrintJobId) -> Option<PrintJob> {
            thread::sleep(Duration::from_millis(50));
            self.0.get(job_id)
        }

        fn update(&self, job_id: PrintJobId, apply: &mut dyn FnMut(&mut PrintJob)) -> Option<PrintJob> {
            thread::sleep(Duration::from_millis(50));
            self.0.update(job_id, apply)
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn concurrent_process_prints_once() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("a.jpg");
        fs::write(&image, b"x")?;
        let prints = Arc::new(AtomicUsize::new(0));
        let queue = PrintQueue::new(
            Box::new(SlowStore(InMemoryPrintStore::new())),
            Box::new(CountingPrinter(prints.clone())),
        );
        let job_id = queue.enqueue(&image, 1, BTreeMap::new())?;

        let results: Vec<Result<PrintJob, EngineError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| queue.process(job_id))).collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("worker panicked"))
                .collect()
        });

        assert_eq!(prints.load(Ordering::SeqCst), 1);
        for result in results {
            assert!(result.is_ok());
        }
        assert_eq!(queue.get_status(job_id)?.status, PrintStatus::Completed);
        Ok(())
    }

    #[test]
    fn concurrent_enqueue_assigns_dense_unique_ids() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("generated_1.jpg");
        fs::write(&image, b"jpeg")?;
        let queue = PrintQueue::default();
        let workers = 8;
        let per_worker = 25;

        let ids: Vec<i64> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        (0..per_worker)
                            .map(|_| queue.enqueue(&image, 1, BTreeMap::new()))
                            .collect::<Result<Vec<_>, _>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("worker panicked"))
                .collect::<Result<Vec<Vec<i64>>, EngineError>>()
        })?
        .into_iter()
        .flatten()
        .collect();

        let total = workers * per_worker;
        let unique: BTreeSet<i64> = ids.iter().copied().collect();
        assert_eq!(ids.len(), total);
        assert_eq!(unique, (0..total as i64).collect::<BTreeSet<_>>());
        assert_eq!(queue.len(), total);
        Ok(())
    }

    #[test]
    fn missing_file_is_rejected_before_queueing() {
        let queue = PrintQueue::default();

        let err = queue.enqueue("/nonexistent.jpg", 1, BTreeMap::new()).err();

        assert!(matches!(err, Some(EngineError::FileNotFound(_))));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn zero_copies_is_invalid() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("a.jpg");
        fs::write(&image, b"x")?;
        let queue = PrintQueue::default();

        let err = queue.enqueue(&image, 0, BTreeMap::new()).err();

        assert!(matches!(err, Some(EngineError::InvalidRequest(_))));
        assert!(queue.is_empty());
        Ok(())
    }

    #[test]
    fn status_lookup_outside_range_is_invalid_job_id() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("a.jpg");
        fs::write(&image, b"x")?;
        let queue = PrintQueue::default();
        queue.enqueue(&image, 2, BTreeMap::new())?;

        assert_eq!(queue.get_status(0)?.copies, 2);
        assert_eq!(queue.get_status(1).err(), Some(EngineError::InvalidJobId(1)));
        assert_eq!(queue.get_status(-1).err(), Some(EngineError::InvalidJobId(-1)));
        Ok(())
    }

    #[test]
    fn process_completes_job_and_keeps_options() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("a.jpg");
        fs::write(&image, b"x")?;
        let queue = PrintQueue::default();
        let mut options = BTreeMap::new();
        options.insert("paper".to_string(), "4x6".to_string());
        let job_id = queue.enqueue(&image, 3, options.clone())?;
        assert_eq!(queue.get_status(job_id)?.status, PrintStatus::Queued);

        let done = queue.process(job_id)?;

        assert_eq!(done.status, PrintStatus::Completed);
        assert_eq!(done.error, None);
        assert_eq!(done.options, options);
        assert_eq!(queue.get_status(job_id)?, done);
        assert_eq!(queue.process(job_id)?, done);
        Ok(())
    }

    #[test]
    fn printer_error_fails_the_job() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("a.jpg");
        fs::write(&image, b"x")?;
        let queue = PrintQueue::new(Box::new(InMemoryPrintStore::new()), Box::new(JammedPrinter));
        let job_id = queue.enqueue(&image, 1, BTreeMap::new())?;

        let failed = queue.process(job_id)?;

        assert_eq!(failed.status, PrintStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("paper jam"));
        assert_eq!(queue.process(99).err(), Some(EngineError::InvalidJobId(99)));
        Ok(())
    }
}
