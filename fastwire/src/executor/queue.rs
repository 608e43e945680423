use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, mpsc};

/// A unit of work executed by a queue thread.
pub type Job = Box<dyn FnOnce() + Send>;

/// FIFO job queue shared between producers and the threads draining it.
///
/// Threads park on a condition variable while the queue is empty. Once
/// shutdown is signalled, pushes are refused and threads exit as soon as
/// the jobs already queued have run.
pub(crate) struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Job>> {
        // Jobs run outside the lock, so a poisoned queue is still consistent.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends a job. Returns `false` if the queue is shutting down.
    pub(crate) fn push(&self, job: Job) -> bool {
        let mut jobs = self.lock();

        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }

        jobs.push_back(job);
        drop(jobs);

        self.condvar.notify_one();
        true
    }

    /// Blocks until a job is available.
    ///
    /// Returns `None` once shutdown was signalled and the queue is drained.
    pub(crate) fn pop(&self) -> Option<Job> {
        let mut jobs = self.lock();

        loop {
            if let Some(job) = jobs.pop_front() {
                return Some(job);
            }

            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }

            jobs = self.condvar.wait(jobs).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Signals shutdown and wakes every parked thread.
    pub(crate) fn shutdown(&self) {
        let _guard = self.lock();
        self.shutdown.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Thread body: run jobs until shutdown.
    pub(crate) fn run(&self) {
        while let Some(job) = self.pop() {
            job();
        }
    }
}

/// Cloneable submission handle to a [`SerialQueue`](super::SerialQueue)
/// or [`WorkerPool`](super::WorkerPool).
///
/// Handles never keep the threads alive: the owning queue decides when
/// they stop.
#[derive(Clone)]
pub struct QueueHandle {
    pub(crate) queue: Arc<JobQueue>,
}

impl QueueHandle {
    /// Submits `job`. Returns `false` if the owning queue has shut down,
    /// in which case the job is dropped without running.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(job))
    }

    /// Blocks until every job submitted before this call has started.
    ///
    /// On a single-threaded queue this means they have also finished.
    /// Must not be called from a thread of the same queue.
    pub fn sync(&self) {
        let (tx, rx) = mpsc::channel();

        if self.execute(move || {
            let _ = tx.send(());
        }) {
            let _ = rx.recv();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.queue.is_shutdown()
    }
}
