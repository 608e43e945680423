use super::queue::{JobQueue, QueueHandle};

use log::debug;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A fixed set of worker threads for jobs that may block.
///
/// Blocking consumers such as a FastCGI response reader live here, never
/// on the reactor thread.
///
/// Dropping the pool waits for running jobs to return, so consumers that
/// block on a [`BlockingReader`](crate::adapter::BlockingReader) must be
/// released (by closing their reader) before the pool goes away.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads == 0`.
    pub fn new(threads: usize) -> io::Result<Self> {
        assert!(threads > 0, "worker pool needs at least one thread");

        let queue = Arc::new(JobQueue::new());
        let mut handles = Vec::with_capacity(threads);

        for id in 0..threads {
            let worker = queue.clone();

            let handle = thread::Builder::new()
                .name(format!("fastwire-worker-{id}"))
                .spawn(move || worker.run());

            match handle {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    queue.shutdown();
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            queue,
            threads: handles,
        })
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            queue: self.queue.clone(),
        }
    }

    /// Runs `job` on the next free worker.
    pub fn spawn<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(job))
    }

    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Stops accepting jobs and joins every worker.
    pub fn shutdown(&mut self) {
        self.queue.shutdown();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                debug!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
