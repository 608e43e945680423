use super::queue::{JobQueue, QueueHandle};

use log::debug;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The serialized writer execution context.
///
/// A single thread drains a FIFO of jobs, so at most one job runs at a
/// time and jobs run in submission order. Every write and every
/// writable-readiness flush of every connection goes through one of
/// these, which keeps each outbound buffer free of interleaved mutation.
///
/// Created at server start; dropping it runs the jobs already queued and
/// then joins the thread.
pub struct SerialQueue {
    queue: Arc<JobQueue>,
    thread: Option<JoinHandle<()>>,
}

impl SerialQueue {
    /// Starts the queue thread under `name`.
    pub fn new(name: &str) -> io::Result<Self> {
        let queue = Arc::new(JobQueue::new());
        let worker = queue.clone();

        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || worker.run())?;

        Ok(Self {
            queue,
            thread: Some(thread),
        })
    }

    /// Returns a submission handle.
    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            queue: self.queue.clone(),
        }
    }

    /// Stops accepting jobs, runs what is queued and joins the thread.
    pub fn shutdown(&mut self) {
        self.queue.shutdown();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("serial queue thread panicked");
            }
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = SerialQueue::new("test-serial").unwrap();
        let handle = queue.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            assert!(handle.execute(move || seen.lock().unwrap().push(i)));
        }

        handle.sync();

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_drains_then_refuses() {
        let mut queue = SerialQueue::new("test-serial").unwrap();
        let handle = queue.handle();
        let seen = Arc::new(Mutex::new(0));

        for _ in 0..10 {
            let seen = seen.clone();
            handle.execute(move || *seen.lock().unwrap() += 1);
        }

        queue.shutdown();

        assert_eq!(*seen.lock().unwrap(), 10);
        assert!(handle.is_shutdown());
        assert!(!handle.execute(|| {}));

        // A barrier on a stopped queue returns instead of hanging.
        handle.sync();
    }
}
