use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use super::error::CacheError;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named threads pulling jobs from one shared queue.
///
/// Dropping the pool closes the queue and joins every worker after the jobs
/// already queued have run.
pub(crate) struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(threads: usize, name: &str) -> Result<Self, CacheError> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut pool = Self {
            sender: Some(tx),
            workers: Vec::with_capacity(threads),
        };
        for index in 0..threads.max(1) {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&rx))
                .map_err(CacheError::Spawn)?;
            pool.workers.push(handle);
        }
        debug!(threads = pool.workers.len(), "render worker pool started");
        Ok(pool)
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn submit(&self, job: Job) -> Result<(), CacheError> {
        let sender = self.sender.as_ref().ok_or(CacheError::PoolClosed)?;
        sender.send(job).map_err(|_| CacheError::PoolClosed)
    }
}

fn worker_loop(rx: &Mutex<Receiver<Job>>) {
    loop {
        // Hold the lock only while waiting for the next job.
        let job = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match job {
            Ok(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("render job panicked; worker continues");
                }
            }
            Err(_) => break,
        }
    }
    trace!("render worker exiting");
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("open", &self.sender.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn runs_every_job_before_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3, "test-worker").unwrap();
        assert_eq!(pool.size(), 3);
        for _ in 0..20 {
            let count = Arc::clone(&count);
            pool.submit(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        drop(pool);
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::new(1, "sturdy").unwrap();
        pool.submit(Box::new(|| panic!("job blew up"))).unwrap();
        pool.submit(Box::new(move || {
            let _ = tx.send(42);
        }))
        .unwrap();
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)), Ok(42));
    }

    #[test]
    fn workers_are_named() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::new(1, "named").unwrap();
        pool.submit(Box::new(move || {
            let _ = tx.send(thread::current().name().map(str::to_owned));
        }))
        .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-0"));
    }
}
