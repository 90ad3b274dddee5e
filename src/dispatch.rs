//! Serial work queues.
//!
//! A [`DispatchQueue`] runs closures one at a time, in submission order, on a
//! dedicated worker thread. The client keeps two: the main queue, which owns
//! every state transition and retry, and the user queue, which runs
//! subscription and state-change callbacks.

use crate::error::{ClientError, Result};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn increment(&self) {
        *self.count.lock() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

pub struct DispatchQueue {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    outstanding: Arc<Outstanding>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl DispatchQueue {
    /// Start a queue with its worker thread.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job>();
        let outstanding = Arc::new(Outstanding::default());

        let worker_outstanding = Arc::clone(&outstanding);
        let thread_name = name.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for job in receiver.iter() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(queue = %thread_name, "dispatched job panicked");
                    }
                    worker_outstanding.decrement();
                }
            })
            .map_err(|e| ClientError::Unexpected(format!("cannot start {}: {}", name, e)))?;

        let worker_id = worker.thread().id();
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            outstanding,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job. Returns false if the queue has been closed.
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return false;
        };
        self.outstanding.increment();
        if sender.send(Box::new(job)).is_err() {
            self.outstanding.decrement();
            return false;
        }
        true
    }

    /// Jobs queued or running.
    pub fn len(&self) -> usize {
        *self.outstanding.count.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when called from this queue's worker.
    pub fn on_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Block until every queued job has run. Returns false on timeout, or
    /// immediately when called from the worker itself.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        if self.on_worker_thread() {
            return self.is_empty();
        }
        let deadline = Instant::now() + timeout;
        let mut count = self.outstanding.count.lock();
        while *count > 0 {
            if self
                .outstanding
                .idle
                .wait_until(&mut count, deadline)
                .timed_out()
            {
                return *count == 0;
            }
        }
        true
    }

    /// Stop accepting jobs, let queued ones finish, and join the worker.
    pub fn close(&self) {
        self.sender.lock().take();
        if self.on_worker_thread() {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(queue = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.close();
    }
}
