//! Named background threads that can be joined with a deadline.
//!
//! The remote loop may sit inside a blocking long-poll when shutdown is
//! requested. Joining it unconditionally would hold the process for the whole
//! poll timeout, so shutdown waits for a bounded grace period and then
//! detaches whatever is still running.

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Finished,
    Panicked,
    /// Still running when the grace period ran out; the thread was detached.
    Detached,
}

pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, done) = channel::bounded(1);
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            body();
            let _ = tx.send(());
        })?;
        Ok(Self {
            name: name.to_string(),
            handle,
            done,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits at most `grace` for the thread to return.
    pub fn join_within(self, grace: Duration) -> WorkerExit {
        match self.done.recv_timeout(grace) {
            // A panicking body drops the sender without sending.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!("{} thread panicked", self.name);
                    WorkerExit::Panicked
                } else {
                    WorkerExit::Finished
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "{} thread still busy after {:?}; detaching it",
                    self.name, grace
                );
                WorkerExit::Detached
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_finished_worker_joins() {
        let worker = Worker::spawn("quick", || {}).unwrap();
        assert_eq!(worker.name(), "quick");
        assert_eq!(worker.join_within(Duration::from_secs(5)), WorkerExit::Finished);
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        let worker = Worker::spawn("doomed", || panic!("boom")).unwrap();
        assert_eq!(worker.join_within(Duration::from_secs(5)), WorkerExit::Panicked);
    }

    #[test]
    fn test_blocked_worker_is_detached_after_grace() {
        let (release, gate) = channel::bounded::<()>(0);
        let worker = Worker::spawn("stuck", move || {
            let _ = gate.recv();
        })
        .unwrap();

        let started = Instant::now();
        assert_eq!(worker.join_within(Duration::from_millis(100)), WorkerExit::Detached);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(release);
    }
}
