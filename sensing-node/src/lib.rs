pub mod camera;
pub mod clock;
pub mod config;
pub mod detection;
pub mod error;
pub mod fifo;
pub mod pipeline;
pub mod remote;
pub mod settings;
pub mod stabilizer;
pub mod state;
pub mod stats;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Every mutex in the node guards data that stays valid across a panicking
/// holder, so a poisoned lock is recovered rather than propagated.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide stop flag observed by both loops.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
