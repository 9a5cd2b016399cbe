use crate::{error::Result, scheduler::Scheduler};
use std::sync::Arc;

#[cfg(feature = "parking-lot")]
use parking_lot::{Mutex, MutexGuard};
#[cfg(not(feature = "parking-lot"))]
use std::sync::{Mutex, MutexGuard};

/// A [`Scheduler`] shared between request handlers.
///
/// Every operation runs under one lock, so allocation, submission and
/// densification are observed atomically by all callers.
///
/// # Example
///
/// ```
/// use cascade::{
///     MemoryStore, MonotonicClock, Project, Scheduler, SchedulerConfig, Sequencer,
///     SharedScheduler, ValueRange, VarKind,
/// };
///
/// let seq = Sequencer::builder()
///     .dimension("X", VarKind::Double, ValueRange::linear(0.0, 1.0, 1).unwrap())
///     .build()
///     .unwrap();
/// let project = Project::builder("demo", seq)
///     .password("secret")
///     .output("E", VarKind::Double)
///     .build()
///     .unwrap();
/// let scheduler = Scheduler::new(
///     project,
///     MemoryStore::new(),
///     MonotonicClock::default(),
///     SchedulerConfig::default(),
/// )
/// .unwrap();
///
/// let shared = SharedScheduler::new(scheduler);
/// let reg = shared.lock().unwrap().register_client(Some("fleet"), "secret").unwrap();
/// assert_eq!(reg.name, "fleet");
/// ```
#[derive(Debug)]
pub struct SharedScheduler<S, T> {
    inner: Arc<Mutex<Scheduler<S, T>>>,
}

impl<S, T> Clone for SharedScheduler<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, T> SharedScheduler<S, T> {
    pub fn new(scheduler: Scheduler<S, T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(scheduler)),
        }
    }

    /// Locks the scheduler for one operation.
    ///
    /// # Errors
    ///
    /// Without the `parking-lot` feature, returns
    /// [`Error::LockPoisoned`](crate::Error) if a previous holder panicked.
    pub fn lock(&self) -> Result<MutexGuard<'_, Scheduler<S, T>>> {
        #[cfg(feature = "parking-lot")]
        {
            Ok(self.inner.lock())
        }
        #[cfg(not(feature = "parking-lot"))]
        {
            Ok(self.inner.lock()?)
        }
    }
}
