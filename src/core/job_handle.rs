//! # Job Handles
//!
//! Completion handles for asynchronous work. Every pipeline stage that touches a
//! shared buffer (copy, padding, edit, the five meshing stages, collider bakes) is
//! scheduled behind the handle of the work it depends on and produces a handle of
//! its own. `JobHandle::combine` joins several handles into one.
//!
//! Handles are polled, never required to block: the coordinator checks
//! `is_complete()` once per tick and defers work whose inputs are still busy.
//! `wait()` exists for shutdown paths and tests.

use std::sync::{Arc, Condvar, Mutex};

#[derive(Debug, Default)]
struct Signal {
    done: Mutex<bool>,
    ready: Condvar,
}

impl Signal {
    fn is_set(&self) -> bool {
        *self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set(&self) {
        let mut done = self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *done = true;
        self.ready.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*done {
            done = self
                .ready
                .wait(done)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

#[derive(Clone, Debug)]
enum HandleState {
    Completed,
    Pending(Arc<Signal>),
    Joined(Arc<[JobHandle]>),
}

/// A cloneable handle to work that completes at some later point.
///
/// # Examples
/// ```
/// use voxel_chunk_pipeline::core::JobHandle;
///
/// let (copy, copy_signal) = JobHandle::pending();
/// let (pad, pad_signal) = JobHandle::pending();
/// let both = JobHandle::combine([copy, pad]);
///
/// copy_signal.complete();
/// assert!(!both.is_complete());
/// drop(pad_signal);
/// assert!(both.is_complete());
/// ```
#[derive(Clone, Debug)]
pub struct JobHandle {
    state: HandleState,
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::completed()
    }
}

impl JobHandle {
    /// A handle that is already complete.
    pub fn completed() -> Self {
        Self {
            state: HandleState::Completed,
        }
    }

    /// Creates an incomplete handle and the signal that completes it.
    ///
    /// # Returns
    /// The handle (cloneable, given to dependents) and the `JobSignal` owned by
    /// whoever performs the work
    pub fn pending() -> (Self, JobSignal) {
        let signal = Arc::new(Signal::default());
        (
            Self {
                state: HandleState::Pending(signal.clone()),
            },
            JobSignal {
                signal,
                fired: false,
            },
        )
    }

    /// Joins handles into one that completes once every input has completed.
    ///
    /// Inputs that are already complete are dropped at join time so chains of
    /// combined handles do not grow without bound.
    pub fn combine<I>(handles: I) -> Self
    where
        I: IntoIterator<Item = JobHandle>,
    {
        let mut outstanding: Vec<JobHandle> = handles
            .into_iter()
            .filter(|handle| !handle.is_complete())
            .collect();

        match outstanding.len() {
            0 => Self::completed(),
            1 => outstanding.remove(0),
            _ => Self {
                state: HandleState::Joined(outstanding.into()),
            },
        }
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        match &self.state {
            HandleState::Completed => true,
            HandleState::Pending(signal) => signal.is_set(),
            HandleState::Joined(handles) => handles.iter().all(JobHandle::is_complete),
        }
    }

    /// Blocks the calling thread until the handle completes.
    pub fn wait(&self) {
        match &self.state {
            HandleState::Completed => {}
            HandleState::Pending(signal) => signal.wait(),
            HandleState::Joined(handles) => handles.iter().for_each(JobHandle::wait),
        }
    }
}

/// The completing side of a `JobHandle`.
///
/// Dropping the signal completes the handle as well, so a task that panics on a
/// worker thread never leaves its dependents waiting forever.
#[derive(Debug)]
pub struct JobSignal {
    signal: Arc<Signal>,
    fired: bool,
}

impl JobSignal {
    /// Marks the associated handle complete.
    pub fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if !self.fired {
            self.fired = true;
            self.signal.set();
        }
    }
}

impl Drop for JobSignal {
    fn drop(&mut self) {
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_completed_handle() {
        assert!(JobHandle::completed().is_complete());
        assert!(JobHandle::default().is_complete());
    }

    #[test]
    fn test_pending_completes_on_signal() {
        let (handle, signal) = JobHandle::pending();
        let observer = handle.clone();
        assert!(!handle.is_complete());
        signal.complete();
        assert!(handle.is_complete());
        assert!(observer.is_complete());
    }

    #[test]
    fn test_dropped_signal_completes() {
        let (handle, signal) = JobHandle::pending();
        drop(signal);
        assert!(handle.is_complete());
    }

    #[test]
    fn test_combine_waits_for_all() {
        let (a, signal_a) = JobHandle::pending();
        let (b, signal_b) = JobHandle::pending();
        let joined = JobHandle::combine([a, b, JobHandle::completed()]);

        signal_b.complete();
        assert!(!joined.is_complete());
        signal_a.complete();
        assert!(joined.is_complete());
    }

    #[test]
    fn test_combine_of_nothing_is_complete() {
        assert!(JobHandle::combine(Vec::new()).is_complete());
    }

    #[test]
    fn test_wait_across_threads() {
        let (handle, signal) = JobHandle::pending();
        let worker = thread::spawn(move || signal.complete());
        handle.wait();
        assert!(handle.is_complete());
        worker.join().unwrap();
    }
}
