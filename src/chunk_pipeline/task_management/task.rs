//! # Task System Core Trait
//!
//! A `Task` is one unit of CPU work executed on the worker pool. Tasks own (or
//! share through `MtResource`) everything they touch, so no task result ever has
//! to travel back to the coordinating thread: completion is observed through the
//! `JobHandle` returned by `TaskManager::publish_task`.
//!
//! ## Task Lifecycle
//! 1. A `Task` is published together with the handle it depends on
//! 2. Once that dependency completes, the task is sent to a worker
//! 3. `process()` runs on the worker thread
//! 4. The task's own handle completes and dependents become ready
//!
//! ## Thread Safety
//! - `Task` must be `Send` to be transferred between threads
//! - All shared state must be properly synchronized

/// A trait representing a unit of work that can be executed asynchronously.
///
/// # Implementation Guidelines
/// - Must be `Send` to be transferred between threads
/// - Should be coarse-grained (a whole meshing stage, a whole volume copy)
/// - Must not block on other job handles; ordering is expressed through the
///   dependency passed to `publish_task`
pub trait Task: Send {
    /// Short name used in worker logs.
    fn name(&self) -> &'static str;

    /// Performs the work. Consumes the task so it can move its buffers out.
    fn process(self: Box<Self>);
}

/// Adapts a closure into a `Task`.
pub struct FnTask<F> {
    name: &'static str,
    work: F,
}

impl<F> FnTask<F>
where
    F: FnOnce() + Send,
{
    pub fn new(name: &'static str, work: F) -> Self {
        Self { name, work }
    }
}

impl<F> Task for FnTask<F>
where
    F: FnOnce() + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(self: Box<Self>) {
        (self.work)()
    }
}
