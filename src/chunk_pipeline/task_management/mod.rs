//! # Task Management System
//!
//! A small worker pool that executes the pipeline's CPU work: volume copies after
//! a readback, the five meshing stages, and collider bakes.
//!
//! ## Architecture Overview
//!
//! - `TaskManager`: Central coordinator for task distribution and worker management
//! - `Task`: A unit of work that can be executed asynchronously
//! - `TaskChannel`: Communication channel between the coordinating thread and one worker
//!
//! Every published task carries a dependency `JobHandle`. A task stays queued on
//! the coordinating thread until its dependency completes, then it is handed to a
//! worker using round-robin selection. Because readiness is checked by polling,
//! neither the coordinator nor any worker ever blocks on another task.
//!
//! ## Inline Mode
//! A manager created with zero workers runs every ready task on the calling thread
//! inside `process_queued_tasks()`. The pipeline behaves identically, only
//! serialized, which makes multi-tick scenarios deterministic in tests.
//!
//! ## Task Lifecycle
//! 1. Tasks are created and published via `TaskManager::publish_task()`
//! 2. Ready tasks are distributed to available worker channels
//! 3. Workers process tasks and complete the task's `JobHandle`
//! 4. `process_completed_tasks()` frees the worker slots on the coordinating thread
//!
//! ## Performance Considerations
//! - **Task Granularity**: one task per stage per chunk keeps scheduling overhead low
//! - **Memory**: tasks share volumes through `MtResource` instead of cloning them
//! - **Blocking**: tasks never wait on handles; ordering comes from dependencies
//!
//! ## Example Usage
//! ```rust
//! use voxel_chunk_pipeline::chunk_pipeline::task_management::{task::FnTask, TaskManager};
//! use voxel_chunk_pipeline::core::JobHandle;
//!
//! let mut task_manager = TaskManager::new(0).unwrap();
//! let first = task_manager.publish_task(Box::new(FnTask::new("first", || {})), JobHandle::completed());
//! let second = task_manager.publish_task(Box::new(FnTask::new("second", || {})), first.clone());
//!
//! task_manager.process_queued_tasks();
//! assert!(first.is_complete() && second.is_complete());
//! ```

pub mod task;

use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, SendError, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use task::Task;

use crate::core::{JobHandle, JobSignal};
use crate::error::Result;

/// A task together with the signal completed after it runs.
struct ScheduledTask {
    task: Box<dyn Task>,
    signal: JobSignal,
}

impl ScheduledTask {
    fn run(self) -> &'static str {
        let name = self.task.name();
        self.task.process();
        self.signal.complete();
        name
    }
}

/// Reports a finished task back to the coordinating thread.
///
/// Reports on drop if `send` was never reached, so a slot is freed even when
/// the task unwinds.
struct CompletionReport<'a> {
    sender: &'a Sender<&'static str>,
    name: &'static str,
}

impl CompletionReport<'_> {
    fn send(self) -> std::result::Result<(), SendError<&'static str>> {
        let report = ManuallyDrop::new(self);
        report.sender.send(report.name)
    }
}

impl Drop for CompletionReport<'_> {
    fn drop(&mut self) {
        let _ = self.sender.send(self.name);
    }
}

/// A task waiting on the coordinating thread for its dependency.
struct QueuedTask {
    scheduled: ScheduledTask,
    dependency: JobHandle,
}

/// A communication channel between the coordinating thread and a worker thread.
///
/// # Fields
/// - `task_sender`: Sends ready tasks to the worker
/// - `completion_receiver`: Receives the name of every task the worker finished
/// - `num_tasks_in_flight`: Tracks number of tasks currently being processed
/// - `_worker`: Handle to the worker thread (kept alive by this struct)
pub struct TaskChannel {
    task_sender: Sender<ScheduledTask>,
    completion_receiver: Receiver<&'static str>,
    num_tasks_in_flight: usize,
    _worker: JoinHandle<()>,
}

/// Manages a pool of worker threads and coordinates task execution.
///
/// # Fields
/// - `channels`: Set of active worker channels (empty in inline mode)
/// - `queued_tasks`: Tasks whose dependency is pending or that found no free worker
/// - `current_channel`: Index for round-robin scheduling
/// - `completed_tasks`: Running total, used for diagnostics
pub struct TaskManager {
    channels: Vec<TaskChannel>,
    queued_tasks: VecDeque<QueuedTask>,
    current_channel: usize,
    completed_tasks: u64,
}

/// Maximum number of tasks that can be in flight per worker channel.
///
/// Tasks are pushed to a worker only once their dependency completed, so a
/// worker never holds a task that would wait for another worker.
pub const MAX_TASKS_IN_FLIGHT: usize = 2;

impl TaskManager {
    /// Creates a new `TaskManager` with the specified number of worker threads.
    ///
    /// # Arguments
    /// * `num_workers` - Number of worker threads to create. Zero selects inline mode.
    ///
    /// # Returns
    /// The manager, or `PipelineError::Io` if a worker thread could not be spawned
    pub fn new(num_workers: usize) -> Result<Self> {
        let mut channels = Vec::with_capacity(num_workers);

        for worker_index in 0..num_workers {
            let (task_tx, task_rx) = channel::<ScheduledTask>();
            let (completion_tx, completion_rx) = channel::<&'static str>();

            let task_closure = move || {
                while let Ok(scheduled) = task_rx.recv() {
                    let report = CompletionReport {
                        sender: &completion_tx,
                        name: scheduled.task.name(),
                    };
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| scheduled.run()));
                    if outcome.is_err() {
                        warn!("Task {} panicked on worker {worker_index}", report.name);
                    }
                    if report.send().is_err() {
                        break;
                    }
                }
            };

            let worker = thread::Builder::new()
                .name(format!("chunk-worker-{worker_index}"))
                .spawn(task_closure)?;

            channels.push(TaskChannel {
                task_sender: task_tx,
                completion_receiver: completion_rx,
                num_tasks_in_flight: 0,
                _worker: worker,
            });
        }

        if num_workers == 0 {
            info!("Task manager running inline on the coordinating thread");
        } else {
            info!(
                "Task manager started {num_workers} workers (available parallelism: {:?})",
                thread::available_parallelism()
            );
        }

        Ok(TaskManager {
            channels,
            queued_tasks: VecDeque::new(),
            current_channel: 0,
            completed_tasks: 0,
        })
    }

    pub fn is_inline(&self) -> bool {
        self.channels.is_empty()
    }

    /// Attempts to send a ready task to a specific worker channel.
    ///
    /// # Returns
    /// - `Ok(())` if the task was successfully sent to the worker
    /// - `Err(task)` if the worker disconnected, handing the task back for requeueing
    fn try_send_task(
        &mut self,
        scheduled: ScheduledTask,
        channel_idx: usize,
    ) -> std::result::Result<(), ScheduledTask> {
        match self.channels[channel_idx].task_sender.send(scheduled) {
            Ok(_) => {
                self.channels[channel_idx].num_tasks_in_flight += 1;
                self.current_channel = (channel_idx + 1) % self.channels.len();
                Ok(())
            }
            Err(rejected) => Err(rejected.0),
        }
    }

    /// Finds an available worker channel using round-robin from the last used one.
    ///
    /// # Returns
    /// - `Some(usize)` index of a channel below `MAX_TASKS_IN_FLIGHT`
    /// - `None` if all channels are busy or there are no channels available
    fn find_available_channel(&self) -> Option<usize> {
        let count = self.channels.len();
        (0..count)
            .map(|step| (self.current_channel + step) % count)
            .find(|&idx| self.channels[idx].num_tasks_in_flight < MAX_TASKS_IN_FLIGHT)
    }

    /// Publishes a new task that runs once `dependency` completes.
    ///
    /// # Arguments
    /// * `task` - The work to execute
    /// * `dependency` - Handle that must complete before the task may start
    ///
    /// # Returns
    /// The handle of the published task, to be used as the dependency of later work
    ///
    /// In threaded mode a ready task goes straight to a free worker. In inline mode
    /// nothing runs until `process_queued_tasks()`.
    pub fn publish_task(&mut self, task: Box<dyn Task>, dependency: JobHandle) -> JobHandle {
        let (handle, signal) = JobHandle::pending();
        let scheduled = ScheduledTask { task, signal };

        if !self.is_inline() && dependency.is_complete() {
            if let Some(channel_idx) = self.find_available_channel() {
                match self.try_send_task(scheduled, channel_idx) {
                    Ok(()) => return handle,
                    Err(rejected) => {
                        warn!("Worker {channel_idx} disconnected, queueing task");
                        self.queued_tasks.push_back(QueuedTask {
                            scheduled: rejected,
                            dependency,
                        });
                        return handle;
                    }
                }
            }
        }

        self.queued_tasks.push_back(QueuedTask {
            scheduled,
            dependency,
        });
        handle
    }

    /// Dispatches every queued task whose dependency is complete.
    ///
    /// Threaded mode fills free worker slots in FIFO order among ready tasks.
    /// Inline mode runs ready tasks on the calling thread and keeps going until no
    /// queued task is ready, so a whole dependency chain finishes in one call.
    pub fn process_queued_tasks(&mut self) {
        if self.queued_tasks.is_empty() {
            return;
        }

        if self.is_inline() {
            self.run_ready_inline();
            return;
        }

        let mut index = 0;
        while index < self.queued_tasks.len() {
            if !self.queued_tasks[index].dependency.is_complete() {
                index += 1;
                continue;
            }

            let Some(channel_idx) = self.find_available_channel() else {
                break;
            };

            let Some(queued) = self.queued_tasks.remove(index) else {
                break;
            };

            if let Err(rejected) = self.try_send_task(queued.scheduled, channel_idx) {
                warn!("Worker {channel_idx} disconnected, keeping task queued");
                self.queued_tasks.insert(
                    index,
                    QueuedTask {
                        scheduled: rejected,
                        dependency: JobHandle::completed(),
                    },
                );
                break;
            }
        }
    }

    fn run_ready_inline(&mut self) {
        loop {
            let mut progressed = false;
            let mut index = 0;

            while index < self.queued_tasks.len() {
                if self.queued_tasks[index].dependency.is_complete() {
                    if let Some(queued) = self.queued_tasks.remove(index) {
                        let name = queued.scheduled.run();
                        debug!("Ran {name} inline");
                        self.completed_tasks += 1;
                        progressed = true;
                    }
                } else {
                    index += 1;
                }
            }

            if !progressed {
                break;
            }
        }
    }

    /// Frees worker slots for every task the workers reported as finished.
    ///
    /// Must be called on the coordinating thread, typically once per tick before
    /// `process_queued_tasks()`.
    pub fn process_completed_tasks(&mut self) {
        for channel in &mut self.channels {
            while let Ok(name) = channel.completion_receiver.try_recv() {
                channel.num_tasks_in_flight = channel.num_tasks_in_flight.saturating_sub(1);
                self.completed_tasks += 1;
                debug!("Worker finished {name}");
            }
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queued_tasks.len()
    }

    pub fn in_flight(&self) -> usize {
        self.channels
            .iter()
            .map(|channel| channel.num_tasks_in_flight)
            .sum()
    }

    pub fn completed_tasks(&self) -> u64 {
        self.completed_tasks
    }

    /// True when nothing is queued and no worker holds a task.
    pub fn is_idle(&self) -> bool {
        self.queued_tasks.is_empty() && self.in_flight() == 0
    }

    /// Runs the scheduler until every queued task has finished.
    ///
    /// Used on shutdown and by tests. In threaded mode this yields between polls.
    pub fn drain(&mut self) {
        loop {
            self.process_completed_tasks();
            self.process_queued_tasks();
            if self.is_idle() {
                return;
            }
            thread::yield_now();
        }
    }
}
