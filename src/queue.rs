//! Several downloads run one after the other through a single [`Orchestrator`].
//!
//! The engine runs one session at a time, so the queue never runs two tasks
//! at once: it picks the pending task with the highest priority, the oldest
//! first among equals, and waits for its outcome before picking the next one.

use std::{collections::BTreeMap, path::PathBuf, sync::Mutex};

use tracing::{debug, info};

use crate::{
    orchestrator::{DownloadOptions, Event, Orchestrator},
    outside::{StreamDownloader, StreamTransformer},
    result::Error,
    utils::MutexUtils,
};

pub type TaskId = usize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed(PathBuf),
    Failed(String),
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// A queued URL and where it stands
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub id: TaskId,
    pub url: String,
    pub status: TaskStatus,
}

/// Number of tasks per outcome
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

struct Task {
    id: TaskId,
    url: String,
    options: DownloadOptions,
    priority: Priority,
}

#[derive(Default)]
struct QueueState {
    next_id: TaskId,
    pending: Vec<Task>,
    reports: BTreeMap<TaskId, TaskReport>,
    running: Option<TaskId>,
    /// Set when the running task must be cancelled as soon as it can be
    cancel_running: bool,
    stopped: bool,
}

impl QueueState {
    fn set_status(&mut self, id: TaskId, status: TaskStatus) {
        if let Some(report) = self.reports.get_mut(&id) {
            report.status = status;
        }
    }

    /// Take the next task to run, the oldest of the highest priority
    fn pop_next(&mut self) -> Option<Task> {
        if self.stopped {
            return None;
        }

        // Oldest first among equal priorities
        let idx = self
            .pending
            .iter()
            .enumerate()
            .max_by_key(|(_, task)| (task.priority, std::cmp::Reverse(task.id)))
            .map(|(idx, _)| idx)?;
        let task = self.pending.remove(idx);

        self.set_status(task.id, TaskStatus::Running);
        self.running = Some(task.id);
        self.cancel_running = false;
        Some(task)
    }
}

pub struct DownloadQueue<D, T> {
    orchestrator: Orchestrator<D, T>,
    state: Mutex<QueueState>,
}

impl<D: StreamDownloader, T: StreamTransformer> DownloadQueue<D, T> {
    pub fn new(orchestrator: Orchestrator<D, T>) -> Self {
        Self {
            orchestrator,
            state: Mutex::default(),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<D, T> {
        &self.orchestrator
    }

    /// Add a URL to download, returning the identifier of its task
    pub fn push(
        &self,
        url: impl Into<String>,
        options: DownloadOptions,
        priority: Priority,
    ) -> TaskId {
        let url = url.into();
        self.state.with_lock(|mut state| {
            let id = state.next_id;
            state.next_id += 1;

            debug!("Queued task {id}: {url}");
            state.reports.insert(
                id,
                TaskReport {
                    id,
                    url: url.clone(),
                    status: TaskStatus::Pending,
                },
            );
            state.pending.push(Task {
                id,
                url,
                options,
                priority,
            });
            id
        })
    }

    /// Add every URL with the same options and the normal priority
    pub fn push_all<I>(&self, urls: I, options: &DownloadOptions) -> Vec<TaskId>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        urls.into_iter()
            .map(|url| self.push(url, options.clone(), Priority::Normal))
            .collect()
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.state
            .with_lock(|state| state.reports.get(&id).map(|r| r.status.clone()))
    }

    /// Every task ever queued, in queuing order
    pub fn tasks(&self) -> Vec<TaskReport> {
        self.state
            .with_lock(|state| state.reports.values().cloned().collect())
    }

    pub fn pending(&self) -> usize {
        self.state.with_lock(|state| state.pending.len())
    }

    /// Cancel a task: a pending one never runs, a running one has its download cancelled.
    ///
    /// Return whether the task was pending or running.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.state.with_lock(|mut state| {
            if let Some(idx) = state.pending.iter().position(|task| task.id == id) {
                state.pending.remove(idx);
                state.set_status(id, TaskStatus::Cancelled);
                debug!("Cancelled pending task {id}");
                return true;
            }

            if state.running == Some(id) {
                state.cancel_running = true;
                // The queue lock keeps the next task from starting in between
                self.orchestrator.cancel();
                return true;
            }

            false
        })
    }

    /// Cancel every pending task and the running one, and stop the queue
    pub fn stop(&self) {
        self.state.with_lock(|mut state| {
            state.stopped = true;
            for task in std::mem::take(&mut state.pending) {
                state.set_status(task.id, TaskStatus::Cancelled);
            }
            if state.running.is_some() {
                state.cancel_running = true;
                self.orchestrator.cancel();
            }
        });
        info!("Download queue stopped");
    }

    /// Run the tasks until none is pending or the queue is stopped,
    /// returning the outcomes of the tasks that ran.
    ///
    /// The listener receives the events of each task along with its identifier.
    /// It is called on the calling thread and may cancel tasks or stop the queue.
    pub fn run(&self, listener: &mut dyn FnMut(TaskId, &Event)) -> QueueSummary {
        let mut summary = QueueSummary::default();

        while let Some(task) = self.state.with_lock(|mut state| state.pop_next()) {
            info!("Starting task {} ({})", task.id, task.url);

            let res = self
                .orchestrator
                .execute(&task.url, task.options, &mut |event: &Event| {
                    // A cancellation asked before the download started
                    if self.state.with_lock(|state| state.cancel_running) {
                        self.orchestrator.cancel();
                    }
                    listener(task.id, event);
                });

            let status = match res {
                Ok(path) => {
                    summary.completed += 1;
                    TaskStatus::Completed(path)
                }
                Err(Error::Cancelled) => {
                    summary.cancelled += 1;
                    TaskStatus::Cancelled
                }
                Err(err) => {
                    summary.failed += 1;
                    TaskStatus::Failed(err.to_string())
                }
            };
            debug!("Task {} ended as {status:?}", task.id);

            self.state.with_lock(|mut state| {
                state.set_status(task.id, status);
                state.running = None;
                state.cancel_running = false;
            });
        }

        summary
    }
}
