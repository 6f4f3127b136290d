//! Update Scheduler
//!
//! The scheduler decides when deferred work actually runs. Effects that carry
//! a custom scheduling function (component renders, `Pre`/`Post` watchers)
//! do not run at trigger time; they enqueue a job here instead, and the job
//! runs when the embedder flushes the queue, typically once per tick of its
//! event loop.
//!
//! # Algorithm
//!
//! 1. Jobs are deduplicated by id: triggering a render effect five times
//!    before a flush queues one job.
//! 2. A flush repeatedly runs, in this order of priority:
//!    - every pending pre-flush callback,
//!    - the queued job with the smallest `order` (component instances are
//!      numbered on creation, so parents render before their children),
//!    - every pending post-flush callback,
//!
//!    until all three queues are empty. Work queued while flushing is picked
//!    up by the same flush.
//! 3. A job that keeps re-queueing itself is dropped once it has run
//!    `recursion_limit` times within one flush.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

/// A unit of deferred work.
pub type Task = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Generate a new unique job ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// A queued job.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    order: u64,
    task: Task,
}

impl Job {
    pub fn new<F>(id: JobId, order: u64, task: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id,
            order,
            task: Arc::new(task),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn order(&self) -> u64 {
        self.order
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("order", &self.order)
            .finish()
    }
}

#[derive(Default)]
struct QueueState {
    jobs: IndexMap<JobId, Job>,
    pre: Vec<Task>,
    post: Vec<Task>,
    flushing: bool,
}

impl QueueState {
    fn pop_next(&mut self) -> Option<Job> {
        let (index, _) = self
            .jobs
            .values()
            .enumerate()
            .min_by_key(|(_, job)| (job.order, job.id))?;
        self.jobs.shift_remove_index(index).map(|(_, job)| job)
    }
}

/// The job queue.
pub struct Scheduler {
    state: Mutex<QueueState>,
    recursion_limit: usize,
}

impl Scheduler {
    /// Create a new empty scheduler.
    pub fn new(recursion_limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            recursion_limit,
        }
    }

    /// Queue a job. Returns `false` if a job with the same id is already
    /// waiting.
    pub fn queue_job(&self, job: Job) -> bool {
        let mut state = self.state.lock();
        if state.jobs.contains_key(&job.id) {
            return false;
        }
        tracing::trace!(job = ?job.id, order = job.order, "job queued");
        state.jobs.insert(job.id, job);
        true
    }

    /// Remove a queued job without running it.
    pub fn invalidate(&self, id: JobId) -> bool {
        self.state.lock().jobs.shift_remove(&id).is_some()
    }

    /// Whether a job with this id is waiting.
    pub fn is_queued(&self, id: JobId) -> bool {
        self.state.lock().jobs.contains_key(&id)
    }

    /// Queue a callback to run before the next queued job.
    pub fn queue_pre_flush(&self, task: Task) {
        self.state.lock().pre.push(task);
    }

    /// Queue a callback to run after the queued jobs.
    pub fn queue_post_flush(&self, task: Task) {
        self.state.lock().post.push(task);
    }

    pub fn has_pending(&self) -> bool {
        let state = self.state.lock();
        !state.jobs.is_empty() || !state.pre.is_empty() || !state.post.is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.state.lock().flushing
    }

    /// Run everything that is queued. Returns the number of jobs run.
    ///
    /// Calling `flush` from inside a job is a no-op: the outer flush already
    /// picks up the new work.
    pub fn flush(&self) -> usize {
        {
            let mut state = self.state.lock();
            if state.flushing {
                return 0;
            }
            state.flushing = true;
        }
        let _guard = FlushGuard(self);

        let mut runs: HashMap<JobId, usize> = HashMap::new();
        let mut ran = 0;

        loop {
            let pre = std::mem::take(&mut self.state.lock().pre);
            if !pre.is_empty() {
                for task in pre {
                    task();
                }
                continue;
            }

            let next = self.state.lock().pop_next();
            if let Some(job) = next {
                let count = runs.entry(job.id).or_insert(0);
                *count += 1;
                if *count > self.recursion_limit {
                    tracing::warn!(
                        job = ?job.id,
                        limit = self.recursion_limit,
                        "maximum recursive updates exceeded; dropping job"
                    );
                    continue;
                }
                (job.task)();
                ran += 1;
                continue;
            }

            let post = std::mem::take(&mut self.state.lock().post);
            if post.is_empty() {
                break;
            }
            for task in post {
                task();
            }
        }

        tracing::debug!(jobs = ran, "flush complete");
        ran
    }

    /// Drop everything that is queued.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.jobs.clear();
        state.pre.clear();
        state.post.clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(crate::RuntimeConfig::default().recursion_limit)
    }
}

struct FlushGuard<'a>(&'a Scheduler);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().flushing = false;
    }
}
