//! The in-process time tracking engine.
//!
//! A [Forest] owns every project, task and interval. Callers hold typed keys
//! ([ProjectKey], [TaskKey], [IntervalKey]) and go through the forest for every read and
//! mutation. Mutations keep the cached per-project totals current (unless the project is
//! frozen) and fan out change notifications to the project's listeners.
//!
//! The engine is single threaded and performs no I/O.

pub mod aggregate;
pub mod arena;
pub mod entities;
pub mod notify;
pub mod scrub;
pub mod timer;
pub mod tree;

use arena::Arena;
pub use arena::{IntervalKey, ProjectKey, TaskKey};
pub use entities::{
    BillRate, BillStatus, Billable, BillingRates, Bucket, Interval, Project, ProjectInfo,
    ProjectStatus, Rank, Schedule, ScrubThresholds, Task, TaskBilling, Totals,
};
pub use notify::ListenerId;
pub use tree::{Node, SortKey};

use crate::{
    config::TrackerConfig,
    utils::clock::{Clock, DefaultClock},
};

/// Root of the project hierarchy and the owner of every entity in it.
pub struct Forest {
    pub(crate) projects: Arena<ProjectKey, Project>,
    pub(crate) tasks: Arena<TaskKey, Task>,
    pub(crate) intervals: Arena<IntervalKey, Interval>,
    pub(crate) roots: Vec<ProjectKey>,
    pub(crate) next_free_id: i32,
    pub(crate) next_listener: u64,
    pub(crate) config: TrackerConfig,
    pub(crate) clock: Box<dyn Clock>,
}

impl Default for Forest {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Forest {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, Box::new(DefaultClock))
    }

    pub fn with_clock(config: TrackerConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            projects: Arena::default(),
            tasks: Arena::default(),
            intervals: Arena::default(),
            roots: vec![],
            next_free_id: 1,
            next_listener: 1,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Changing the calendar settings invalidates every cached total, so the whole forest is
    /// recomputed.
    pub fn set_config(&mut self, config: TrackerConfig) {
        self.config = config;
        self.compute_all();
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.time()
    }

    /// Top level projects, in display order.
    pub fn roots(&self) -> &[ProjectKey] {
        &self.roots
    }

    pub fn project(&self, key: ProjectKey) -> Option<&Project> {
        self.projects.get(key)
    }

    pub fn task(&self, key: TaskKey) -> Option<&Task> {
        self.tasks.get(key)
    }

    pub fn interval(&self, key: IntervalKey) -> Option<&Interval> {
        self.intervals.get(key)
    }

    /// Number of live projects, including detached ones.
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }
}
