//! Timer state machine.
//!
//! A project's timer is running when the head interval of one of its tasks is flagged running.
//! `start_timer` puts it in that state, `update_timer` is the cheap per-tick path that extends
//! the running interval and bumps the cached totals in place, and `stop_timer` closes the
//! interval and recomputes everything.

use chrono::Duration;
use tracing::{debug, instrument, trace, warn};

use super::{Forest, IntervalKey, ProjectKey, TaskKey};

impl Forest {
    /// Starts timing the project's current task, creating a task when the project has none.
    /// Returns the running interval.
    #[instrument(skip(self))]
    pub fn start_timer(&mut self, project: ProjectKey) -> Option<IntervalKey> {
        if !self.projects.contains(project) {
            warn!("Can't start timer of missing project {project:?}");
            return None;
        }
        let task = match self.current_task(project) {
            Some(task) => task,
            None => {
                let task = self.new_task();
                if let Some(t) = self.tasks.get_mut(task) {
                    t.parent = Some(project);
                }
                if let Some(p) = self.projects.get_mut(project) {
                    p.tasks.push(task);
                }
                task
            }
        };
        if let Some(p) = self.projects.get_mut(project) {
            p.current_task = Some(task);
        }

        let interval = self.resume_task(task);
        self.refresh_time(project);
        interval
    }

    /// Extends the running interval up to now and adds the elapsed time to the cached totals.
    /// Yesterday and last week lie entirely in the past and are left alone. Listeners are not
    /// notified. Does nothing when the timer is stopped.
    pub fn update_timer(&mut self, project: ProjectKey) {
        let Some(task) = self.running_task(project) else {
            return;
        };
        let delta = self.advance_head(task);
        if delta <= Duration::zero() {
            return;
        }
        if let Some(p) = self.projects.get_mut(project) {
            let totals = &mut p.totals;
            totals.ever += delta;
            totals.day += delta;
            totals.week += delta;
            totals.month += delta;
            totals.year += delta;
            trace!("Project {} gained {}s", p.id, delta.num_seconds());
        }
    }

    /// Performs a last update, clears the running flag and recomputes the project.
    #[instrument(skip(self))]
    pub fn stop_timer(&mut self, project: ProjectKey) {
        let Some(task) = self.running_task(project) else {
            return;
        };
        self.update_timer(project);
        if let Some(head) = self.tasks.get(task).and_then(|t| t.intervals.first().copied()) {
            if let Some(v) = self.intervals.get_mut(head) {
                v.running = false;
            }
        }
        self.refresh_time(project);
    }

    pub fn is_timer_running(&self, project: ProjectKey) -> bool {
        self.running_task(project).is_some()
    }

    /// Project whose timer is running, for status displays.
    pub fn running_project(&self) -> Option<ProjectKey> {
        self.projects
            .iter()
            .map(|(key, _)| key)
            .find(|key| self.is_timer_running(*key))
    }

    /// The task of `project` whose head interval runs. The current task is checked first.
    pub(crate) fn running_task(&self, project: ProjectKey) -> Option<TaskKey> {
        let p = self.projects.get(project)?;
        let is_running = |task: &TaskKey| self.head_interval(*task).is_some_and(|v| v.running);
        self.current_task(project)
            .filter(is_running)
            .or_else(|| p.tasks.iter().copied().find(is_running))
    }

    /// Stops the task's running interval at now. The elapsed time is added to the owning
    /// project's totals so they stay right while the task is in transit. Returns whether the
    /// task was running.
    pub fn suspend_task(&mut self, task: TaskKey) -> bool {
        if !self.head_interval(task).is_some_and(|v| v.running) {
            return false;
        }
        let delta = self.advance_head(task);
        if let Some(head) = self.tasks.get(task).and_then(|t| t.intervals.first().copied()) {
            if let Some(v) = self.intervals.get_mut(head) {
                v.running = false;
            }
        }
        let project = self.tasks.get(task).and_then(|t| t.parent);
        if let Some(p) = project.and_then(|p| self.projects.get_mut(p)) {
            let totals = &mut p.totals;
            totals.ever += delta;
            totals.day += delta;
            totals.week += delta;
            totals.month += delta;
            totals.year += delta;
        }
        debug!("Suspended task {task:?} after {}s", delta.num_seconds());
        true
    }

    /// Makes the head of `task` run again. A head that stopped no longer than `auto_merge_gap`
    /// ago is shifted forward to end now, keeping its length, and its fuzz grows by the gap;
    /// otherwise a new interval starting now is put in front. Totals are not refreshed.
    pub(crate) fn resume_task(&mut self, task: TaskKey) -> Option<IntervalKey> {
        let now = self.now();
        let merge_gap = self
            .tasks
            .get(task)
            .and_then(|t| t.parent)
            .and_then(|p| self.projects.get(p))
            .map(|p| p.info.thresholds.auto_merge_gap)
            .unwrap_or_else(|| super::ScrubThresholds::default().auto_merge_gap);

        let head = self.tasks.get(task)?.intervals.first().copied();
        if let Some(head) = head {
            let ivl = self.intervals.get_mut(head)?;
            if ivl.running {
                self.advance_head(task);
                return Some(head);
            }
            let gap = now - ivl.stop;
            if !ivl.is_fresh() && gap >= Duration::zero() && gap <= merge_gap {
                ivl.start += gap;
                ivl.fuzz += gap;
                ivl.stop = now;
                ivl.running = true;
                debug!("Extended head interval over a {}s pause", gap.num_seconds());
                return Some(head);
            }
        }

        let mut ivl = super::Interval::new(now, now);
        ivl.running = true;
        ivl.parent = Some(task);
        let key = self.intervals.insert(ivl);
        if let Some(t) = self.tasks.get_mut(task) {
            t.intervals.insert(0, key);
        }
        Some(key)
    }

    /// Moves the stop of the running head to now and returns how far it moved.
    fn advance_head(&mut self, task: TaskKey) -> Duration {
        let now = self.now();
        let Some(head) = self.tasks.get(task).and_then(|t| t.intervals.first().copied()) else {
            return Duration::zero();
        };
        let Some(ivl) = self.intervals.get_mut(head).filter(|v| v.running) else {
            return Duration::zero();
        };
        let stop = now.max(ivl.start);
        let delta = stop - ivl.stop;
        ivl.stop = stop;
        delta
    }

    /// Deletes every interval of the project that started today. A running timer is paused
    /// for the edit and started afresh afterwards.
    #[instrument(skip(self))]
    pub fn clear_daily_counter(&mut self, project: ProjectKey) {
        let Some(tasks) = self.projects.get(project).map(|p| p.tasks.clone()) else {
            return;
        };
        let was_running = self.is_timer_running(project);
        if was_running {
            self.stop_timer(project);
        }

        let midnight = self.boundaries().midnight;
        self.freeze_project(project);
        for task in tasks {
            let today = self
                .tasks
                .get(task)
                .map(|t| {
                    t.intervals
                        .iter()
                        .copied()
                        .filter(|v| self.intervals.get(*v).is_some_and(|v| v.start >= midnight))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            for interval in today {
                self.destroy_interval(interval);
            }
        }
        self.thaw_project(project);

        if was_running {
            self.start_timer(project);
        }
    }
}
