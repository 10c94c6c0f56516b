//! Bucket arithmetic and the cached per-project totals.
//!
//! Each project caches the totals of its own tasks only. Totals of a whole subtree are summed on
//! demand by walking the tree.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use tracing::{instrument, trace};

use crate::{config::Zone, utils::time::overlap};

use super::{Bucket, Forest, ProjectKey, TaskKey, Totals};

/// Most recent start of every bucket, at or before the `now` they were computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketBoundaries {
    /// Start of today.
    pub midnight: DateTime<Utc>,
    /// Start of yesterday. Yesterday ends at `midnight`.
    pub yesterday: DateTime<Utc>,
    /// Start of this week.
    pub week_start: DateTime<Utc>,
    /// Start of last week. Last week ends at `week_start`.
    pub last_week_start: DateTime<Utc>,
    pub month_start: DateTime<Utc>,
    pub year_start: DateTime<Utc>,
}

/// Date of the "logical" day containing `moment`, a day starting `day_start_offset` after
/// midnight in `zone`.
fn logical_date(moment: DateTime<Utc>, zone: Zone, day_start_offset: Duration) -> NaiveDate {
    zone.date_of(moment - day_start_offset)
}

fn logical_start(date: NaiveDate, zone: Zone, day_start_offset: Duration) -> DateTime<Utc> {
    zone.start_of(date) + day_start_offset
}

/// Start of the logical day containing `moment`. Two instants lie on the same day exactly when
/// their midnights are equal.
pub fn midnight_of(moment: DateTime<Utc>, zone: Zone, day_start_offset: Duration) -> DateTime<Utc> {
    logical_start(
        logical_date(moment, zone, day_start_offset),
        zone,
        day_start_offset,
    )
}

/// Computes the bucket boundaries for `now`. `week_start_offset` selects the first day of the
/// week, 0 being Sunday; values past Saturday wrap around.
pub fn bucket_boundaries(
    now: DateTime<Utc>,
    zone: Zone,
    day_start_offset: Duration,
    week_start_offset: u32,
) -> BucketBoundaries {
    let today = logical_date(now, zone, day_start_offset);
    let start = |date: NaiveDate| logical_start(date, zone, day_start_offset);

    let days_into_week =
        (today.weekday().num_days_from_sunday() + 7 - week_start_offset % 7) % 7;
    let week_date = today - Duration::days(days_into_week as i64);
    let month_date = today.with_day(1).unwrap_or(today);
    let year_date = today.with_ordinal(1).unwrap_or(today);

    BucketBoundaries {
        midnight: start(today),
        yesterday: start(today - Duration::days(1)),
        week_start: start(week_date),
        last_week_start: start(week_date - Duration::days(7)),
        month_start: start(month_date),
        year_start: start(year_date),
    }
}

/// Portion of `[start, stop)` at or after `from`.
fn since(start: DateTime<Utc>, stop: DateTime<Utc>, from: DateTime<Utc>) -> Duration {
    overlap(start, stop, from, stop)
}

/// Adds one interval to the buckets. An interval straddling a boundary only contributes the
/// part lying inside each bucket.
pub fn fold_interval(
    totals: &mut Totals,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    bounds: &BucketBoundaries,
) {
    totals.ever += stop - start;
    totals.day += since(start, stop, bounds.midnight);
    totals.yesterday += overlap(start, stop, bounds.yesterday, bounds.midnight);
    totals.week += since(start, stop, bounds.week_start);
    totals.last_week += overlap(start, stop, bounds.last_week_start, bounds.week_start);
    totals.month += since(start, stop, bounds.month_start);
    totals.year += since(start, stop, bounds.year_start);
}

impl Forest {
    pub fn boundaries(&self) -> BucketBoundaries {
        bucket_boundaries(
            self.now(),
            self.config.zone,
            self.config.day_start_offset,
            self.config.week_start_offset,
        )
    }

    pub(crate) fn midnight_of(&self, moment: DateTime<Utc>) -> DateTime<Utc> {
        midnight_of(moment, self.config.zone, self.config.day_start_offset)
    }

    /// Recomputes the cached totals of `project` and of every sub-project, children first.
    /// Every task is scrubbed on the way.
    #[instrument(level = "trace", skip(self))]
    pub(crate) fn compute_secs(&mut self, project: ProjectKey) {
        let Some(p) = self.projects.get(project) else {
            return;
        };
        let children = p.children.clone();
        let tasks = p.tasks.clone();

        for child in children {
            self.compute_secs(child);
        }

        let bounds = self.boundaries();
        let mut totals = Totals::default();
        for task in tasks {
            self.scrub_intervals(task, None);
            let Some(t) = self.tasks.get(task) else {
                continue;
            };
            for interval in t.intervals.iter().filter_map(|v| self.intervals.get(*v)) {
                fold_interval(&mut totals, interval.start, interval.stop, &bounds);
            }
        }

        if let Some(p) = self.projects.get_mut(project) {
            trace!("Project {} totals {:?}", p.id, totals);
            p.totals = totals;
            p.dirty_time = false;
        }
    }

    /// Recomputes every root and notifies every project of the forest. Used once after a bulk
    /// load.
    #[instrument(skip(self))]
    pub fn compute_all(&mut self) {
        for root in self.roots.clone() {
            self.refresh_time(root);
            self.children_modified(root);
        }
    }

    fn children_modified(&mut self, project: ProjectKey) {
        let Some(children) = self.projects.get(project).map(|p| p.children.clone()) else {
            return;
        };
        for child in children {
            self.children_modified(child);
            self.modified(child);
        }
    }

    /// Totals of the project and all of its descendants.
    pub fn rolled_up_totals(&self, project: ProjectKey) -> Totals {
        let mut totals = Totals::default();
        self.foreach_project(project, |_, p| {
            totals += p.totals;
            true
        });
        totals
    }

    /// One bucket of the project and all of its descendants.
    pub fn total(&self, project: ProjectKey, bucket: Bucket) -> Duration {
        self.rolled_up_totals(project).get(bucket)
    }

    /// Sum of a bucket over the whole forest.
    pub fn forest_total(&self, bucket: Bucket) -> Duration {
        self.roots
            .iter()
            .fold(Duration::zero(), |acc, root| acc + self.total(*root, bucket))
    }

    /// Time recorded in the project's current task.
    pub fn secs_current(&self, project: ProjectKey) -> Duration {
        self.current_task(project)
            .map_or(Duration::zero(), |task| self.task_secs_ever(task))
    }

    pub fn total_secs_current(&self, project: ProjectKey) -> Duration {
        let mut total = Duration::zero();
        self.foreach_project(project, |key, _| {
            total += self.secs_current(key);
            true
        });
        total
    }

    pub fn task_secs_ever(&self, task: TaskKey) -> Duration {
        self.task_intervals(task)
            .fold(Duration::zero(), |acc, v| acc + v.duration())
    }

    pub fn task_earliest_start(&self, task: TaskKey) -> Option<DateTime<Utc>> {
        self.task_intervals(task).map(|v| v.start).min()
    }

    pub fn task_latest_stop(&self, task: TaskKey) -> Option<DateTime<Utc>> {
        self.task_intervals(task).map(|v| v.stop).max()
    }

    pub fn project_earliest_start(
        &self,
        project: ProjectKey,
        include_sub_projects: bool,
    ) -> Option<DateTime<Utc>> {
        self.project_task_keys(project, include_sub_projects)
            .into_iter()
            .filter_map(|task| self.task_earliest_start(task))
            .min()
    }

    pub fn project_latest_stop(
        &self,
        project: ProjectKey,
        include_sub_projects: bool,
    ) -> Option<DateTime<Utc>> {
        self.project_task_keys(project, include_sub_projects)
            .into_iter()
            .filter_map(|task| self.task_latest_stop(task))
            .max()
    }

    fn project_task_keys(&self, project: ProjectKey, include_sub_projects: bool) -> Vec<TaskKey> {
        if !include_sub_projects {
            return self
                .projects
                .get(project)
                .map(|p| p.tasks.clone())
                .unwrap_or_default();
        }
        let mut tasks = vec![];
        self.foreach_project(project, |_, p| {
            tasks.extend_from_slice(&p.tasks);
            true
        });
        tasks
    }

    fn task_intervals(&self, task: TaskKey) -> impl Iterator<Item = &super::Interval> {
        self.tasks
            .get(task)
            .into_iter()
            .flat_map(|t| t.intervals.iter())
            .filter_map(|v| self.intervals.get(*v))
    }
}
