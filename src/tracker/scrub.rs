//! Interval list normalization.
//!
//! A task's list is rewritten in three passes, each repeated until it finds nothing to do, and
//! the passes themselves are repeated until a whole round leaves the list untouched:
//!
//! 1. stopped intervals no longer than `min_interval` are dropped,
//! 2. neighbours separated by a small gap are merged,
//! 3. stopped intervals no longer than `auto_merge_interval` are folded into the closest
//!    neighbour lying on the same day.
//!
//! A running interval is never used as a merge source, so it stays at the head of the list.

use chrono::Duration;
use tracing::{debug, instrument, warn};

use super::{Forest, IntervalKey, ScrubThresholds, TaskKey};

/// Gap used for a side that has no usable neighbour.
const NO_NEIGHBOUR: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Into the previous element of the list, which started later.
    Up,
    /// Into the next element of the list, which started earlier.
    Down,
}

impl Forest {
    /// Normalizes the interval list of `task`. `handle` is an interval the caller keeps using;
    /// the returned key is where it went after discards and merges.
    #[instrument(level = "trace", skip(self))]
    pub fn scrub_intervals(
        &mut self,
        task: TaskKey,
        handle: Option<IntervalKey>,
    ) -> Option<IntervalKey> {
        let Some(t) = self.tasks.get(task) else {
            warn!("Can't scrub missing task {task:?}");
            return handle;
        };
        let project = t.parent;
        let thresholds = project
            .and_then(|p| self.projects.get(p))
            .map(|p| p.info.thresholds)
            .unwrap_or_default();

        // Merges below would otherwise trigger recomputation of the project being rewritten.
        let saved_freeze = project
            .and_then(|p| self.projects.get_mut(p))
            .map(|p| std::mem::replace(&mut p.frozen, true));

        let mut handle = handle;
        loop {
            let mut changed = false;
            while self.discard_short(task, &thresholds, &mut handle) {
                changed = true;
            }
            while self.merge_gaps(task, &thresholds, &mut handle) {
                changed = true;
            }
            while self.merge_short(task, &thresholds, &mut handle) {
                changed = true;
            }
            if !changed {
                break;
            }
        }

        if let (Some(p), Some(frozen)) = (project.and_then(|p| self.projects.get_mut(p)), saved_freeze)
        {
            p.frozen = frozen;
        }
        handle
    }

    /// Merges `interval` into the previous element of its task, the one that started after
    /// it. The target's start moves earlier by the absorbed length. Returns the target.
    pub fn merge_up(&mut self, interval: IntervalKey) -> Option<IntervalKey> {
        self.merge_into_neighbour(interval, Direction::Up)
    }

    /// Merges `interval` into the next element of its task, the one that started before it.
    /// The target's stop moves later by the absorbed length. Returns the target.
    pub fn merge_down(&mut self, interval: IntervalKey) -> Option<IntervalKey> {
        self.merge_into_neighbour(interval, Direction::Down)
    }

    fn merge_into_neighbour(
        &mut self,
        interval: IntervalKey,
        direction: Direction,
    ) -> Option<IntervalKey> {
        let Some(task) = self.intervals.get(interval).and_then(|v| v.parent) else {
            warn!("Interval {interval:?} isn't part of any task, nothing to merge into");
            return None;
        };
        let list = &self.tasks.get(task)?.intervals;
        let Some(index) = list.iter().position(|v| *v == interval) else {
            warn!("Interval {interval:?} is missing from its task");
            return None;
        };
        let target_index = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|v| *v < list.len()),
        };
        let Some(target) = target_index.map(|v| list[v]) else {
            warn!("Interval {interval:?} has no neighbour to merge {direction:?} into");
            return None;
        };

        let source = self.intervals.get(interval)?.clone();
        let length = source.duration();
        let target_ivl = self.intervals.get_mut(target)?;
        let gap = match direction {
            Direction::Up => target_ivl.start - source.stop,
            Direction::Down => source.start - target_ivl.stop,
        };
        let more_fuzz = gap.max(Duration::zero()).min(length);

        match direction {
            Direction::Up => target_ivl.start -= length,
            Direction::Down => target_ivl.stop += length,
        }
        target_ivl.fuzz = target_ivl.fuzz.max(source.fuzz).max(more_fuzz);
        debug!(
            "Merged {}s {direction:?}, target now spans {} - {}",
            length.num_seconds(),
            target_ivl.start,
            target_ivl.stop,
        );

        if let Some(t) = self.tasks.get_mut(task) {
            t.intervals.retain(|v| *v != interval);
        }
        self.intervals.remove(interval);

        if let Some(project) = self.tasks.get(task).and_then(|t| t.parent) {
            self.refresh_time(project);
        }
        Some(target)
    }

    fn discard_short(
        &mut self,
        task: TaskKey,
        thresholds: &ScrubThresholds,
        handle: &mut Option<IntervalKey>,
    ) -> bool {
        let Some(list) = self.tasks.get(task).map(|t| t.intervals.clone()) else {
            return false;
        };
        let found = list.iter().enumerate().find(|(_, key)| {
            self.intervals.get(**key).is_some_and(|v| {
                !v.running && !v.is_fresh() && v.duration() <= thresholds.min_interval
            })
        });
        let Some((index, &key)) = found else {
            return false;
        };

        if *handle == Some(key) {
            let previous = index.checked_sub(1).and_then(|v| list.get(v));
            *handle = list.get(index + 1).or(previous).copied();
        }
        if let Some(t) = self.tasks.get_mut(task) {
            t.intervals.remove(index);
        }
        self.intervals.remove(key);
        true
    }

    fn merge_gaps(
        &mut self,
        task: TaskKey,
        thresholds: &ScrubThresholds,
        handle: &mut Option<IntervalKey>,
    ) -> bool {
        let Some(list) = self.tasks.get(task).map(|t| t.intervals.clone()) else {
            return false;
        };
        for pair in list.windows(2) {
            let (Some(later), Some(earlier)) =
                (self.intervals.get(pair[0]), self.intervals.get(pair[1]))
            else {
                continue;
            };
            let gap = later.start - earlier.stop;
            // Out of order or overlapping.
            if gap < Duration::zero() {
                continue;
            }
            if gap < thresholds.auto_merge_gap || gap < later.fuzz || gap < earlier.fuzz {
                let merged = self.merge_up(pair[1]);
                if *handle == Some(pair[1]) {
                    *handle = merged;
                }
                return merged.is_some();
            }
        }
        false
    }

    fn merge_short(
        &mut self,
        task: TaskKey,
        thresholds: &ScrubThresholds,
        handle: &mut Option<IntervalKey>,
    ) -> bool {
        let Some(list) = self.tasks.get(task).map(|t| t.intervals.clone()) else {
            return false;
        };
        for (index, &key) in list.iter().enumerate() {
            let Some(ivl) = self.intervals.get(key) else {
                continue;
            };
            if ivl.running || ivl.is_fresh() || ivl.duration() > thresholds.auto_merge_interval {
                continue;
            }

            let gap_down = list
                .get(index + 1)
                .and_then(|v| self.intervals.get(*v))
                .filter(|next| self.midnight_of(ivl.start) == self.midnight_of(next.stop))
                .map(|next| (ivl.start - next.stop).num_seconds());
            let gap_up = index
                .checked_sub(1)
                .and_then(|v| self.intervals.get(list[v]))
                .filter(|prev| self.midnight_of(prev.start) == self.midnight_of(ivl.stop))
                .map(|prev| (prev.start - ivl.stop).num_seconds());
            if gap_down.is_none() && gap_up.is_none() {
                continue;
            }

            let direction = if gap_up.unwrap_or(NO_NEIGHBOUR) < gap_down.unwrap_or(NO_NEIGHBOUR) {
                Direction::Up
            } else {
                Direction::Down
            };
            let merged = self.merge_into_neighbour(key, direction);
            if *handle == Some(key) {
                *handle = merged;
            }
            return merged.is_some();
        }
        false
    }
}

#[cfg(test)]
mod scrub_tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::{
        config::{TrackerConfig, Zone},
        tracker::{Forest, IntervalKey, ProjectKey, ScrubThresholds, TaskKey},
        utils::{clock::test_clock::ManualClock, logging::TEST_LOGGING},
    };

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap()
    }

    fn setup() -> (Forest, ProjectKey, TaskKey) {
        *TEST_LOGGING;
        let config = TrackerConfig {
            zone: Zone::utc(),
            ..TrackerConfig::default()
        };
        let clock = ManualClock::at(base() + Duration::hours(8));
        let mut forest = Forest::with_clock(config, Box::new(clock));
        let project = forest.new_project();
        forest.append_project(None, project);
        let task = forest.new_task();
        forest.append_task(project, task);
        (forest, project, task)
    }

    /// Adds `[base + start, base + stop]` behind the existing intervals while frozen.
    fn push(forest: &mut Forest, task: TaskKey, start: i64, stop: i64) -> IntervalKey {
        let ivl = forest.new_interval_at(
            base() + Duration::seconds(start),
            base() + Duration::seconds(stop),
        );
        forest.freeze_task(task);
        forest.append_interval(task, ivl);
        ivl
    }

    fn spans(forest: &Forest, task: TaskKey) -> Vec<(i64, i64)> {
        forest
            .task(task)
            .unwrap()
            .intervals()
            .iter()
            .map(|v| forest.interval(*v).unwrap())
            .map(|v| ((v.start() - base()).num_seconds(), (v.stop() - base()).num_seconds()))
            .collect()
    }

    #[test]
    fn short_intervals_are_discarded_and_handle_moves_on() {
        let (mut forest, _, task) = setup();
        push(&mut forest, task, 10_000, 12_000);
        let noise = push(&mut forest, task, 5_000, 5_002);
        let older = push(&mut forest, task, 1_000, 3_000);

        let handle = forest.scrub_intervals(task, Some(noise));
        assert_eq!(handle, Some(older));
        assert_eq!(spans(&forest, task), vec![(10_000, 12_000), (1_000, 3_000)]);
    }

    #[test]
    fn fresh_intervals_survive() {
        let (mut forest, _, task) = setup();
        let fresh = forest.new_interval();
        forest.add_interval(task, fresh);
        assert_eq!(forest.task(task).unwrap().intervals(), &[fresh]);
    }

    #[test]
    fn small_gap_is_closed_keeping_duration() {
        let (mut forest, project, task) = setup();
        let later = push(&mut forest, task, 160, 200);
        let earlier = push(&mut forest, task, 100, 150);
        forest.set_thresholds(
            project,
            ScrubThresholds {
                auto_merge_gap: Duration::seconds(20),
                ..Default::default()
            },
        );

        let handle = forest.scrub_intervals(task, Some(earlier));
        assert_eq!(handle, Some(later));
        assert_eq!(spans(&forest, task), vec![(110, 200)]);
        assert_eq!(forest.interval(later).unwrap().fuzz(), Duration::seconds(10));
        assert!(forest.interval(earlier).is_none());
    }

    #[test]
    fn short_interval_joins_the_closer_same_day_neighbour() {
        let (mut forest, _, task) = setup();
        let later = push(&mut forest, task, 3_000, 4_000);
        push(&mut forest, task, 2_700, 2_730);
        let earlier = push(&mut forest, task, 0, 1_000);

        forest.scrub_intervals(task, None);
        // 270s to the later one, 1700s to the earlier one.
        assert_eq!(spans(&forest, task), vec![(2_970, 4_000), (0, 1_000)]);
        assert!(forest.interval(later).is_some());
        assert!(forest.interval(earlier).is_some());
    }

    #[test]
    fn short_interval_never_crosses_midnight() {
        let (mut forest, _, task) = setup();
        let midnight = 15 * 3600;
        push(&mut forest, task, midnight + 600, midnight + 630);
        push(&mut forest, task, midnight - 3600, midnight - 1800);

        forest.scrub_intervals(task, None);
        assert_eq!(
            spans(&forest, task),
            vec![(midnight + 600, midnight + 630), (midnight - 3600, midnight - 1800)],
        );
    }

    #[test]
    fn running_head_is_never_absorbed() {
        let (mut forest, project, task) = setup();
        let running = forest.start_timer(project).unwrap();
        let older = forest.new_interval_at(
            forest.now() - Duration::seconds(40),
            forest.now() - Duration::seconds(30),
        );
        forest.append_interval(task, older);

        let list = forest.task(task).unwrap().intervals().to_vec();
        assert_eq!(list[0], running);
        assert!(forest.interval(running).unwrap().is_running());
    }

    #[test]
    fn second_scrub_changes_nothing() {
        let (mut forest, _, task) = setup();
        for (start, stop) in [(9_000, 9_500), (8_950, 8_990), (5_000, 5_001), (100, 3_000)] {
            push(&mut forest, task, start, stop);
        }
        forest.scrub_intervals(task, None);
        let once = spans(&forest, task);
        forest.scrub_intervals(task, None);
        assert_eq!(spans(&forest, task), once);
    }

    #[test]
    fn merge_primitives_report_missing_neighbours() {
        let (mut forest, _, task) = setup();
        let only = push(&mut forest, task, 0, 1_000);
        assert_eq!(forest.merge_up(only), None);
        assert_eq!(forest.merge_down(only), None);
        assert!(forest.interval(only).is_some());

        let detached = forest.new_interval_at(base(), base() + Duration::seconds(5));
        assert_eq!(forest.merge_down(detached), None);
    }
}
