mod common;

use chrono::Duration;
use common::{noon, utc_forest};
use gnotime::tracker::{Forest, TaskKey};
use proptest::prelude::*;

/// `(offset from the previous start, length)` pairs, in seconds, oldest first.
fn spans() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0i64..400, 0i64..200), 0..24)
}

fn build(spans: &[(i64, i64)]) -> (Forest, TaskKey) {
    let (mut forest, _) = utc_forest();
    let project = forest.new_project();
    forest.append_project(None, project);
    let task = forest.new_task();
    forest.append_task(project, task);

    forest.freeze_project(project);
    let mut start = noon() - Duration::hours(3);
    for (offset, length) in spans {
        start += Duration::seconds(*offset);
        let ivl = forest.new_interval_at(start, start + Duration::seconds(*length));
        forest.add_interval(task, ivl);
    }
    (forest, task)
}

fn snapshot(forest: &Forest, task: TaskKey) -> Vec<(i64, i64, i64)> {
    forest
        .task(task)
        .unwrap()
        .intervals()
        .iter()
        .map(|v| forest.interval(*v).unwrap())
        .map(|v| (v.start().timestamp(), v.stop().timestamp(), v.fuzz().num_seconds()))
        .collect()
}

fn total(forest: &Forest, task: TaskKey) -> Duration {
    forest.task_secs_ever(task)
}

proptest! {
    #[test]
    fn scrubbed_intervals_are_ordered(spans in spans()) {
        let (mut forest, task) = build(&spans);
        forest.scrub_intervals(task, None);
        for (start, stop, _) in snapshot(&forest, task) {
            prop_assert!(stop >= start);
        }
    }

    #[test]
    fn second_scrub_is_a_no_op(spans in spans()) {
        let (mut forest, task) = build(&spans);
        forest.scrub_intervals(task, None);
        let once = snapshot(&forest, task);
        forest.scrub_intervals(task, None);
        prop_assert_eq!(snapshot(&forest, task), once);
    }

    #[test]
    fn scrub_only_loses_discarded_noise(spans in spans()) {
        let (mut forest, task) = build(&spans);
        let before = total(&forest, task);
        let noise = spans.iter().filter(|(_, length)| *length <= 3).count() as i64;
        forest.scrub_intervals(task, None);
        let after = total(&forest, task);
        prop_assert!(after <= before);
        // Merges conserve time; only discarded intervals of at most 3s each disappear.
        prop_assert!(before - after <= Duration::seconds(3 * noise));
    }

    #[test]
    fn running_interval_stays_at_the_head(spans in spans(), ticks in 0i64..120) {
        let (mut forest, task) = build(&spans);
        let project = forest.task(task).unwrap().parent().unwrap();
        forest.thaw_project(project);
        let running = forest.start_timer(project).unwrap();
        for _ in 0..ticks {
            forest.update_timer(project);
        }
        forest.scrub_intervals(task, None);

        let list = forest.task(task).unwrap().intervals().to_vec();
        prop_assert_eq!(list[0], running);
        let running_count = list
            .iter()
            .filter(|v| forest.interval(**v).unwrap().is_running())
            .count();
        prop_assert_eq!(running_count, 1);
    }
}
