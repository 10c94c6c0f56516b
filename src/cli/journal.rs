//! JSON journal: a nested list of projects with their tasks and intervals.
//!
//! Loading goes through the regular mutation API, each project subtree inside a freeze/thaw
//! bracket, followed by a single [Forest::compute_all]. Saving is a read-only traversal.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::tracker::{
    BillingRates, Forest, ProjectKey, Schedule, ScrubThresholds, TaskBilling, TaskKey,
    entities::{DEFAULT_TASK_MEMO, duration_secs},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalProject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub rates: BillingRates,
    #[serde(default)]
    pub thresholds: ScrubThresholds,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub tasks: Vec<JournalTask>,
    #[serde(default)]
    pub children: Vec<JournalProject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    #[serde(default = "default_memo")]
    pub memo: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub billing: TaskBilling,
    /// Most recent first.
    #[serde(default)]
    pub intervals: Vec<JournalInterval>,
}

fn default_memo() -> String {
    DEFAULT_TASK_MEMO.into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalInterval {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub stop: DateTime<Utc>,
    #[serde(default = "zero_fuzz", with = "duration_secs")]
    pub fuzz: Duration,
    #[serde(default)]
    pub running: bool,
}

fn zero_fuzz() -> Duration {
    Duration::zero()
}

pub fn read_journal(path: &Path) -> Result<Vec<JournalProject>> {
    let file = File::open(path).with_context(|| format!("Failed to open journal {path:?}"))?;
    let projects = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse journal {path:?}"))?;
    Ok(projects)
}

pub fn write_journal(path: &Path, projects: &[JournalProject]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create journal {path:?}"))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, projects)?;
    writer.flush()?;
    Ok(())
}

/// Adds the journal's projects as new roots and brings every total up to date.
pub fn import_journal(forest: &mut Forest, projects: &[JournalProject]) -> Vec<ProjectKey> {
    let roots = projects
        .iter()
        .map(|v| import_project(forest, None, v))
        .collect::<Vec<_>>();
    forest.compute_all();
    debug!(
        "Imported {} projects, {} tasks, {} intervals",
        forest.project_count(),
        forest.task_count(),
        forest.interval_count()
    );
    roots
}

fn import_project(
    forest: &mut Forest,
    parent: Option<ProjectKey>,
    journal: &JournalProject,
) -> ProjectKey {
    let key = forest.new_project_with(&journal.title, &journal.desc);
    forest.freeze_project(key);

    if let Some(id) = journal.id {
        if let Some(holder) = forest.set_project_id(key, id) {
            warn!("Journal project {:?} reuses id {id} of {holder:?}", journal.title);
        }
    }
    if let Some(guid) = journal.guid {
        forest.set_project_guid(key, guid);
    }
    forest.set_notes(key, &journal.notes);
    forest.set_custom_id(key, journal.custom_id.as_deref());
    forest.set_rates(key, journal.rates);
    forest.set_thresholds(key, journal.thresholds);
    forest.set_schedule(key, journal.schedule);

    for task in &journal.tasks {
        let task_key = import_task(forest, task);
        forest.append_task(key, task_key);
    }
    forest.append_project(parent, key);
    for child in &journal.children {
        import_project(forest, Some(key), child);
    }

    forest.thaw_project(key);
    key
}

fn import_task(forest: &mut Forest, journal: &JournalTask) -> TaskKey {
    let key = forest.new_task();
    forest.set_task_memo(key, &journal.memo);
    forest.set_task_notes(key, &journal.notes);
    forest.set_task_billing(key, journal.billing.clone());
    if let Some(guid) = journal.guid {
        forest.set_task_guid(key, guid);
    }
    for interval in &journal.intervals {
        let ivl = forest.new_interval_at(interval.start, interval.stop);
        forest.set_interval_fuzz(ivl, interval.fuzz);
        forest.append_interval(key, ivl);
        if interval.running {
            forest.set_interval_running(ivl, true);
        }
    }
    key
}

/// Snapshot of the whole forest in journal form.
pub fn export_journal(forest: &Forest) -> Vec<JournalProject> {
    forest
        .roots()
        .iter()
        .filter_map(|root| export_project(forest, *root))
        .collect()
}

fn export_project(forest: &Forest, key: ProjectKey) -> Option<JournalProject> {
    let project = forest.project(key)?;
    let info = project.info();
    let tasks = project
        .tasks()
        .iter()
        .filter_map(|task| {
            let task = forest.task(*task)?;
            Some(JournalTask {
                guid: Some(task.guid()),
                memo: task.memo().into(),
                notes: task.notes().into(),
                billing: task.billing().clone(),
                intervals: task
                    .intervals()
                    .iter()
                    .filter_map(|v| forest.interval(*v))
                    .map(|v| JournalInterval {
                        start: v.start(),
                        stop: v.stop(),
                        fuzz: v.fuzz(),
                        running: v.is_running(),
                    })
                    .collect(),
            })
        })
        .collect();

    Some(JournalProject {
        id: Some(project.id()),
        guid: Some(project.guid()),
        title: info.title.clone(),
        desc: info.desc.clone(),
        notes: info.notes.clone(),
        custom_id: info.custom_id.clone(),
        rates: info.rates,
        thresholds: info.thresholds,
        schedule: info.schedule,
        tasks,
        children: project
            .children()
            .iter()
            .filter_map(|child| export_project(forest, *child))
            .collect(),
    })
}
