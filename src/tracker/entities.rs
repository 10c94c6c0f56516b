use std::ops::{Add, AddAssign};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    arena::{IntervalKey, ProjectKey, TaskKey},
    notify::{ListenerEntry, ListenerId},
};

/// A recorded span of work. `stop >= start` always holds; the setters on
/// [Forest](super::Forest) clamp the opposite end when needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub(crate) start: DateTime<Utc>,
    pub(crate) stop: DateTime<Utc>,
    pub(crate) fuzz: Duration,
    pub(crate) running: bool,
    pub(crate) parent: Option<TaskKey>,
}

impl Interval {
    pub(crate) fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self {
            start,
            stop: stop.max(start),
            fuzz: Duration::zero(),
            running: false,
            parent: None,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn stop(&self) -> DateTime<Utc> {
        self.stop
    }

    pub fn fuzz(&self) -> Duration {
        self.fuzz
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn parent(&self) -> Option<TaskKey> {
        self.parent
    }

    pub fn duration(&self) -> Duration {
        self.stop - self.start
    }

    /// Intervals that were never given a start time are protected from scrubbing.
    pub fn is_fresh(&self) -> bool {
        self.start == DateTime::<Utc>::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Billable {
    NotBillable,
    #[default]
    Billable,
    NoCharge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillRate {
    #[default]
    Regular,
    Overtime,
    DoubleOvertime,
    FlatFee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Hold,
    #[default]
    Bill,
    Paid,
}

/// Billing metadata of a task. Copied verbatim when a task is duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskBilling {
    pub billable: Billable,
    pub bill_rate: BillRate,
    pub bill_status: BillStatus,
    #[serde(with = "duration_secs")]
    pub bill_unit: Duration,
}

impl Default for TaskBilling {
    fn default() -> Self {
        Self {
            billable: Billable::Billable,
            bill_rate: BillRate::Regular,
            bill_status: BillStatus::Bill,
            bill_unit: Duration::seconds(900),
        }
    }
}

pub const DEFAULT_TASK_MEMO: &str = "New Diary Entry";

#[derive(Debug, Clone)]
pub struct Task {
    pub(crate) memo: String,
    pub(crate) notes: String,
    pub(crate) billing: TaskBilling,
    pub(crate) guid: Uuid,
    /// Index 0 is the most recently started interval.
    pub(crate) intervals: Vec<IntervalKey>,
    pub(crate) parent: Option<ProjectKey>,
}

impl Task {
    pub(crate) fn new() -> Self {
        Self {
            memo: DEFAULT_TASK_MEMO.into(),
            notes: String::new(),
            billing: TaskBilling::default(),
            guid: Uuid::new_v4(),
            intervals: vec![],
            parent: None,
        }
    }

    /// Copies the descriptive and billing data, never the intervals.
    pub(crate) fn copy_of(old: &Task) -> Self {
        Self {
            memo: old.memo.clone(),
            notes: old.notes.clone(),
            billing: old.billing.clone(),
            ..Self::new()
        }
    }

    pub fn memo(&self) -> &str {
        &self.memo
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn billing(&self) -> &TaskBilling {
        &self.billing
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn intervals(&self) -> &[IntervalKey] {
        &self.intervals
    }

    pub fn parent(&self) -> Option<ProjectKey> {
        self.parent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    #[default]
    Undefined,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    NoStatus,
    #[default]
    NotStarted,
    InProgress,
    OnHold,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingRates {
    pub regular: f64,
    pub overtime: f64,
    pub double_overtime: f64,
    pub flat_fee: f64,
}

impl Default for BillingRates {
    fn default() -> Self {
        Self {
            regular: 10.0,
            overtime: 15.0,
            double_overtime: 20.0,
            flat_fee: 1000.0,
        }
    }
}

/// Thresholds driving the interval scrubber of every task in a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrubThresholds {
    /// Stopped intervals this short or shorter are discarded.
    #[serde(with = "duration_secs")]
    pub min_interval: Duration,
    /// Stopped intervals this short or shorter are merged into a same-day neighbour.
    #[serde(with = "duration_secs")]
    pub auto_merge_interval: Duration,
    /// Neighbouring intervals separated by less than this are merged.
    #[serde(with = "duration_secs")]
    pub auto_merge_gap: Duration,
}

impl Default for ScrubThresholds {
    fn default() -> Self {
        Self {
            min_interval: Duration::seconds(3),
            auto_merge_interval: Duration::seconds(60),
            auto_merge_gap: Duration::seconds(60),
        }
    }
}

/// Planning data. `None` means the date was never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub estimated_start: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub estimated_end: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub due_date: Option<DateTime<Utc>>,
    pub sizing: i32,
    pub percent_complete: u8,
    pub urgency: Rank,
    pub importance: Rank,
    pub status: ProjectStatus,
}

/// Cached durations for the seven buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    #[serde(with = "duration_secs")]
    pub ever: Duration,
    #[serde(with = "duration_secs")]
    pub day: Duration,
    #[serde(with = "duration_secs")]
    pub yesterday: Duration,
    #[serde(with = "duration_secs")]
    pub week: Duration,
    #[serde(with = "duration_secs")]
    pub last_week: Duration,
    #[serde(with = "duration_secs")]
    pub month: Duration,
    #[serde(with = "duration_secs")]
    pub year: Duration,
}

impl Default for Totals {
    fn default() -> Self {
        let zero = Duration::zero();
        Self {
            ever: zero,
            day: zero,
            yesterday: zero,
            week: zero,
            last_week: zero,
            month: zero,
            year: zero,
        }
    }
}

impl Totals {
    pub fn get(&self, bucket: Bucket) -> Duration {
        match bucket {
            Bucket::Ever => self.ever,
            Bucket::Day => self.day,
            Bucket::Yesterday => self.yesterday,
            Bucket::Week => self.week,
            Bucket::LastWeek => self.last_week,
            Bucket::Month => self.month,
            Bucket::Year => self.year,
        }
    }
}

impl Add for Totals {
    type Output = Totals;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for Totals {
    fn add_assign(&mut self, rhs: Self) {
        self.ever += rhs.ever;
        self.day += rhs.day;
        self.yesterday += rhs.yesterday;
        self.week += rhs.week;
        self.last_week += rhs.last_week;
        self.month += rhs.month;
        self.year += rhs.year;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Ever,
    Day,
    Yesterday,
    Week,
    LastWeek,
    Month,
    Year,
}

/// Descriptive fields of a project. Kept apart from the structural state so that
/// duplication can copy it in one go.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectInfo {
    pub title: String,
    pub desc: String,
    pub notes: String,
    pub custom_id: Option<String>,
    pub rates: BillingRates,
    pub thresholds: ScrubThresholds,
    pub schedule: Schedule,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self {
            title: String::new(),
            desc: String::new(),
            notes: String::new(),
            custom_id: None,
            rates: BillingRates::default(),
            thresholds: ScrubThresholds::default(),
            schedule: Schedule::default(),
        }
    }
}

pub struct Project {
    pub(crate) info: ProjectInfo,
    pub(crate) id: i32,
    pub(crate) guid: Uuid,
    pub(crate) parent: Option<ProjectKey>,
    pub(crate) tasks: Vec<TaskKey>,
    pub(crate) children: Vec<ProjectKey>,
    pub(crate) current_task: Option<TaskKey>,
    pub(crate) listeners: Vec<ListenerEntry>,
    /// Ids of the listeners being delivered to. `None` outside a dispatch.
    pub(crate) dispatching: Option<Vec<ListenerId>>,
    pub(crate) dropped_listeners: Vec<ListenerId>,
    pub(crate) frozen: bool,
    pub(crate) being_destroyed: bool,
    pub(crate) dirty_time: bool,
    pub(crate) totals: Totals,
}

impl Project {
    pub(crate) fn new(id: i32, info: ProjectInfo) -> Self {
        Self {
            info,
            id,
            guid: Uuid::new_v4(),
            parent: None,
            tasks: vec![],
            children: vec![],
            current_task: None,
            listeners: vec![],
            dispatching: None,
            dropped_listeners: vec![],
            frozen: false,
            being_destroyed: false,
            dirty_time: false,
            totals: Totals::default(),
        }
    }

    pub fn info(&self) -> &ProjectInfo {
        &self.info
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn desc(&self) -> &str {
        &self.info.desc
    }

    pub fn notes(&self) -> &str {
        &self.info.notes
    }

    pub fn custom_id(&self) -> Option<&str> {
        self.info.custom_id.as_deref()
    }

    pub fn rates(&self) -> &BillingRates {
        &self.info.rates
    }

    pub fn thresholds(&self) -> &ScrubThresholds {
        &self.info.thresholds
    }

    pub fn schedule(&self) -> &Schedule {
        &self.info.schedule
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn parent(&self) -> Option<ProjectKey> {
        self.parent
    }

    pub fn tasks(&self) -> &[TaskKey] {
        &self.tasks
    }

    pub fn children(&self) -> &[ProjectKey] {
        &self.children
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Set when a change happened that the cached totals do not reflect yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty_time
    }

    /// Cached totals of this project's own tasks, sub-projects excluded.
    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn secs_ever(&self) -> Duration {
        self.totals.ever
    }

    pub fn secs_day(&self) -> Duration {
        self.totals.day
    }

    pub fn secs_yesterday(&self) -> Duration {
        self.totals.yesterday
    }

    pub fn secs_week(&self) -> Duration {
        self.totals.week
    }

    pub fn secs_last_week(&self) -> Duration {
        self.totals.last_week
    }

    pub fn secs_month(&self) -> Duration {
        self.totals.month
    }

    pub fn secs_year(&self) -> Duration {
        self.totals.year
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("title", &self.info.title)
            .field("parent", &self.parent)
            .field("tasks", &self.tasks)
            .field("children", &self.children)
            .field("current_task", &self.current_task)
            .field("listeners", &self.listeners.len())
            .field("frozen", &self.frozen)
            .field("totals", &self.totals)
            .finish()
    }
}

pub(crate) mod duration_secs {
    use chrono::Duration;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = i64::deserialize(deserializer)?;
        Duration::try_seconds(s)
            .ok_or_else(|| serde::de::Error::custom(format!("{s} seconds is out of range")))
    }
}
