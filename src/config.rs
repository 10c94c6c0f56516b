use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, Offset, Utc};

use crate::utils::time::{local_date, local_day_start};

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Time zone used for calendar arithmetic (midnights, week starts, months).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zone {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl Zone {
    pub fn utc() -> Self {
        Zone::Fixed(Utc.fix())
    }

    /// Calendar date of `moment` in this zone.
    pub fn date_of(&self, moment: DateTime<Utc>) -> NaiveDate {
        match self {
            Zone::Local => local_date(&Local, moment),
            Zone::Fixed(offset) => local_date(offset, moment),
        }
    }

    /// The instant at which `date` begins in this zone.
    pub fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        match self {
            Zone::Local => local_day_start(&Local, date),
            Zone::Fixed(offset) => local_day_start(offset, date),
        }
    }
}

/// Knobs of the aggregation engine. The defaults start a day at midnight and a week on Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// A day begins this long after local midnight.
    pub day_start_offset: Duration,
    /// 0 = Sunday, 1 = Monday, ... 6 = Saturday.
    pub week_start_offset: u32,
    pub zone: Zone,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            day_start_offset: Duration::zero(),
            week_start_offset: 0,
            zone: Zone::Local,
        }
    }
}

/// Command line view of [TrackerConfig].
#[derive(Debug, Clone, Copy, clap::Args)]
pub struct ConfigArgs {
    #[arg(
        long = "day-start",
        default_value_t = 0,
        help = "Seconds after local midnight at which a new day begins"
    )]
    pub day_start_secs: i64,
    #[arg(
        long = "week-start",
        default_value_t = 0,
        value_parser = clap::value_parser!(u32).range(0..7),
        help = "First day of the week. 0 is Sunday, 1 is Monday"
    )]
    pub week_start: u32,
    #[arg(
        long = "utc-offset",
        help = "Use a fixed offset from UTC in seconds instead of the local time zone"
    )]
    pub utc_offset_secs: Option<i32>,
}

impl TryFrom<ConfigArgs> for TrackerConfig {
    type Error = anyhow::Error;

    fn try_from(value: ConfigArgs) -> Result<Self, Self::Error> {
        let zone = match value.utc_offset_secs {
            Some(secs) => Zone::Fixed(
                FixedOffset::east_opt(secs)
                    .ok_or_else(|| anyhow::anyhow!("Offset of {secs} seconds is out of range"))?,
            ),
            None => Zone::Local,
        };
        Ok(TrackerConfig {
            day_start_offset: Some(value.day_start_secs)
                .filter(|secs| (1 - SECS_PER_DAY..SECS_PER_DAY).contains(secs))
                .and_then(Duration::try_seconds)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Day start of {} seconds is not within a day of midnight",
                        value.day_start_secs
                    )
                })?,
            week_start_offset: value.week_start,
            zone,
        })
    }
}
