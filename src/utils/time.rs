use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};

/// Calendar date of `moment` as seen in `tz`.
pub fn local_date<Tz: TimeZone>(tz: &Tz, moment: DateTime<Utc>) -> NaiveDate {
    moment.with_timezone(tz).date_naive()
}

/// Instant at which `date` starts in `tz`. When a DST transition swallows local midnight the
/// first valid instant after the gap is used.
pub fn local_day_start<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(v) => v.to_utc(),
        LocalResult::Ambiguous(earliest, _) => earliest.to_utc(),
        LocalResult::None => {
            // Gaps are at most a couple of hours, probe forward an hour at a time.
            (1..=3)
                .find_map(|hours| {
                    tz.from_local_datetime(&(midnight + Duration::hours(hours)))
                        .earliest()
                })
                .map(|v| v.to_utc())
                .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
        }
    }
}

/// Length of the half-open overlap between `[start, stop)` and `[from, to)`.
pub fn overlap(
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Duration {
    let lower = start.max(from);
    let upper = stop.min(to);
    if upper > lower {
        upper - lower
    } else {
        Duration::zero()
    }
}

pub fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}
