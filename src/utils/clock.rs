use chrono::{DateTime, Utc};

/// Represents an entity responsible for providing dates to the tracker. This allows tests to
/// drive the timer with a deterministic clock.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;
}

pub struct DefaultClock;

impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
