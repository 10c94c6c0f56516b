use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use chrono::{DateTime, Duration, TimeZone, Utc};
use gnotime::{
    config::{TrackerConfig, Zone},
    tracker::Forest,
    utils::clock::Clock,
};

/// Shared clock handle, moved by the test while the forest reads it.
#[derive(Clone)]
pub struct SteppedClock(Arc<AtomicI64>);

impl SteppedClock {
    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.num_seconds(), Ordering::SeqCst);
    }
}

impl Clock for SteppedClock {
    fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0.load(Ordering::SeqCst), 0).unwrap_or_default()
    }
}

/// Wednesday 2024-04-10 12:00 UTC.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 10, 12, 0, 0).unwrap()
}

pub fn utc_forest() -> (Forest, SteppedClock) {
    let clock = SteppedClock(Arc::new(AtomicI64::new(noon().timestamp())));
    let config = TrackerConfig {
        zone: Zone::utc(),
        ..TrackerConfig::default()
    };
    (Forest::with_clock(config, Box::new(clock.clone())), clock)
}
