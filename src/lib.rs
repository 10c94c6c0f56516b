//! Time tracking engine. Keeps a forest of projects, each holding tasks made of recorded time
//! intervals, and maintains per-project totals for today, yesterday, this and last week, this
//! month, this year and ever.
//!
//! The engine lives in [tracker]; [cli] is a small front-end reading and writing JSON journals.

pub mod cli;
pub mod config;
pub mod tracker;
pub mod utils;
