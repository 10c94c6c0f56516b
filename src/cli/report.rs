use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};

use crate::{
    config::Zone,
    tracker::{aggregate::BucketBoundaries, Bucket, Forest, Node},
    utils::time::format_duration,
};

/// Prints one line per project, indented by depth: the project's own time in `bucket`, the
/// time of the whole subtree and the title. A `*` marks a running timer.
pub fn write_report(forest: &Forest, bucket: Bucket, out: &mut impl Write) -> Result<()> {
    let mut lines = vec![];
    forest.walk(|node| {
        if let Node::Project {
            key,
            project,
            depth,
        } = node
        {
            let marker = if forest.is_timer_running(key) { "*" } else { " " };
            lines.push(format!(
                "{}\t{}\t{marker}{}{}",
                format_duration(project.totals().get(bucket)),
                format_duration(forest.total(key, bucket)),
                "  ".repeat(depth),
                display_title(project.title()),
            ));
        }
        true
    });

    for line in lines {
        writeln!(out, "{line}")?;
    }
    writeln!(
        out,
        "{}\t\ttotal over {} projects",
        format_duration(forest.forest_total(bucket)),
        forest.forest_project_count()
    )?;
    Ok(())
}

fn display_title(title: &str) -> &str {
    if title.is_empty() {
        "(untitled)"
    } else {
        title
    }
}

pub fn write_boundaries(
    boundaries: &BucketBoundaries,
    zone: Zone,
    out: &mut impl Write,
) -> Result<()> {
    let rows = [
        ("day", boundaries.midnight),
        ("yesterday", boundaries.yesterday),
        ("week", boundaries.week_start),
        ("last week", boundaries.last_week_start),
        ("month", boundaries.month_start),
        ("year", boundaries.year_start),
    ];
    for (name, moment) in rows {
        writeln!(out, "{name:<10}{}", format_moment(moment, zone))?;
    }
    Ok(())
}

fn format_moment(moment: DateTime<Utc>, zone: Zone) -> String {
    const FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";
    match zone {
        Zone::Local => moment.with_timezone(&Local).format(FORMAT).to_string(),
        Zone::Fixed(offset) => moment.with_timezone(&offset).format(FORMAT).to_string(),
    }
}
