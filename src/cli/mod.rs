pub mod journal;
pub mod report;

use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use journal::{export_journal, import_journal, read_journal, write_journal};
use report::{write_boundaries, write_report};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    config::{ConfigArgs, TrackerConfig},
    tracker::{aggregate::bucket_boundaries, Bucket, Forest, SortKey},
    utils::{
        dir::{create_application_default_path, JOURNAL_FILE},
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "gnotime", version, long_about = None)]
#[command(about = "Time tracking over a tree of projects, tasks and intervals", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging to the console")]
    log: bool,
    #[arg(long, help = "Log level, overrides RUST_LOG")]
    log_filter: Option<LevelFilter>,
    #[arg(long, help = "Also write logs into daily rotated files in this directory")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Print the time of every project of a journal")]
    Report {
        #[arg(
            long,
            help = "Journal file. By default reads journal.json from $XDG_STATE_HOME/gnotime or $HOME/.local/state/gnotime"
        )]
        journal: Option<PathBuf>,
        #[arg(long, short, default_value = "day", help = "Time bucket to print")]
        bucket: Bucket,
        #[arg(long, short, help = "Sort projects before printing")]
        sort: Option<SortKey>,
        #[command(flatten)]
        config: ConfigArgs,
    },
    #[command(about = "Scrub every interval of a journal and write the result back")]
    Normalize {
        #[arg(long, help = "Journal file to read")]
        journal: Option<PathBuf>,
        #[arg(long, short, help = "Where to write the result. Defaults to the input file")]
        output: Option<PathBuf>,
        #[command(flatten)]
        config: ConfigArgs,
    },
    #[command(about = "Print where the current day, week, month and year begin")]
    Boundaries {
        #[arg(long, help = "Unix time to compute the boundaries for. Defaults to now")]
        at: Option<i64>,
        #[command(flatten)]
        config: ConfigArgs,
    },
}

pub fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = match (args.log_filter, args.log) {
        (Some(level), _) => Some(level),
        (None, true) => Some(LevelFilter::TRACE),
        (None, false) => None,
    };
    enable_logging(CLI_PREFIX, args.log_dir.as_deref(), logging_level, args.log)?;

    run_command(args.commands, &mut io::stdout().lock())
}

fn run_command(command: Commands, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Report {
            journal,
            bucket,
            sort,
            config,
        } => {
            let forest = load_forest(journal, config.try_into()?, sort)?;
            write_report(&forest, bucket, out)
        }
        Commands::Normalize {
            journal,
            output,
            config,
        } => {
            let input = journal_path(journal)?;
            let forest = load_forest(Some(input.clone()), config.try_into()?, None)?;
            let output = output.unwrap_or(input);
            write_journal(&output, &export_journal(&forest))?;
            info!("Wrote {} projects to {output:?}", forest.forest_project_count());
            Ok(())
        }
        Commands::Boundaries { at, config } => {
            let config: TrackerConfig = config.try_into()?;
            let now = match at {
                Some(secs) => DateTime::from_timestamp(secs, 0)
                    .with_context(|| format!("{secs} is not a valid unix time"))?,
                None => chrono::Utc::now(),
            };
            let boundaries = bucket_boundaries(
                now,
                config.zone,
                config.day_start_offset,
                config.week_start_offset,
            );
            write_boundaries(&boundaries, config.zone, out)
        }
    }
}

fn journal_path(journal: Option<PathBuf>) -> Result<PathBuf> {
    match journal {
        Some(path) => Ok(path),
        None => Ok(create_application_default_path()?.join(JOURNAL_FILE)),
    }
}

fn load_forest(
    journal: Option<PathBuf>,
    config: TrackerConfig,
    sort: Option<SortKey>,
) -> Result<Forest> {
    let path = journal_path(journal)?;
    let projects = read_journal(&path)?;
    let mut forest = Forest::new(config);
    import_journal(&mut forest, &projects);
    if let Some(key) = sort {
        forest.sort_projects(key);
    }
    Ok(forest)
}

#[cfg(test)]
mod cli_tests {
    use std::fs;

    use clap::Parser;

    use super::{run_command, Args};

    const JOURNAL: &str = r#"[
        { "title": "b", "tasks": [ { "intervals": [ { "start": 1000000, "stop": 1003600 } ] } ] },
        { "title": "a", "tasks": [ { "intervals": [ { "start": 2000000, "stop": 2000600 } ] } ] }
    ]"#;

    fn run(args: &[&str]) -> String {
        let args = Args::try_parse_from(args).unwrap();
        let mut out = vec![];
        run_command(args.commands, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn report_reads_a_journal_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");
        fs::write(&path, JOURNAL).unwrap();

        let text = run(&[
            "gnotime",
            "report",
            "--journal",
            path.to_str().unwrap(),
            "--bucket",
            "ever",
            "--sort",
            "title",
            "--utc-offset",
            "0",
        ]);
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "10m0s\t10m0s\t a");
        assert_eq!(lines[1], "1h0m0s\t1h0m0s\t b");
        assert_eq!(lines[2], "1h10m0s\t\ttotal over 2 projects");
    }

    #[test]
    fn normalize_writes_a_readable_journal() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.json");
        fs::write(&input, JOURNAL).unwrap();

        run(&[
            "gnotime",
            "normalize",
            "--journal",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ]);
        let written = super::read_journal(&output).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].id, Some(1));
        assert_eq!(written[1].title, "a");
    }

    #[test]
    fn boundaries_for_a_fixed_moment() {
        // 2024-04-10 18:00:00 UTC, a Wednesday.
        let text = run(&["gnotime", "boundaries", "--at", "1712772000", "--utc-offset", "0"]);
        assert!(text.contains("week      2024-04-07 00:00:00 +00:00"));
        assert!(text.contains("year      2024-01-01 00:00:00 +00:00"));
    }

    #[test]
    fn missing_journal_is_an_error() {
        let args = Args::try_parse_from(["gnotime", "report", "--journal", "/nonexistent/j.json"])
            .unwrap();
        let mut out = vec![];
        assert!(run_command(args.commands, &mut out).is_err());
    }
}
