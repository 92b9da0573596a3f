//! Command-line surface of the tally orchestrator.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tally")]
#[command(about = "Scheduled data-audit orchestrator: counts what finished warehouse jobs wrote")]
#[command(version)]
pub struct Args {
    /// Business date override, YYYYMMDD (default: yesterday in the configured timezone).
    #[arg(short = 'd', long)]
    pub date: Option<String>,

    /// Comma-separated task names: audit exactly these, skipping the completion log.
    #[arg(short = 't', long, value_delimiter = ',')]
    pub tasks: Option<Vec<String>>,

    /// Audit every catalog entry for the resolved date without querying the completion log.
    #[arg(long)]
    pub skip_clickhouse: bool,

    /// Orchestration concurrency override (still clamped by catalog limits).
    #[arg(short = 'n', long)]
    pub concurrency: Option<u32>,

    /// Build and print the job list; execute nothing, write nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Cold-start/fallback window size in hours.
    #[arg(long)]
    pub hours_lookback: Option<f64>,

    /// Watermark file path override.
    #[arg(long)]
    pub watermark_path: Option<PathBuf>,

    /// Seconds re-scanned before the stored watermark.
    #[arg(long)]
    pub watermark_overlap_seconds: Option<u64>,

    /// Catch-up cap in hours; zero or negative disables the cap.
    #[arg(long)]
    pub watermark_max_window_hours: Option<f64>,

    /// On a missing watermark, write `now` and exit without doing any work.
    #[arg(long)]
    pub watermark_init_now: bool,

    /// Delete the watermark file before running.
    #[arg(long)]
    pub watermark_reset: bool,

    /// Ignore the watermark for this run.
    #[arg(long)]
    pub disable_watermark: bool,

    /// Audit catalog path.
    #[arg(short = 'c', long, default_value = "audit_config.yml")]
    pub config: PathBuf,

    /// DB/upstream config path.
    #[arg(long, default_value = "db_config.yml")]
    pub db_config: PathBuf,

    /// Counter jar path override.
    #[arg(long)]
    pub jar: Option<PathBuf>,

    /// JAVA_HOME for the counter subprocess.
    #[arg(long)]
    pub java_home: Option<PathBuf>,

    /// Hadoop configuration directory passed to the counter subprocess.
    #[arg(long)]
    pub hadoop_conf_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// How this run decides what to audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `--tasks`: the given names, verbatim.
    ExplicitList,
    /// `--skip-clickhouse`: every catalog entry for the resolved period.
    SkipUpstream,
    /// Default: completions pulled from the upstream log.
    Upstream,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::ExplicitList => "explicit-list",
            Mode::SkipUpstream => "skip-upstream",
            Mode::Upstream => "upstream",
        }
    }
}

impl Args {
    /// Mode is a function of the flags alone; `--tasks` wins over
    /// `--skip-clickhouse`.
    pub fn mode(&self) -> Mode {
        if self.tasks.as_ref().is_some_and(|t| !t.is_empty()) {
            Mode::ExplicitList
        } else if self.skip_clickhouse {
            Mode::SkipUpstream
        } else {
            Mode::Upstream
        }
    }
}
