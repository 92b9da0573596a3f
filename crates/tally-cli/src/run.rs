//! One orchestrator run: load config, plan the window, fetch completions,
//! expand to jobs, execute under the concurrency cap, persist results, and
//! advance the watermark when the run has earned it.

use anyhow::{bail, Context};
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{Args, Mode};
use crate::dispatch::{execute_jobs, JobOutcome};
use tally_catalog::{
    build_jobs, clamp_parallelism, validate_catalog, BuiltJob, Catalog, DbConfig,
};
use tally_core::{CompletionRecord, CountReport, CountStatus, PeriodType, WatermarkStore};
use tally_counter::CounterDriver;
use tally_fetch::{
    dedup_completions, plan_window, resolve_periods, CompletionLog, Window, WindowOptions,
    WindowPlan,
};
use tally_ledger::{AuditRow, Ledger};

const DEFAULT_WATERMARK_FILE: &str = "tally_watermark.json";

pub async fn run(args: Args) -> anyhow::Result<u8> {
    let started = Instant::now();

    let catalog = Catalog::load(&args.config)
        .with_context(|| format!("loading audit catalog {}", args.config.display()))?;
    if let Err(errors) = validate_catalog(&catalog) {
        for e in &errors {
            error!("Catalog: {}", e);
        }
        bail!("catalog validation failed with {} error(s)", errors.len());
    }

    let mut db_cfg = DbConfig::load(&args.db_config)
        .with_context(|| format!("loading db config {}", args.db_config.display()))?;
    db_cfg.apply_env()?;
    apply_cli_overrides(&args, &mut db_cfg);

    let tz = db_cfg.clickhouse.timezone_offset()?;
    let now = Utc::now().with_timezone(&tz);
    let now = now.with_nanosecond(0).unwrap_or(now);
    let resolved_date = resolve_date(args.date.as_deref(), now)?;
    let mode = args.mode();
    info!(
        "Mode {}, business date {}",
        mode.as_str(),
        resolved_date.format("%Y%m%d")
    );

    let (concurrency, jar_threads) = clamp_parallelism(
        args.concurrency.unwrap_or(catalog.defaults.concurrency),
        catalog.defaults.jar_options.threads,
        &catalog.defaults.limits,
    );
    info!(
        "Effective parallelism: {} worker(s) x {} thread(s)",
        concurrency, jar_threads
    );

    let store = WatermarkStore::new(watermark_path(&args, &db_cfg));
    if args.watermark_reset && !args.dry_run {
        store.reset()?;
        info!("Watermark reset: {}", store.path().display());
    }

    // Gather the completion records this run will audit.
    let mut window_used: Option<Window> = None;
    let records: Vec<CompletionRecord> = match mode {
        Mode::ExplicitList => explicit_records(&args, &catalog, resolved_date),
        Mode::SkipUpstream => all_catalog_records(&catalog, resolved_date),
        Mode::Upstream => {
            let opts = WindowOptions {
                enabled: db_cfg.watermark.enabled,
                overlap_seconds: db_cfg.watermark.overlap_seconds,
                max_window_hours: db_cfg.watermark.max_window_hours,
                fallback_lookback_hours: db_cfg.watermark.fallback_lookback_hours,
                init_now: args.watermark_init_now,
            };
            let watermark = if db_cfg.watermark.enabled {
                store.load()
            } else {
                None
            };
            if watermark.is_some() && args.watermark_init_now {
                warn!("--watermark-init-now ignored: a watermark already exists");
            }
            match plan_window(now, watermark.as_ref(), &opts) {
                WindowPlan::InitializeOnly => {
                    if args.dry_run {
                        info!("Dry-run: would initialize the watermark to {}", now);
                    } else {
                        store.initialize_to(now)?;
                        info!("Watermark initialized to {}; no work this run", now);
                    }
                    return Ok(0);
                }
                WindowPlan::Run(window) => {
                    info!("Scan window [{}, {})", window.start, window.end);
                    let log = CompletionLog::new(&db_cfg.clickhouse, tz);
                    let fetched = match log.fetch(&window, resolved_date).await {
                        Ok(fetched) => fetched,
                        Err(e) => {
                            error!("Completion fetch failed: {}", e);
                            return Ok(1);
                        }
                    };
                    window_used = Some(window);
                    dedup_completions(fetched)
                }
            }
        }
    };
    info!("{} completion record(s) to audit", records.len());

    let built = expand_records(&catalog, &records, resolved_date, tz, jar_threads);

    if args.dry_run {
        print_plan(&built, concurrency, jar_threads, window_used.as_ref());
        return Ok(0);
    }

    let mut ready = Vec::new();
    let mut invalid = Vec::new();
    for b in built {
        match b {
            BuiltJob::Ready(job) => ready.push(job),
            BuiltJob::Unresolved { job, placeholder } => invalid.push((job, placeholder)),
        }
    }

    let cancel = CancellationToken::new();
    let mut outcomes: Vec<JobOutcome> = Vec::new();

    if !ready.is_empty() || !invalid.is_empty() {
        let ledger = Arc::new(Ledger::connect(&db_cfg.mysql).await?);

        // Placeholder failures become synthetic failed rows; they never run.
        for (job, placeholder) in invalid {
            error!(
                "Job for {} dropped: unresolved placeholder {}",
                job.hdfs_path, placeholder
            );
            let report = CountReport::failed(
                &job.hdfs_path,
                format!("unresolved placeholder: {}", placeholder),
            );
            let row = AuditRow::from_outcome(&job, &report);
            let sink_error = match ledger.append(&row).await {
                Ok(()) => None,
                Err(e) => {
                    error!("Ledger write failed for {}: {}", job.hdfs_path, e);
                    Some(e.to_string())
                }
            };
            outcomes.push(JobOutcome {
                job,
                status: CountStatus::Failed,
                sink_error,
            });
        }

        if !ready.is_empty() {
            let jar = db_cfg.counter.jar_path.clone().context(
                "no counter jar configured (set counter.jar_path, --jar or HDFS_COUNTER_JAR)",
            )?;
            let driver = Arc::new(CounterDriver {
                jar,
                java_home: db_cfg.counter.java_home.clone(),
                hadoop_conf_dir: db_cfg.counter.hadoop_conf_dir.clone(),
                timeout: db_cfg
                    .counter
                    .timeout_seconds
                    .map(std::time::Duration::from_secs),
            });
            spawn_signal_handler(cancel.clone());
            outcomes.extend(
                execute_jobs(ready, driver, ledger.clone(), concurrency, cancel.clone()).await,
            );
        }
    }

    let total = outcomes.len();
    let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
    let failed = total - succeeded;
    let all_success = failed == 0;
    info!(
        "Run finished in {:.1}s: {} succeeded, {} failed of {} job(s)",
        started.elapsed().as_secs_f64(),
        succeeded,
        failed,
        total
    );

    let cancelled = cancel.is_cancelled();
    let mut exit: u8 = if all_success && !cancelled { 0 } else { 1 };

    if mode == Mode::Upstream && db_cfg.watermark.enabled {
        if cancelled {
            warn!("Run was cancelled; watermark left untouched");
        } else if let Some(window) = window_used {
            if all_success || db_cfg.watermark.advance_on_failure {
                // The window end, not `now`: the next run rescans from here.
                match store.save(window.end) {
                    Ok(()) => info!("Watermark advanced to {}", window.end),
                    Err(e) => {
                        error!("Failed to persist watermark: {}", e);
                        exit = 1;
                    }
                }
            } else {
                info!(
                    "Watermark held at its previous value ({} job failure(s))",
                    failed
                );
            }
        }
    }

    Ok(exit)
}

fn apply_cli_overrides(args: &Args, cfg: &mut DbConfig) {
    if let Some(h) = args.hours_lookback {
        cfg.watermark.fallback_lookback_hours = h;
    }
    if let Some(s) = args.watermark_overlap_seconds {
        cfg.watermark.overlap_seconds = s;
    }
    if let Some(h) = args.watermark_max_window_hours {
        cfg.watermark.max_window_hours = h;
    }
    if args.disable_watermark {
        cfg.watermark.enabled = false;
    }
    if let Some(jar) = &args.jar {
        cfg.counter.jar_path = Some(jar.clone());
    }
    if let Some(home) = &args.java_home {
        cfg.counter.java_home = Some(home.clone());
    }
    if let Some(dir) = &args.hadoop_conf_dir {
        cfg.counter.hadoop_conf_dir = Some(dir.clone());
    }
}

/// `--watermark-path`, then the config file's `watermark.path`, then a
/// default sibling of the DB config document.
fn watermark_path(args: &Args, cfg: &DbConfig) -> PathBuf {
    if let Some(p) = &args.watermark_path {
        return p.clone();
    }
    if let Some(p) = &cfg.watermark.path {
        return p.clone();
    }
    args.db_config
        .parent()
        .map(|dir| dir.join(DEFAULT_WATERMARK_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WATERMARK_FILE))
}

fn resolve_date(arg: Option<&str>, now: DateTime<FixedOffset>) -> anyhow::Result<NaiveDate> {
    match arg {
        Some(s) => NaiveDate::parse_from_str(s, "%Y%m%d")
            .with_context(|| format!("invalid --date '{}', expected YYYYMMDD", s)),
        None => now
            .date_naive()
            .pred_opt()
            .context("business date underflow"),
    }
}

/// Batch identifier for records synthesized without an upstream completion.
fn synthesized_batch_no(period_type: PeriodType, date: NaiveDate) -> String {
    match period_type {
        PeriodType::Monthly => date.format("%Y%m").to_string(),
        _ => date.format("%Y%m%d").to_string(),
    }
}

fn explicit_records(args: &Args, catalog: &Catalog, resolved_date: NaiveDate) -> Vec<CompletionRecord> {
    let index = catalog.by_task_name();
    let mut records = Vec::new();
    for name in args.tasks.iter().flatten() {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match index.get(name) {
            Some(entry) => records.push(CompletionRecord {
                task_name: entry.task_name.clone(),
                period_type: entry.period_type,
                batch_no: synthesized_batch_no(entry.period_type, resolved_date),
                complete_dt: None,
            }),
            None => warn!("Task '{}' is not in the catalog; skipping", name),
        }
    }
    records
}

fn all_catalog_records(catalog: &Catalog, resolved_date: NaiveDate) -> Vec<CompletionRecord> {
    catalog
        .schedules
        .iter()
        .map(|entry| CompletionRecord {
            task_name: entry.task_name.clone(),
            period_type: entry.period_type,
            batch_no: synthesized_batch_no(entry.period_type, resolved_date),
            complete_dt: None,
        })
        .collect()
}

/// Expand completion records into audit jobs via the catalog. Completions
/// without a catalog entry are skipped; the catalog's period type is
/// authoritative for table layout when the upstream disagrees.
fn expand_records(
    catalog: &Catalog,
    records: &[CompletionRecord],
    resolved_date: NaiveDate,
    tz: FixedOffset,
    jar_threads: u32,
) -> Vec<BuiltJob> {
    let index = catalog.by_task_name();
    let mut built = Vec::new();
    for record in records {
        let Some(entry) = index.get(record.task_name.as_str()) else {
            warn!(
                "Completion for '{}' has no catalog entry; skipping",
                record.task_name
            );
            continue;
        };
        let mut effective = record.clone();
        if entry.period_type != record.period_type {
            warn!(
                "Completion for '{}' reports {} but the catalog says {}; using the catalog",
                record.task_name, record.period_type, entry.period_type
            );
            effective.period_type = entry.period_type;
        }
        for period in resolve_periods(&effective, resolved_date, tz) {
            built.extend(build_jobs(entry, period, &effective.batch_no, jar_threads));
        }
    }
    built
}

fn print_plan(built: &[BuiltJob], concurrency: u32, jar_threads: u32, window: Option<&Window>) {
    println!("\n=== Planned Audit Jobs ===");
    if let Some(w) = window {
        println!("Window: [{}, {})", w.start, w.end);
    }
    for b in built {
        match b {
            BuiltJob::Ready(job) => println!(
                "  {:<28} {:<24} {} [{}]",
                job.task_name,
                job.table_name,
                job.hdfs_path,
                job.format.as_str()
            ),
            BuiltJob::Unresolved { job, placeholder } => println!(
                "  {:<28} {:<24} {} [INVALID: unresolved {}]",
                job.task_name, job.table_name, job.hdfs_path, placeholder
            ),
        }
    }
    println!(
        "Total: {} job(s); concurrency {}, {} thread(s) each",
        built.len(),
        concurrency,
        jar_threads
    );
}

/// SIGINT/SIGTERM stop dispatch and kill in-flight counters; completions
/// already observed are still written.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Cannot install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        warn!("Shutdown signal received; draining in-flight counts");
        cancel.cancel();
    });
}
