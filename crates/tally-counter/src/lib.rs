//! Driver for the external HDFS row-counter subprocess.
//!
//! The counter is a black box: one invocation per audit job, one JSON
//! report on stdout. Everything that can go wrong with it (launch failure,
//! timeout, cancellation, garbage output) is contained in a `failed`
//! report for that job; the driver never propagates an error.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tally_core::{AuditJob, CountReport, CountStatus};

/// Hard cap on captured stdout/stderr, each.
const MAX_CAPTURE_BYTES: u64 = 8 * 1024 * 1024;
/// How much of the stderr tail goes into a synthesized error message.
const STDERR_TAIL_BYTES: usize = 4096;

/// Launches and supervises one counter subprocess per job.
#[derive(Debug, Clone)]
pub struct CounterDriver {
    pub jar: PathBuf,
    pub java_home: Option<PathBuf>,
    pub hadoop_conf_dir: Option<PathBuf>,
    /// Wall-clock cap per invocation; unbounded when `None`.
    pub timeout: Option<Duration>,
}

impl CounterDriver {
    /// Measure one job. Always returns a report; `failed` carries the
    /// reason in `errors`.
    pub async fn count(&self, job: &AuditJob, cancel: &CancellationToken) -> CountReport {
        let cmd = self.command(job);
        run_counter(cmd, &job.hdfs_path, self.timeout, cancel).await
    }

    fn command(&self, job: &AuditJob) -> Command {
        let java = match &self.java_home {
            Some(home) => home.join("bin").join("java"),
            None => PathBuf::from("java"),
        };
        let mut cmd = Command::new(java);
        cmd.arg("-jar")
            .arg(&self.jar)
            .arg("--path")
            .arg(&job.hdfs_path)
            .arg("--format")
            .arg(job.format.as_str())
            .arg("--threads")
            .arg(job.jar_threads.to_string());
        if let Some(delimiter) = &job.delimiter {
            cmd.arg("--delimiter").arg(delimiter);
        }
        if let Some(dir) = &self.hadoop_conf_dir {
            cmd.arg("--hadoop-conf").arg(dir);
        }
        if let Some(home) = &self.java_home {
            cmd.env("JAVA_HOME", home);
        }
        cmd
    }
}

/// Run a prepared counter command through the full capture/timeout/cancel
/// path and normalize the result.
async fn run_counter(
    mut cmd: Command,
    hdfs_path: &str,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> CountReport {
    let started = Instant::now();

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return synthesized(
                hdfs_path,
                format!("failed to launch counter: {}", e),
                started,
            )
        }
    };

    let stdout_task = child.stdout.take().map(|r| tokio::spawn(read_capped(r)));
    let stderr_task = child.stderr.take().map(|r| tokio::spawn(read_capped(r)));

    enum WaitOutcome {
        Exited(std::process::ExitStatus),
        TimedOut,
        Cancelled,
        WaitFailed(std::io::Error),
    }

    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => WaitOutcome::Exited(status),
            Err(e) => WaitOutcome::WaitFailed(e),
        },
        _ = cancel.cancelled() => WaitOutcome::Cancelled,
        _ = deadline(timeout) => WaitOutcome::TimedOut,
    };

    let status = match outcome {
        WaitOutcome::Exited(status) => Some(status),
        WaitOutcome::TimedOut => {
            warn!("Counter for {} exceeded its timeout; killing", hdfs_path);
            terminate(&mut child).await;
            let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
            return synthesized(
                hdfs_path,
                format!("counter timed out after {}s", secs),
                started,
            );
        }
        WaitOutcome::Cancelled => {
            terminate(&mut child).await;
            return synthesized(hdfs_path, "cancelled", started);
        }
        WaitOutcome::WaitFailed(e) => {
            terminate(&mut child).await;
            return synthesized(hdfs_path, format!("wait failed: {}", e), started);
        }
    };

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;
    let exit_code = status.and_then(|s| s.code());

    match parse_last_json(&stdout) {
        Some(report) => {
            let advisory = advisory_status(exit_code);
            if report.status != advisory {
                warn!(
                    "Counter for {} exited {:?} but reported '{}'; trusting the report",
                    hdfs_path,
                    exit_code,
                    report.status.as_str()
                );
            }
            debug!(
                "Counter for {} finished in {}ms: {} row(s)",
                hdfs_path,
                started.elapsed().as_millis(),
                report.row_count
            );
            report
        }
        None => {
            let mut message = format!("counter exited {:?} without a parseable report", exit_code);
            let tail = tail(&stderr, STDERR_TAIL_BYTES);
            if !tail.is_empty() {
                message.push_str(": ");
                message.push_str(tail);
            }
            synthesized(hdfs_path, message, started)
        }
    }
}

fn synthesized(hdfs_path: &str, message: impl Into<String>, started: Instant) -> CountReport {
    let mut report = CountReport::failed(hdfs_path, message);
    report.duration_ms = started.elapsed().as_millis() as u64;
    report
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending::<()>().await,
    }
}

/// Kill the child's whole process group on unix (the jar forks helpers),
/// then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Read a stream to its end, keeping at most `MAX_CAPTURE_BYTES`. The
/// remainder is drained so the child never blocks on a full pipe.
async fn read_capped(reader: impl AsyncRead + Unpin) -> String {
    let mut capped = reader.take(MAX_CAPTURE_BYTES);
    let mut buf = Vec::new();
    let _ = capped.read_to_end(&mut buf).await;
    let mut rest = capped.into_inner();
    let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(task: Option<tokio::task::JoinHandle<String>>) -> String {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Locate the report in stdout: informational logging may precede it, so
/// take the last line starting with `{` and parse from there, ignoring any
/// trailing noise. Earlier candidates are tried if the last one is not
/// valid JSON.
fn parse_last_json(stdout: &str) -> Option<CountReport> {
    let mut offsets = Vec::new();
    let mut pos = 0;
    for line in stdout.split_inclusive('\n') {
        if line.starts_with('{') {
            offsets.push(pos);
        }
        pos += line.len();
    }
    for &off in offsets.iter().rev() {
        let mut stream =
            serde_json::Deserializer::from_str(&stdout[off..]).into_iter::<CountReport>();
        if let Some(Ok(report)) = stream.next() {
            return Some(report);
        }
    }
    None
}

fn advisory_status(exit_code: Option<i32>) -> CountStatus {
    match exit_code {
        Some(0) => CountStatus::Success,
        Some(2) => CountStatus::Partial,
        _ => CountStatus::Failed,
    }
}

/// Last `max` bytes of `s`, snapped to a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s.trim_end();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{FileFormat, Period};

    fn job() -> AuditJob {
        AuditJob {
            task_name: "ods_orders_sync".to_string(),
            interface_id: "IF0001".to_string(),
            platform_id: "P01".to_string(),
            partner_id: "PRT9".to_string(),
            table_name: "ods.orders".to_string(),
            hdfs_path: "/warehouse/ods/orders/dt=20260116".to_string(),
            format: FileFormat::Orc,
            delimiter: None,
            period: Period::Daily(chrono_date()),
            batch_no: "20260116".to_string(),
            jar_threads: 8,
        }
    }

    fn chrono_date() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2026, 1, 16).unwrap()
    }

    const GOOD_REPORT: &str = r#"{"status":"success","row_count":1234,"file_count":3,"success_file_count":3,"total_size_bytes":65536,"duration_ms":900,"errors":[]}"#;

    #[test]
    fn test_parse_plain_report() {
        let report = parse_last_json(GOOD_REPORT).unwrap();
        assert_eq!(report.status, CountStatus::Success);
        assert_eq!(report.row_count, 1234);
    }

    #[test]
    fn test_parse_report_with_log_prefix() {
        let stdout = format!(
            "2026-01-17 13:02:01 INFO starting scan\nprogress: 50%\n{}\n",
            GOOD_REPORT
        );
        let report = parse_last_json(&stdout).unwrap();
        assert_eq!(report.row_count, 1234);
    }

    #[test]
    fn test_parse_takes_last_document() {
        let stdout = format!(
            "{}\n{}\n",
            r#"{"status":"failed","row_count":-1}"#, GOOD_REPORT
        );
        let report = parse_last_json(&stdout).unwrap();
        assert_eq!(report.status, CountStatus::Success);
    }

    #[test]
    fn test_parse_skips_invalid_last_candidate() {
        let stdout = format!("{}\n{{\"unterminated\n", GOOD_REPORT);
        let report = parse_last_json(&stdout).unwrap();
        assert_eq!(report.row_count, 1234);
    }

    #[test]
    fn test_parse_indented_json_is_not_a_candidate() {
        // Only column-0 braces start a document.
        let stdout = "  {\"status\":\"success\",\"row_count\":5}\n";
        assert!(parse_last_json(stdout).is_none());
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_last_json("no json here\n").is_none());
        assert!(parse_last_json("").is_none());
    }

    #[test]
    fn test_advisory_status_mapping() {
        assert_eq!(advisory_status(Some(0)), CountStatus::Success);
        assert_eq!(advisory_status(Some(2)), CountStatus::Partial);
        assert_eq!(advisory_status(Some(1)), CountStatus::Failed);
        assert_eq!(advisory_status(None), CountStatus::Failed);
    }

    #[test]
    fn test_tail_snaps_to_char_boundary() {
        let s = "αβγδε";
        let t = tail(s, 3);
        assert!(t.len() <= 3);
        assert!(s.ends_with(t));
    }

    #[test]
    fn test_command_arguments() {
        let driver = CounterDriver {
            jar: PathBuf::from("/opt/tally/hdfs-counter.jar"),
            java_home: Some(PathBuf::from("/usr/lib/jvm/java-11")),
            hadoop_conf_dir: Some(PathBuf::from("/etc/hadoop/conf")),
            timeout: None,
        };
        let mut j = job();
        j.delimiter = Some("\u{1}".to_string());
        let cmd = driver.command(&j);
        let std_cmd = cmd.as_std();

        assert!(std_cmd
            .get_program()
            .to_string_lossy()
            .ends_with("java-11/bin/java"));
        let args: Vec<String> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "-jar");
        assert_eq!(args[1], "/opt/tally/hdfs-counter.jar");
        assert!(args.contains(&"--path".to_string()));
        assert!(args.contains(&"/warehouse/ods/orders/dt=20260116".to_string()));
        assert!(args.contains(&"--format".to_string()));
        assert!(args.contains(&"orc".to_string()));
        assert!(args.contains(&"--threads".to_string()));
        assert!(args.contains(&"8".to_string()));
        assert!(args.contains(&"--delimiter".to_string()));
        assert!(args.contains(&"--hadoop-conf".to_string()));
    }

    #[test]
    fn test_command_omits_optional_flags() {
        let driver = CounterDriver {
            jar: PathBuf::from("/opt/tally/hdfs-counter.jar"),
            java_home: None,
            hadoop_conf_dir: None,
            timeout: None,
        };
        let cmd = driver.command(&job());
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(!args.contains(&"--delimiter".to_string()));
        assert!(!args.contains(&"--hadoop-conf".to_string()));
        assert_eq!(cmd.as_std().get_program().to_string_lossy(), "java");
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;

        fn sh(script: &str) -> Command {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(script);
            cmd
        }

        #[tokio::test]
        async fn test_successful_run() {
            let script = format!("echo 'INFO scanning'; echo '{}'", GOOD_REPORT);
            let report =
                run_counter(sh(&script), "/warehouse/t", None, &CancellationToken::new()).await;
            assert_eq!(report.status, CountStatus::Success);
            assert_eq!(report.row_count, 1234);
        }

        #[tokio::test]
        async fn test_json_wins_over_exit_code() {
            // Exit 1 with a valid success report: the report is trusted.
            let script = format!("echo '{}'; exit 1", GOOD_REPORT);
            let report =
                run_counter(sh(&script), "/warehouse/t", None, &CancellationToken::new()).await;
            assert_eq!(report.status, CountStatus::Success);
        }

        #[tokio::test]
        async fn test_failure_without_json_captures_stderr() {
            let script = "echo 'GC overhead limit exceeded' >&2; exit 1";
            let report =
                run_counter(sh(script), "/warehouse/t", None, &CancellationToken::new()).await;
            assert_eq!(report.status, CountStatus::Failed);
            assert_eq!(report.row_count, -1);
            assert!(report.errors[0].message.contains("GC overhead limit"));
            assert_eq!(report.errors[0].path, "/warehouse/t");
        }

        #[tokio::test]
        async fn test_timeout_kills_child() {
            let started = Instant::now();
            let report = run_counter(
                sh("sleep 30"),
                "/warehouse/t",
                Some(Duration::from_millis(200)),
                &CancellationToken::new(),
            )
            .await;
            assert_eq!(report.status, CountStatus::Failed);
            assert!(report.errors[0].message.contains("timed out"));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_cancellation_kills_child() {
            let cancel = CancellationToken::new();
            cancel.cancel();
            let report = run_counter(sh("sleep 30"), "/warehouse/t", None, &cancel).await;
            assert_eq!(report.status, CountStatus::Failed);
            assert!(report.errors[0].message.contains("cancelled"));
        }

        #[tokio::test]
        async fn test_launch_failure_is_contained() {
            let report = run_counter(
                Command::new("/nonexistent/binary"),
                "/warehouse/t",
                None,
                &CancellationToken::new(),
            )
            .await;
            assert_eq!(report.status, CountStatus::Failed);
            assert!(report.errors[0].message.contains("failed to launch"));
        }
    }
}
