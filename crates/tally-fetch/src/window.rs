//! Query-window planning against the stored watermark.
//!
//! Windows are half-open `[start, end)`. The overlap rescans the tail of the
//! previous window so completions that landed late in the upstream log are
//! never skipped; dedup upstream of job construction absorbs the re-reads.

use chrono::{DateTime, Duration, FixedOffset, Timelike};
use tally_core::Watermark;

/// Half-open scan window in the configured timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub enabled: bool,
    pub overlap_seconds: u64,
    /// Catch-up cap; a run never scans more than this. Non-positive
    /// disables the cap.
    pub max_window_hours: f64,
    /// Window size when no watermark exists or the watermark is disabled.
    pub fallback_lookback_hours: f64,
    /// `--watermark-init-now`: on a missing watermark, persist `now` and do
    /// no work this run.
    pub init_now: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPlan {
    Run(Window),
    /// Watermark is enabled but absent and initialization was requested:
    /// write `now`, execute zero jobs.
    InitializeOnly,
}

/// Compute the scan window for this run. `now` must already carry the
/// configured offset; it is truncated to whole seconds here.
pub fn plan_window(
    now: DateTime<FixedOffset>,
    watermark: Option<&Watermark>,
    opts: &WindowOptions,
) -> WindowPlan {
    let now = now.with_nanosecond(0).unwrap_or(now);
    let fallback = hours(opts.fallback_lookback_hours);

    if !opts.enabled {
        return WindowPlan::Run(Window {
            start: now - fallback,
            end: now,
        });
    }

    match watermark {
        Some(wm) => {
            let start = wm.last_end_time - Duration::seconds(opts.overlap_seconds as i64);
            let mut end = now;
            if opts.max_window_hours > 0.0 {
                let cap = hours(opts.max_window_hours);
                if end - start > cap {
                    end = start + cap;
                }
            }
            WindowPlan::Run(Window { start, end })
        }
        None if opts.init_now => WindowPlan::InitializeOnly,
        None => WindowPlan::Run(Window {
            start: now - fallback,
            end: now,
        }),
    }
}

fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cst(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
    }

    fn opts() -> WindowOptions {
        WindowOptions {
            enabled: true,
            overlap_seconds: 600,
            max_window_hours: 24.0,
            fallback_lookback_hours: 24.0,
            init_now: false,
        }
    }

    fn wm(at: DateTime<FixedOffset>) -> Watermark {
        Watermark {
            last_end_time: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_normal_hourly_run() {
        // Watermark 12:00, now 13:05, overlap 600s.
        let plan = plan_window(
            cst(2026, 1, 17, 13, 5, 0),
            Some(&wm(cst(2026, 1, 17, 12, 0, 0))),
            &opts(),
        );
        assert_eq!(
            plan,
            WindowPlan::Run(Window {
                start: cst(2026, 1, 17, 11, 50, 0),
                end: cst(2026, 1, 17, 13, 5, 0),
            })
        );
    }

    #[test]
    fn test_catch_up_is_bounded() {
        // Three days behind: the window is capped at 24h from the
        // overlap-adjusted start, not stretched to now.
        let plan = plan_window(
            cst(2026, 1, 17, 13, 0, 0),
            Some(&wm(cst(2026, 1, 14, 0, 0, 0))),
            &opts(),
        );
        assert_eq!(
            plan,
            WindowPlan::Run(Window {
                start: cst(2026, 1, 13, 23, 50, 0),
                end: cst(2026, 1, 14, 23, 50, 0),
            })
        );
    }

    #[test]
    fn test_consecutive_windows_have_no_gap() {
        // Run 1 ends at e1; run 2 starts at e1 - overlap <= e1.
        let o = opts();
        let plan1 = plan_window(
            cst(2026, 1, 17, 13, 0, 0),
            Some(&wm(cst(2026, 1, 14, 0, 0, 0))),
            &o,
        );
        let WindowPlan::Run(w1) = plan1 else {
            panic!("expected a window");
        };
        let plan2 = plan_window(cst(2026, 1, 17, 14, 0, 0), Some(&wm(w1.end)), &o);
        let WindowPlan::Run(w2) = plan2 else {
            panic!("expected a window");
        };
        assert!(w2.start <= w1.end);
    }

    #[test]
    fn test_cap_disabled_when_non_positive() {
        let mut o = opts();
        o.max_window_hours = 0.0;
        let plan = plan_window(
            cst(2026, 1, 17, 13, 0, 0),
            Some(&wm(cst(2026, 1, 10, 0, 0, 0))),
            &o,
        );
        assert_eq!(
            plan,
            WindowPlan::Run(Window {
                start: cst(2026, 1, 9, 23, 50, 0),
                end: cst(2026, 1, 17, 13, 0, 0),
            })
        );
    }

    #[test]
    fn test_cold_start_uses_fallback_lookback() {
        let plan = plan_window(cst(2026, 1, 17, 13, 0, 0), None, &opts());
        assert_eq!(
            plan,
            WindowPlan::Run(Window {
                start: cst(2026, 1, 16, 13, 0, 0),
                end: cst(2026, 1, 17, 13, 0, 0),
            })
        );
    }

    #[test]
    fn test_init_now_requests_initialization() {
        let mut o = opts();
        o.init_now = true;
        assert_eq!(
            plan_window(cst(2026, 1, 17, 12, 0, 0), None, &o),
            WindowPlan::InitializeOnly
        );
    }

    #[test]
    fn test_init_now_ignored_when_watermark_present() {
        let mut o = opts();
        o.init_now = true;
        let plan = plan_window(
            cst(2026, 1, 17, 13, 5, 0),
            Some(&wm(cst(2026, 1, 17, 12, 0, 0))),
            &o,
        );
        assert!(matches!(plan, WindowPlan::Run(_)));
    }

    #[test]
    fn test_disabled_watermark_ignores_stored_value() {
        let mut o = opts();
        o.enabled = false;
        o.fallback_lookback_hours = 2.0;
        let plan = plan_window(
            cst(2026, 1, 17, 13, 0, 0),
            Some(&wm(cst(2026, 1, 1, 0, 0, 0))),
            &o,
        );
        assert_eq!(
            plan,
            WindowPlan::Run(Window {
                start: cst(2026, 1, 17, 11, 0, 0),
                end: cst(2026, 1, 17, 13, 0, 0),
            })
        );
    }

    #[test]
    fn test_fractional_lookback_hours() {
        let mut o = opts();
        o.enabled = false;
        o.fallback_lookback_hours = 0.5;
        let plan = plan_window(cst(2026, 1, 17, 13, 0, 0), None, &o);
        assert_eq!(
            plan,
            WindowPlan::Run(Window {
                start: cst(2026, 1, 17, 12, 30, 0),
                end: cst(2026, 1, 17, 13, 0, 0),
            })
        );
    }

    #[test]
    fn test_subsecond_now_is_truncated() {
        let now = cst(2026, 1, 17, 13, 0, 0) + Duration::milliseconds(250);
        let plan = plan_window(now, None, &opts());
        let WindowPlan::Run(w) = plan else {
            panic!("expected a window");
        };
        assert_eq!(w.end, cst(2026, 1, 17, 13, 0, 0));
    }
}
