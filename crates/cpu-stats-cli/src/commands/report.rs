//! `cpu-stats report`: print what a running daemon has collected.

use std::io::{self, Write};

use cpu_stats_core::{Access, DeviceReport, MetricKind, StatsConfig, Verbosity, collectors};

/// Run the report command; returns the process exit code.
pub fn run(config: &StatsConfig, metrics: Option<&str>, short: bool, json: bool) -> i32 {
    let kinds = match super::parse_metrics(metrics) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("Error: {e}");
            return 2;
        }
    };
    let verbosity = if short {
        Verbosity::Short
    } else {
        Verbosity::Full
    };

    let stdout = io::stdout();
    let stderr = io::stderr();
    match write_report(
        &mut stdout.lock(),
        &mut stderr.lock(),
        config,
        &kinds,
        verbosity,
        json,
    ) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error writing report: {e}");
            1
        }
    }
}

/// Render every selected metric kind. A kind whose segments cannot be opened
/// is reported on `err` and skipped.
pub fn write_report(
    out: &mut dyn Write,
    err: &mut dyn Write,
    config: &StatsConfig,
    kinds: &[MetricKind],
    verbosity: Verbosity,
    json: bool,
) -> io::Result<()> {
    let mut reports: Vec<DeviceReport> = Vec::new();
    for &kind in kinds {
        let collector = match collectors::open(kind, config, Access::Borrowed) {
            Ok(c) => c,
            Err(e) => {
                writeln!(err, "{kind}: {e}")?;
                if e.is_producer_absent() {
                    writeln!(err, "Is the daemon running?")?;
                }
                continue;
            }
        };
        if json {
            reports.extend(collector.reports());
        } else {
            collector.render(out, verbosity)?;
        }
    }

    if json {
        let doc = serde_json::json!({
            "version": cpu_stats_core::VERSION,
            "namespace": config.namespace,
            "devices": reports,
        });
        let text = serde_json::to_string_pretty(&doc).map_err(io::Error::other)?;
        writeln!(out, "{text}")?;
    }
    Ok(())
}
