pub mod daemon;
pub mod report;

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use cpu_stats_core::MetricKind;

/// Install `env_logger`. `RUST_LOG` overrides `default_level`; with a
/// `log_file` output is appended there instead of stderr.
pub fn init_logging(default_level: &str, log_file: Option<&Path>) -> io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder.format_timestamp_secs();
    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    // A second init (tests) is harmless.
    let _ = builder.try_init();
    Ok(())
}

/// Parse a comma-separated metric list. `None` or `"all"` selects every
/// kind; duplicates are dropped, order is kept.
pub fn parse_metrics(s: Option<&str>) -> Result<Vec<MetricKind>, String> {
    let Some(list) = s else {
        return Ok(MetricKind::ALL.to_vec());
    };
    if list.trim() == "all" {
        return Ok(MetricKind::ALL.to_vec());
    }
    let mut kinds = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let kind: MetricKind = name.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(format!("no metrics selected in '{list}'"));
    }
    Ok(kinds)
}
