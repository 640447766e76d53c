//! Runtime configuration for writers and readers.

use std::path::PathBuf;

/// Default shared-memory namespace, the first component of segment names.
pub const DEFAULT_NAMESPACE: &str = "cpu_stats";
/// Default sampling interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u32 = 2;
/// Accepted sampling intervals in seconds.
pub const INTERVAL_RANGE: std::ops::RangeInclusive<u32> = 1..=60;
/// Default PID file of the writer when running as root.
pub const DEFAULT_PID_FILE: &str = "/run/cpu-stats-daemon.pid";

/// Settings shared by writer and reader: where segments live and where
/// sensors are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsConfig {
    /// Prefix of every segment name. Writer and readers must agree.
    pub namespace: String,
    /// Root of the sysfs tree, `/sys` outside of tests.
    pub sysfs_root: PathBuf,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            sysfs_root: PathBuf::from("/sys"),
        }
    }
}

/// Writer process settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub interval_secs: u32,
    /// Stay attached to the terminal instead of detaching.
    pub foreground: bool,
    pub pid_file: PathBuf,
    pub stats: StatsConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            foreground: false,
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            stats: StatsConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Reject settings the writer cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if !INTERVAL_RANGE.contains(&self.interval_secs) {
            return Err(format!(
                "sampling interval must be within {}..={} seconds, got {}",
                INTERVAL_RANGE.start(),
                INTERVAL_RANGE.end(),
                self.interval_secs
            ));
        }
        if self.stats.namespace.is_empty() || self.stats.namespace.contains('/') {
            return Err(format!(
                "invalid shared memory namespace '{}'",
                self.stats.namespace
            ));
        }
        Ok(())
    }
}
