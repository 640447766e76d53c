//! Collectors: one per metric kind, each owning the segments of its devices.
//!
//! A collector is built in one of two modes, matching [`Access`]:
//! - writer (`Owned`): creates one segment per discovered device and feeds
//!   it from its sensor on every [`Collector::update`],
//! - reader (`Borrowed`): attaches to the writer's segments and only renders.
//!
//! Devices are enumerated once at construction.

pub mod freq;
pub mod gpu;
pub mod rapl;

pub use freq::FreqStats;
pub use gpu::GpuStats;
pub use rapl::RaplStats;

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use crate::bucket::HistogramSpec;
use crate::config::StatsConfig;
use crate::error::SegmentError;
use crate::render::{self, DeviceReport, Verbosity};
use crate::segment::{Access, Segment};
use crate::sensors::Sysfs;

/// Common interface of all collectors.
pub trait Collector {
    /// Short metric name used in logs and JSON output.
    fn name(&self) -> &'static str;

    /// Number of devices (segments) this collector covers.
    fn device_count(&self) -> usize;

    /// Take one sample per device.
    ///
    /// `tick_secs` is the nominal sampling interval, `weight` the number of
    /// intervals this sample stands for (1 unless ticks were missed). A
    /// reader-mode collector ignores the call.
    fn update(&mut self, tick_secs: u32, weight: u32);

    /// Current state of every device.
    fn reports(&self) -> Vec<DeviceReport>;

    /// Write the text report of every device.
    fn render(&self, out: &mut dyn Write, verbosity: Verbosity) -> io::Result<()> {
        for report in self.reports() {
            render::write_text(out, &report, verbosity)?;
        }
        Ok(())
    }
}

/// The metric kinds a collector can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// RAPL package power.
    Rapl,
    /// Per-CPU clock frequency.
    CpuFreq,
    /// AMD GPU package power.
    Gpu,
}

impl MetricKind {
    /// All kinds, in report order.
    pub const ALL: [MetricKind; 3] = [MetricKind::Rapl, MetricKind::CpuFreq, MetricKind::Gpu];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rapl => "rapl",
            Self::CpuFreq => "freq",
            Self::Gpu => "gpu",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rapl" | "pkg" | "power" => Ok(Self::Rapl),
            "freq" | "cpufreq" | "cpu" => Ok(Self::CpuFreq),
            "gpu" | "amdgpu" => Ok(Self::Gpu),
            other => Err(format!(
                "unknown metric '{other}'. Options: rapl, freq, gpu"
            )),
        }
    }
}

/// Build the sysfs-backed collector for `kind`.
pub fn open(
    kind: MetricKind,
    config: &StatsConfig,
    access: Access,
) -> Result<Box<dyn Collector>, SegmentError> {
    let sysfs = Sysfs::new(&config.sysfs_root);
    let ns = config.namespace.as_str();
    Ok(match kind {
        MetricKind::Rapl => Box::new(RaplStats::new(sysfs, ns, access)?),
        MetricKind::CpuFreq => Box::new(FreqStats::new(sysfs, ns, access)?),
        MetricKind::Gpu => Box::new(GpuStats::new(sysfs, ns, access)?),
    })
}

/// Build the collectors for `kinds`, in order. On failure the collectors
/// built so far are dropped, which removes their segments again.
pub fn open_all(
    kinds: &[MetricKind],
    config: &StatsConfig,
    access: Access,
) -> Result<Vec<Box<dyn Collector>>, SegmentError> {
    kinds
        .iter()
        .map(|&kind| open(kind, config, access))
        .collect()
}

/// Acquire one segment per device id. Stops at the first failure; segments
/// already created are dropped (and unlinked) on the way out.
fn acquire_all<const N: usize>(
    namespace: &str,
    spec: &HistogramSpec,
    ids: impl IntoIterator<Item = u32>,
    access: Access,
) -> Result<Vec<Segment<N>>, SegmentError> {
    ids.into_iter()
        .map(|id| Segment::acquire(namespace, spec, id, access))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{CPU_FREQ, CPU_FREQ_BUCKETS};
    use std::fs;
    use std::path::Path;

    fn namespace() -> String {
        format!("cpu_stats_coll_{}", uuid::Uuid::new_v4().simple())
    }

    fn write(root: &Path, rel: &str, value: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, value).unwrap();
    }

    // -----------------------------------------------------------------------
    // MetricKind
    // -----------------------------------------------------------------------

    #[test]
    fn metric_kind_parses_aliases() {
        assert_eq!("rapl".parse::<MetricKind>().unwrap(), MetricKind::Rapl);
        assert_eq!("FREQ".parse::<MetricKind>().unwrap(), MetricKind::CpuFreq);
        assert_eq!(" amdgpu ".parse::<MetricKind>().unwrap(), MetricKind::Gpu);
        assert!("disk".parse::<MetricKind>().is_err());
    }

    #[test]
    fn metric_kind_display_round_trips() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.to_string().parse::<MetricKind>().unwrap(), kind);
        }
    }

    // -----------------------------------------------------------------------
    // acquire_all
    // -----------------------------------------------------------------------

    #[test]
    fn partial_failure_removes_created_segments() {
        let ns = namespace();
        // Device 2 is already taken; 0 and 1 get created, then rolled back.
        let _blocker = Segment::<CPU_FREQ_BUCKETS>::create(&ns, &CPU_FREQ, 2).unwrap();
        let err = acquire_all::<CPU_FREQ_BUCKETS>(&ns, &CPU_FREQ, 0..4, Access::Owned)
            .unwrap_err();
        assert!(err.is_already_running());
        for id in 0..2 {
            let open = Segment::<CPU_FREQ_BUCKETS>::open(&ns, &CPU_FREQ, id);
            assert!(open.unwrap_err().is_producer_absent());
        }
    }

    // -----------------------------------------------------------------------
    // open_all
    // -----------------------------------------------------------------------

    #[test]
    fn open_all_over_fake_sysfs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write(root, "devices/system/cpu/cpu0/cpufreq/cpuinfo_min_freq", "800000\n");
        write(root, "devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq", "4000000\n");
        write(root, "devices/system/cpu/cpu0/cpufreq/scaling_cur_freq", "2000000\n");
        let rapl = "devices/virtual/powercap/intel-rapl/intel-rapl:0";
        write(root, &format!("{rapl}/energy_uj"), "1000\n");
        write(root, &format!("{rapl}/max_energy_range_uj"), "1000000000\n");

        let config = StatsConfig {
            namespace: namespace(),
            sysfs_root: root.to_path_buf(),
        };
        let mut writers = open_all(&MetricKind::ALL, &config, Access::Owned).unwrap();
        let counts: Vec<usize> = writers.iter().map(|c| c.device_count()).collect();
        assert_eq!(counts, vec![1, 1, 0]);

        for c in &mut writers {
            c.update(2, 1);
        }

        let readers = open_all(&MetricKind::ALL, &config, Access::Borrowed).unwrap();
        let names: Vec<&str> = readers.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["rapl", "cpufreq", "amdgpu"]);
        let freq = readers[1].reports();
        assert_eq!(freq[0].distribution.total_ticks, 1);

        // a second writer is refused while the first one lives
        let err = open_all(&MetricKind::ALL, &config, Access::Owned).err().unwrap();
        assert!(err.is_already_running());

        drop(readers);
        drop(writers);
        let err = open(MetricKind::CpuFreq, &config, Access::Borrowed).err().unwrap();
        assert!(err.is_producer_absent());
    }
}
