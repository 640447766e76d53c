//! # cpu-stats-core
//!
//! **Long-running histograms of CPU frequency and package power, shared
//! between processes.**
//!
//! A single writer samples sysfs at a fixed interval and accumulates, per
//! device, how much time was spent in each frequency or power bucket. The
//! histograms live in named POSIX shared memory so any number of readers can
//! render them at any time without talking to the writer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cpu_stats_core::{Access, Collector, MetricKind, StatsConfig, Verbosity, collectors};
//!
//! // Attach to a running writer's segments and print them
//! let config = StatsConfig::default();
//! let freq = collectors::open(MetricKind::CpuFreq, &config, Access::Borrowed)?;
//! freq.render(&mut std::io::stdout(), Verbosity::Full)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! Sensors (sysfs) → Collectors → Segments (shm) → Renderer
//!
//! Three metric kinds:
//! - **cpufreq**: per CPU, 200 MHz buckets up to 7 GHz, values rounded.
//! - **rapl**: per package, 2.5 W buckets up to 250 W, derived from the
//!   energy counter.
//! - **amdgpu**: per hwmon device, 2.5 W buckets up to 350 W.
//!
//! A segment is created exclusively by the writer, so a second writer fails
//! with [`SegmentError::AlreadyRunning`]. Readers never create segments and
//! never remove them.

pub mod bucket;
pub mod collectors;
pub mod config;
pub mod energy;
pub mod error;
pub mod render;
pub mod segment;
pub mod sensors;
pub mod shm;

pub use bucket::{Bucketing, CPU_FREQ, GPU_POWER, HistogramSpec, RAPL_POWER};
pub use collectors::{Collector, FreqStats, GpuStats, MetricKind, RaplStats};
pub use config::{DaemonConfig, StatsConfig};
pub use energy::{EnergyCounter, EnergyTotal, EnergyUsage, counter_delta};
pub use error::SegmentError;
pub use render::{DeviceReport, Distribution, Row, Verbosity};
pub use segment::{Access, Segment, SegmentRecord, segment_name};
pub use sensors::{CpuFreqSensor, GpuPowerSensor, RaplSensor, Sysfs};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
