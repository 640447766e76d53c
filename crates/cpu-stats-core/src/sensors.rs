//! Raw sensor readings from the Linux device-class filesystem.
//!
//! Each metric kind consumes one small trait so the samplers can be driven by
//! a fake in tests. [`Sysfs`] implements all of them against a sysfs root
//! (normally `/sys`):
//!
//! - cpufreq: `devices/system/cpu/cpuN/{online,cpufreq/*}` (kHz)
//! - RAPL: `devices/virtual/powercap/intel-rapl/intel-rapl:N/*` (µJ)
//! - amdgpu: `class/hwmon/hwmonN/{name,power1_input}` (µW)

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Per-CPU clock frequency in kHz.
pub trait CpuFreqSensor {
    fn cpu_exists(&self, cpu: u32) -> bool;
    /// cpu0 cannot be taken offline and has no `online` file.
    fn online(&self, cpu: u32) -> bool;
    fn min_freq_khz(&self, cpu: u32) -> io::Result<f64>;
    fn max_freq_khz(&self, cpu: u32) -> io::Result<f64>;
    /// Current frequency; 0 for an offline CPU.
    fn cur_freq_khz(&self, cpu: u32) -> io::Result<f64>;
}

/// Per-package RAPL energy counter in µJ.
pub trait RaplSensor {
    fn package_exists(&self, pkg: u32) -> bool;
    fn energy_uj(&self, pkg: u32) -> io::Result<u64>;
    /// Value at which `energy_uj` wraps back to zero.
    fn max_energy_range_uj(&self, pkg: u32) -> io::Result<u64>;
}

/// Per-hwmon GPU package power in µW.
pub trait GpuPowerSensor {
    fn hwmon_exists(&self, hwmon: u32) -> bool;
    fn is_amdgpu(&self, hwmon: u32) -> bool;
    fn power_uw(&self, hwmon: u32) -> io::Result<u64>;
}

/// Ids `0, 1, 2, ...` up to (not including) the first one that does not
/// exist. Devices are enumerated once, at startup.
pub fn device_ids(exists: impl Fn(u32) -> bool) -> impl Iterator<Item = u32> {
    (0..).take_while(move |&id| exists(id))
}

/// Read one whitespace-trimmed value from a sysfs attribute.
fn read_value<T: FromStr>(path: &Path) -> io::Result<T> {
    let raw = std::fs::read_to_string(path)?;
    let v = raw.trim();
    v.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unparsable value '{v}' in {}", path.display()),
        )
    })
}

/// Sensors backed by a sysfs tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysfs {
    root: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl Sysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cpu_dir(&self, cpu: u32) -> PathBuf {
        self.root.join(format!("devices/system/cpu/cpu{cpu}"))
    }

    fn rapl_dir(&self, pkg: u32) -> PathBuf {
        self.root
            .join(format!("devices/virtual/powercap/intel-rapl/intel-rapl:{pkg}"))
    }

    fn hwmon_dir(&self, hwmon: u32) -> PathBuf {
        self.root.join(format!("class/hwmon/hwmon{hwmon}"))
    }
}

impl CpuFreqSensor for Sysfs {
    fn cpu_exists(&self, cpu: u32) -> bool {
        self.cpu_dir(cpu).exists()
    }

    fn online(&self, cpu: u32) -> bool {
        if cpu == 0 {
            return true;
        }
        read_value::<i32>(&self.cpu_dir(cpu).join("online")).is_ok_and(|v| v != 0)
    }

    fn min_freq_khz(&self, cpu: u32) -> io::Result<f64> {
        read_value(&self.cpu_dir(cpu).join("cpufreq/cpuinfo_min_freq"))
    }

    fn max_freq_khz(&self, cpu: u32) -> io::Result<f64> {
        read_value(&self.cpu_dir(cpu).join("cpufreq/cpuinfo_max_freq"))
    }

    fn cur_freq_khz(&self, cpu: u32) -> io::Result<f64> {
        if !self.online(cpu) {
            return Ok(0.0);
        }
        read_value(&self.cpu_dir(cpu).join("cpufreq/scaling_cur_freq"))
    }
}

impl RaplSensor for Sysfs {
    fn package_exists(&self, pkg: u32) -> bool {
        self.rapl_dir(pkg).exists()
    }

    fn energy_uj(&self, pkg: u32) -> io::Result<u64> {
        read_value(&self.rapl_dir(pkg).join("energy_uj"))
    }

    fn max_energy_range_uj(&self, pkg: u32) -> io::Result<u64> {
        read_value(&self.rapl_dir(pkg).join("max_energy_range_uj"))
    }
}

impl GpuPowerSensor for Sysfs {
    fn hwmon_exists(&self, hwmon: u32) -> bool {
        self.hwmon_dir(hwmon).exists()
    }

    fn is_amdgpu(&self, hwmon: u32) -> bool {
        std::fs::read_to_string(self.hwmon_dir(hwmon).join("name"))
            .is_ok_and(|name| name.trim() == "amdgpu")
    }

    fn power_uw(&self, hwmon: u32) -> io::Result<u64> {
        read_value(&self.hwmon_dir(hwmon).join("power1_input"))
    }
}
