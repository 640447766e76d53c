//! AMD GPU package power histograms from hwmon.
//!
//! Only hwmon devices named `amdgpu` are covered. The driver exposes an
//! instantaneous power reading, so the energy total is integrated from it.

use log::warn;

use super::rapl::POWER_STYLE;
use super::{Collector, acquire_all};
use crate::bucket::GPU_POWER;
use crate::energy::EnergyUsage;
use crate::error::SegmentError;
use crate::render::{DeviceReport, Distribution};
use crate::segment::{Access, GpuSegment};
use crate::sensors::{GpuPowerSensor, device_ids};

const UW_TO_W: f64 = 1e-6;

pub struct GpuStats<S> {
    sensor: S,
    segments: Vec<GpuSegment>,
}

impl<S: GpuPowerSensor> GpuStats<S> {
    /// Enumerate hwmon devices, keep the amdgpu ones and create (writer) or
    /// open (reader) their segments. Segment ids are hwmon numbers.
    pub fn new(sensor: S, namespace: &str, access: Access) -> Result<Self, SegmentError> {
        let ids: Vec<u32> = device_ids(|hwmon| sensor.hwmon_exists(hwmon))
            .filter(|&hwmon| sensor.is_amdgpu(hwmon))
            .collect();
        let segments = acquire_all(namespace, &GPU_POWER, ids, access)?;
        Ok(Self { sensor, segments })
    }

    pub fn segments(&self) -> &[GpuSegment] {
        &self.segments
    }
}

impl<S: GpuPowerSensor> Collector for GpuStats<S> {
    fn name(&self) -> &'static str {
        "amdgpu"
    }

    fn device_count(&self) -> usize {
        self.segments.len()
    }

    fn update(&mut self, tick_secs: u32, weight: u32) {
        let elapsed = u64::from(tick_secs) * u64::from(weight);
        for segment in &self.segments {
            let Some(writer) = segment.writer() else {
                return;
            };
            let hwmon = writer.record().device_id();
            let power_uw = match self.sensor.power_uw(hwmon) {
                Ok(uw) => uw,
                Err(e) => {
                    warn!("amdgpu: hwmon {hwmon}: skipping sample: {e}");
                    continue;
                }
            };
            let watts = power_uw as f64 * UW_TO_W;
            if GPU_POWER.saturates(watts) {
                warn!(
                    "amdgpu: hwmon {hwmon}: {watts:.1} W, histogram ends at {} W",
                    GPU_POWER.max_value
                );
            }
            writer.add_ticks(GPU_POWER.value_to_index(watts), weight);
            writer.set_last_value(watts);
            writer.add_elapsed(elapsed);
            // µW * s = µJ
            writer.add_energy(power_uw.saturating_mul(elapsed));
        }
    }

    fn reports(&self) -> Vec<DeviceReport> {
        self.segments
            .iter()
            .map(|segment| {
                let record = segment.record();
                let hwmon = record.device_id();
                DeviceReport {
                    metric: self.name(),
                    device_id: hwmon,
                    title: format!("amdgpu-hwmon {hwmon}"),
                    unit: "W",
                    distribution: Distribution::from_counts(&GPU_POWER, &record.counts(), 1.0),
                    elapsed_secs: record.elapsed_secs(),
                    last_value: Some(record.last_value()),
                    energy: Some(EnergyUsage::from(record.energy())),
                    style: POWER_STYLE,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::EnergyTotal;
    use crate::render::{Verbosity, write_text};
    use std::cell::Cell;
    use std::io;

    fn namespace() -> String {
        format!("cpu_stats_gpu_{}", uuid::Uuid::new_v4().simple())
    }

    /// hwmon0 is a CPU temperature sensor, hwmon1 and hwmon2 are GPUs.
    struct FakeHwmon {
        power_uw: Cell<u64>,
    }

    impl GpuPowerSensor for FakeHwmon {
        fn hwmon_exists(&self, hwmon: u32) -> bool {
            hwmon < 3
        }
        fn is_amdgpu(&self, hwmon: u32) -> bool {
            hwmon > 0
        }
        fn power_uw(&self, _hwmon: u32) -> io::Result<u64> {
            Ok(self.power_uw.get())
        }
    }

    fn fake(power_uw: u64) -> FakeHwmon {
        FakeHwmon {
            power_uw: Cell::new(power_uw),
        }
    }

    #[test]
    fn only_amdgpu_devices_get_segments() {
        let stats = GpuStats::new(fake(0), &namespace(), Access::Owned).unwrap();
        let ids: Vec<u32> = stats
            .segments()
            .iter()
            .map(|s| s.record().device_id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(stats.segments()[0].name().ends_with("_p_amdgpu_001"));
    }

    #[test]
    fn power_reading_is_bucketed_and_integrated() {
        let mut stats = GpuStats::new(fake(35_000_000), &namespace(), Access::Owned).unwrap();
        stats.update(2, 1);
        stats.update(2, 2);
        let rec = stats.segments()[0].record();
        // 35 W -> floor(35 / 2.5) = 14
        assert_eq!(rec.ticks(14), 3);
        assert_eq!(rec.last_value(), 35.0);
        assert_eq!(rec.elapsed_secs(), 6);
        assert_eq!(rec.energy(), EnergyTotal::new(210_000_000, 0));
    }

    #[test]
    fn five_hundred_watts_hits_last_bucket() {
        let mut stats = GpuStats::new(fake(500_000_000), &namespace(), Access::Owned).unwrap();
        stats.update(2, 1);
        let rec = stats.segments()[1].record();
        assert_eq!(rec.ticks(GPU_POWER.last_index()), 1);
        assert_eq!(rec.total_ticks(), 1);
    }

    #[test]
    fn reader_renders_writer_state() {
        let ns = namespace();
        let mut w = GpuStats::new(fake(10_000_000), &ns, Access::Owned).unwrap();
        w.update(2, 1);
        let r = GpuStats::new(fake(0), &ns, Access::Borrowed).unwrap();
        let reports = r.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].title, "amdgpu-hwmon 2");

        let mut out = Vec::new();
        write_text(&mut out, &reports[0], Verbosity::Short).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("amdgpu-hwmon 1, samples=1"));
        // 10 W lands in 10..12.5, shown at its center
        assert!(text.contains("average power: ~11.25 W, power over last interval: 10.00 W"));
        assert!(text.contains("used energy:   ~20 Ws, ~0.000 kWh"));
    }
}
