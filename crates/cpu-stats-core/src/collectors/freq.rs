//! Per-CPU clock frequency histograms.

use log::warn;

use super::{Collector, acquire_all};
use crate::bucket::CPU_FREQ;
use crate::error::SegmentError;
use crate::render::{DeviceReport, Distribution, ReportStyle};
use crate::segment::{Access, FreqSegment};
use crate::sensors::{CpuFreqSensor, device_ids};

const KHZ_TO_MHZ: f64 = 1e-3;

const STYLE: ReportStyle = ReportStyle {
    value_header: "f/MHz",
    value_precision: 0,
    average_label: "average frequency",
    average_precision: 0,
};

/// Frequency collector over every CPU the sensor reports.
pub struct FreqStats<S> {
    sensor: S,
    segments: Vec<FreqSegment>,
}

impl<S: CpuFreqSensor> FreqStats<S> {
    /// Enumerate CPUs and create (writer) or open (reader) their segments.
    ///
    /// A writer also records each CPU's rated minimum and maximum frequency.
    pub fn new(sensor: S, namespace: &str, access: Access) -> Result<Self, SegmentError> {
        let ids: Vec<u32> = device_ids(|cpu| sensor.cpu_exists(cpu)).collect();
        let segments = acquire_all(namespace, &CPU_FREQ, ids, access)?;
        for segment in &segments {
            let Some(writer) = segment.writer() else {
                continue;
            };
            let cpu = writer.record().device_id();
            let read = |what: &str, value: std::io::Result<f64>| {
                value.unwrap_or_else(|e| {
                    warn!("cpufreq: cpu {cpu}: cannot read {what} frequency: {e}");
                    0.0
                })
            };
            let min = read("min", sensor.min_freq_khz(cpu));
            let max = read("max", sensor.max_freq_khz(cpu));
            writer.set_limits(min, max);
        }
        Ok(Self { sensor, segments })
    }

    pub fn segments(&self) -> &[FreqSegment] {
        &self.segments
    }
}

impl<S: CpuFreqSensor> Collector for FreqStats<S> {
    fn name(&self) -> &'static str {
        "cpufreq"
    }

    fn device_count(&self) -> usize {
        self.segments.len()
    }

    fn update(&mut self, tick_secs: u32, weight: u32) {
        for segment in &self.segments {
            let Some(writer) = segment.writer() else {
                return;
            };
            let cpu = writer.record().device_id();
            let khz = match self.sensor.cur_freq_khz(cpu) {
                Ok(khz) => khz,
                Err(e) => {
                    warn!("cpufreq: cpu {cpu}: skipping sample: {e}");
                    continue;
                }
            };
            if CPU_FREQ.saturates(khz) {
                warn!(
                    "cpufreq: cpu {cpu} at {khz} kHz, histogram ends at {} kHz",
                    CPU_FREQ.max_value
                );
            }
            writer.add_ticks(CPU_FREQ.value_to_index(khz), weight);
            writer.set_last_value(khz);
            writer.add_elapsed(u64::from(tick_secs) * u64::from(weight));
        }
    }

    fn reports(&self) -> Vec<DeviceReport> {
        self.segments
            .iter()
            .map(|segment| {
                let record = segment.record();
                let cpu = record.device_id();
                DeviceReport {
                    metric: self.name(),
                    device_id: cpu,
                    title: format!(
                        "cpu {cpu}, f_min={:.0}, f_max={:.0}",
                        record.min_value() * KHZ_TO_MHZ,
                        record.max_value() * KHZ_TO_MHZ
                    ),
                    unit: "MHz",
                    distribution: Distribution::from_counts(
                        &CPU_FREQ,
                        &record.counts(),
                        KHZ_TO_MHZ,
                    ),
                    elapsed_secs: record.elapsed_secs(),
                    last_value: None,
                    energy: None,
                    style: STYLE,
                }
            })
            .collect()
    }
}
