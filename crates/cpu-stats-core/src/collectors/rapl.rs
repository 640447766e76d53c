//! RAPL package power histograms.
//!
//! Power is derived from the package energy counter: the energy spent since
//! the previous sample divided by the time it covers. The writer also keeps
//! the running energy total in the segment.

use std::io;

use log::{debug, info, warn};

use super::{Collector, acquire_all};
use crate::bucket::RAPL_POWER;
use crate::energy::{EnergyCounter, EnergyUsage, average_watts};
use crate::error::SegmentError;
use crate::render::{DeviceReport, Distribution, ReportStyle};
use crate::segment::{Access, RaplSegment};
use crate::sensors::{RaplSensor, device_ids};

pub(crate) const POWER_STYLE: ReportStyle = ReportStyle {
    value_header: "Pwr/W",
    value_precision: 1,
    average_label: "average power",
    average_precision: 2,
};

/// Package power collector over every RAPL package the sensor reports.
pub struct RaplStats<S> {
    sensor: S,
    segments: Vec<RaplSegment>,
    /// Writer only: last counter reading per segment.
    counters: Vec<EnergyCounter>,
}

impl<S: RaplSensor> RaplStats<S> {
    /// Enumerate packages and create (writer) or open (reader) their
    /// segments. A writer seeds each energy counter with a first reading;
    /// if that fails nothing is created.
    pub fn new(sensor: S, namespace: &str, access: Access) -> Result<Self, SegmentError> {
        let ids: Vec<u32> = device_ids(|pkg| sensor.package_exists(pkg)).collect();
        let segments = acquire_all(namespace, &RAPL_POWER, ids, access)?;
        let counters = match access {
            Access::Owned => segments
                .iter()
                .map(|segment| seed_counter(&sensor, segment))
                .collect::<Result<Vec<_>, _>>()?,
            Access::Borrowed => Vec::new(),
        };
        Ok(Self {
            sensor,
            segments,
            counters,
        })
    }

    pub fn segments(&self) -> &[RaplSegment] {
        &self.segments
    }
}

fn seed_counter<S: RaplSensor>(
    sensor: &S,
    segment: &RaplSegment,
) -> Result<EnergyCounter, SegmentError> {
    let pkg = segment.record().device_id();
    let seed_err = |what: &'static str| {
        move |source: io::Error| SegmentError::Sensor {
            name: segment.name().to_string(),
            what,
            source,
        }
    };
    let initial = sensor.energy_uj(pkg).map_err(seed_err("energy counter"))?;
    let range = sensor
        .max_energy_range_uj(pkg)
        .map_err(seed_err("counter range"))?;
    Ok(EnergyCounter::new(initial, range))
}

impl<S: RaplSensor> Collector for RaplStats<S> {
    fn name(&self) -> &'static str {
        "rapl"
    }

    fn device_count(&self) -> usize {
        self.segments.len()
    }

    fn update(&mut self, tick_secs: u32, weight: u32) {
        let elapsed = u64::from(tick_secs) * u64::from(weight);
        for (segment, counter) in self.segments.iter().zip(&mut self.counters) {
            let Some(writer) = segment.writer() else {
                return;
            };
            let pkg = writer.record().device_id();
            let now = match self.sensor.energy_uj(pkg) {
                Ok(now) => now,
                Err(e) => {
                    warn!("rapl: package {pkg}: skipping sample: {e}");
                    continue;
                }
            };
            let last = counter.last_uj();
            let step = counter.advance(now);
            if step.beyond_range {
                warn!(
                    "rapl: package {pkg}: reading {now} beyond counter range {}",
                    counter.max_range_uj()
                );
            }
            if step.wrapped {
                info!(
                    "rapl: package {pkg}: counter wrapped, last={last} now={now} range={}",
                    counter.max_range_uj()
                );
            } else if step.stalled {
                debug!("rapl: package {pkg}: counter did not move");
            }

            let watts = average_watts(step.delta_uj, elapsed as f64);
            if RAPL_POWER.saturates(watts) {
                warn!(
                    "rapl: package {pkg}: {watts:.1} W over {elapsed} s (last={last} now={now}), \
                     histogram ends at {} W",
                    RAPL_POWER.max_value
                );
            }
            writer.add_ticks(RAPL_POWER.value_to_index(watts), weight);
            writer.set_last_value(watts);
            writer.add_elapsed(elapsed);
            writer.add_energy(step.delta_uj);
        }
    }

    fn reports(&self) -> Vec<DeviceReport> {
        self.segments
            .iter()
            .map(|segment| {
                let record = segment.record();
                let pkg = record.device_id();
                DeviceReport {
                    metric: self.name(),
                    device_id: pkg,
                    title: format!("package {pkg}"),
                    unit: "W",
                    distribution: Distribution::from_counts(&RAPL_POWER, &record.counts(), 1.0),
                    elapsed_secs: record.elapsed_secs(),
                    last_value: Some(record.last_value()),
                    energy: Some(EnergyUsage::from(record.energy())),
                    style: POWER_STYLE,
                }
            })
            .collect()
    }
}
