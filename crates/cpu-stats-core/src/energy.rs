//! Wrap-safe energy accounting for RAPL-style counters.
//!
//! Hardware energy counters (`energy_uj`) increase monotonically while the
//! package is powered and wrap at `max_energy_range_uj`. Sampling happens far
//! more often than the counter wraps, so at most one wrap is assumed between
//! two consecutive readings. Several wraps in one interval cannot be told
//! apart from one and are not corrected.
//!
//! Accumulated energy is kept as a split 128-bit microjoule total
//! ([`EnergyTotal`]) so that it survives arbitrarily long uptimes.

use serde::Serialize;

/// Microjoules per joule (= watt-second).
const UJ_PER_J: f64 = 1.0e6;
/// Watt-seconds per kilowatt-hour.
const WS_PER_KWH: f64 = 1000.0 * 3600.0;

/// Energy elapsed between two counter readings, correcting a single wrap.
///
/// `max_range` is the counter's wrap point. With `now < last` the counter is
/// assumed to have wrapped exactly once: `(max_range - last) + now`.
pub fn counter_delta(last: u64, now: u64, max_range: u64) -> u64 {
    if now >= last {
        now - last
    } else {
        max_range.saturating_sub(last).saturating_add(now)
    }
}

/// Average power in watts for `delta_uj` spent over `elapsed_secs`.
///
/// Returns 0 for a non-positive interval instead of an infinite reading.
pub fn average_watts(delta_uj: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    delta_uj as f64 * (1.0 / UJ_PER_J) / elapsed_secs
}

/// Result of advancing an [`EnergyCounter`] by one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterStep {
    /// Elapsed energy in microjoules.
    pub delta_uj: u64,
    /// The reading was below the previous one and a wrap was corrected.
    pub wrapped: bool,
    /// The counter did not move at all.
    pub stalled: bool,
    /// The reading lies above the counter's advertised wrap point.
    pub beyond_range: bool,
}

/// Last-seen state of one hardware energy counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyCounter {
    last_uj: u64,
    max_range_uj: u64,
}

impl EnergyCounter {
    /// Seed the counter with a first reading and its wrap point.
    pub fn new(initial_uj: u64, max_range_uj: u64) -> Self {
        Self {
            last_uj: initial_uj,
            max_range_uj,
        }
    }

    pub fn last_uj(&self) -> u64 {
        self.last_uj
    }

    pub fn max_range_uj(&self) -> u64 {
        self.max_range_uj
    }

    /// Consume a fresh reading and return the energy spent since the last one.
    pub fn advance(&mut self, now_uj: u64) -> CounterStep {
        let step = CounterStep {
            delta_uj: counter_delta(self.last_uj, now_uj, self.max_range_uj),
            wrapped: now_uj < self.last_uj,
            stalled: now_uj == self.last_uj,
            beyond_range: now_uj > self.max_range_uj,
        };
        self.last_uj = now_uj;
        step
    }
}

/// Double-width running energy total in microjoules.
///
/// `lo` holds the low 64 bits, `hi` counts how often `lo` overflowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyTotal {
    pub lo: u64,
    pub hi: u64,
}

impl EnergyTotal {
    pub fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// Add `delta_uj`, carrying into `hi` when `lo` overflows.
    pub fn add(&mut self, delta_uj: u64) {
        let (lo, carry) = self.lo.overflowing_add(delta_uj);
        self.lo = lo;
        if carry {
            self.hi = self.hi.wrapping_add(1);
        }
    }

    /// Full value as a 128-bit integer.
    pub fn as_u128(&self) -> u128 {
        (u128::from(self.hi) << 64) | u128::from(self.lo)
    }

    /// Total in microjoules as a float: `lo + hi * 2^64`.
    pub fn microjoules(&self) -> f64 {
        self.lo as f64 + self.hi as f64 * 2f64.powi(64)
    }

    /// Total in watt-seconds.
    pub fn watt_seconds(&self) -> f64 {
        self.microjoules() / UJ_PER_J
    }

    /// Total in kilowatt-hours.
    pub fn kilowatt_hours(&self) -> f64 {
        self.watt_seconds() / WS_PER_KWH
    }
}

/// Display form of an energy total: whole watt-seconds and kWh rounded to
/// three decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyUsage {
    pub watt_seconds: f64,
    pub kilowatt_hours: f64,
}

impl From<EnergyTotal> for EnergyUsage {
    fn from(total: EnergyTotal) -> Self {
        let ws = total.watt_seconds();
        let kwh = ws / WS_PER_KWH;
        Self {
            watt_seconds: ws.round_ties_even(),
            kilowatt_hours: (kwh * 1e3).round_ties_even() * 1e-3,
        }
    }
}
