//! Fixed-step histogram bucketing.
//!
//! Every metric kind maps a continuous physical value (kHz, W) onto a small
//! bucket index using a fixed step and a saturating upper bound. Two policies
//! exist and are kept apart on purpose, because they decide which displayed
//! bucket a boundary value is attributed to:
//!
//! - [`Bucketing::Floor`] (power): bucket `i` covers `[i*step, (i+1)*step)`
//!   and is displayed by its upper edge, "at least this much".
//! - [`Bucketing::Round`] (frequency): a value snaps to the nearest multiple
//!   of the step and is displayed by that multiple.
//!
//! Values beyond `max_value` are never rejected; they saturate into the last
//! bucket.

use serde::Serialize;

/// How a value is snapped onto a bucket index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucketing {
    /// `floor(v / step)`, displayed by the bucket's upper edge.
    Floor,
    /// `rint(v / step)`, displayed by the bucket's own multiple of `step`.
    Round,
}

impl std::fmt::Display for Bucketing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Floor => write!(f, "floor"),
            Self::Round => write!(f, "round"),
        }
    }
}

/// Compile-time description of one metric kind's histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSpec {
    /// Metric tag used in segment names (`"f"` frequency, `"p"` power).
    pub metric: &'static str,
    /// Device kind used in segment names (`"cpu"`, `"pkg"`, `"amdgpu"`).
    pub kind: &'static str,
    /// Bucket width in the metric's native unit.
    pub step: f64,
    /// Largest value with a bucket of its own; anything above saturates.
    pub max_value: f64,
    pub policy: Bucketing,
}

/// CPU clock frequency in kHz: 200 MHz steps up to 7 GHz.
pub const CPU_FREQ: HistogramSpec = HistogramSpec {
    metric: "f",
    kind: "cpu",
    step: 200_000.0,
    max_value: 7_000_000.0,
    policy: Bucketing::Round,
};

/// RAPL package power in W: 2.5 W steps up to 250 W.
pub const RAPL_POWER: HistogramSpec = HistogramSpec {
    metric: "p",
    kind: "pkg",
    step: 2.5,
    max_value: 250.0,
    policy: Bucketing::Floor,
};

/// GPU package power (PPT) in W: 2.5 W steps up to 350 W.
pub const GPU_POWER: HistogramSpec = HistogramSpec {
    metric: "p",
    kind: "amdgpu",
    step: 2.5,
    max_value: 350.0,
    policy: Bucketing::Floor,
};

pub const CPU_FREQ_BUCKETS: usize = CPU_FREQ.bucket_count();
pub const RAPL_POWER_BUCKETS: usize = RAPL_POWER.bucket_count();
pub const GPU_POWER_BUCKETS: usize = GPU_POWER.bucket_count();

impl HistogramSpec {
    /// Number of buckets, `max_value / step + 1`.
    pub const fn bucket_count(&self) -> usize {
        (self.max_value / self.step) as usize + 1
    }

    /// Index of the last (saturating) bucket.
    pub const fn last_index(&self) -> usize {
        self.bucket_count() - 1
    }

    /// Map a measurement onto its bucket index.
    ///
    /// Negative and NaN inputs land in bucket 0, values past the last bucket
    /// land in the last bucket. Rounding is half-to-even, matching C `rint`
    /// under the default rounding mode.
    pub fn value_to_index(&self, value: f64) -> usize {
        let scaled = value / self.step;
        let snapped = match self.policy {
            Bucketing::Floor => scaled.floor(),
            Bucketing::Round => scaled.round_ties_even(),
        };
        // float -> usize casts saturate; NaN becomes 0.
        (snapped as usize).min(self.last_index())
    }

    /// Representative value shown for a bucket.
    pub fn index_to_value(&self, index: usize) -> f64 {
        match self.policy {
            Bucketing::Floor => (index + 1) as f64 * self.step,
            Bucketing::Round => index as f64 * self.step,
        }
    }

    /// Lower edge of a floor bucket; for round buckets the snapped multiple
    /// itself. Either way the value maps back onto `index`.
    pub fn lower_edge(&self, index: usize) -> f64 {
        index as f64 * self.step
    }

    /// Offset between the displayed value and the bucket's center, removed
    /// again when averaging.
    pub fn display_bias(&self) -> f64 {
        match self.policy {
            Bucketing::Floor => self.step * 0.5,
            Bucketing::Round => 0.0,
        }
    }

    /// Whether `value` lands in the saturating bucket or beyond the scale.
    pub fn saturates(&self, value: f64) -> bool {
        self.value_to_index(value) >= self.last_index() || value > self.max_value
    }
}
