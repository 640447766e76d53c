//! Distribution rendering: raw bucket counts to a normalized percentage report.
//!
//! Percentages are rounded to two decimals. The rounding error of all other
//! buckets is absorbed by the bucket with the most ticks, so the displayed
//! percentages add up to exactly 100 (within [`SUM_TOLERANCE`]). Rows are
//! listed from the highest value down; the cumulative column is the share of
//! time spent at or above a row's value.

use std::io::{self, Write};

use log::warn;
use serde::Serialize;

use crate::bucket::HistogramSpec;
use crate::energy::EnergyUsage;

/// Largest accepted deviation of the displayed percentage sum from 100.
pub const SUM_TOLERANCE: f64 = 0.005;
/// Column groups per report line.
pub const COLUMNS: usize = 3;
/// Banner characters per column group.
const BANNER_WIDTH: usize = 24;

/// Round a percentage to two decimals, ties to even.
pub fn round_percent(pct: f64) -> f64 {
    (1e2 * pct).round_ties_even() * 1e-2
}

/// How much of a report to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Banner, header, table and summary lines.
    #[default]
    Full,
    /// Banner, header and summary lines only.
    Short,
}

/// One occupied bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Row {
    pub index: usize,
    /// Representative value in display units.
    pub value: f64,
    pub ticks: u32,
    pub percent: f64,
    /// Sum of `percent` over this row and every row above it.
    pub cumulative: f64,
}

/// Normalized view of one histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub total_ticks: u64,
    /// Occupied buckets, highest value first.
    pub rows: Vec<Row>,
    /// Weighted average value in display units.
    pub average: f64,
    /// Sum of the displayed percentages.
    pub percent_sum: f64,
}

impl Distribution {
    /// Normalize raw bucket counts.
    ///
    /// `scale` converts the histogram's native unit into display units (kHz to MHz
    /// for frequency, 1 for watts).
    pub fn from_counts(spec: &HistogramSpec, counts: &[u32], scale: f64) -> Self {
        let occupied: Vec<(usize, u32)> = counts
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, ticks)| ticks != 0)
            .collect();
        let total_ticks: u64 = occupied.iter().map(|&(_, t)| u64::from(t)).sum();
        if occupied.is_empty() {
            return Self {
                total_ticks,
                rows: Vec::new(),
                average: 0.0,
                percent_sum: 0.0,
            };
        }

        // Most ticks; the lowest index wins a tie.
        let idx_max = occupied
            .iter()
            .enumerate()
            .fold(0, |best, (k, &(_, ticks))| {
                if ticks > occupied[best].1 { k } else { best }
            });

        let sum_ticks = total_ticks as f64;
        let mut percents: Vec<f64> = occupied
            .iter()
            .map(|&(_, ticks)| round_percent(f64::from(ticks) * 1e2 / sum_ticks))
            .collect();
        let sum_others: f64 = percents
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != idx_max)
            .map(|(_, pct)| pct)
            .sum();
        percents[idx_max] = 100.0 - sum_others;

        let mut cumulative = 0.0;
        let rows: Vec<Row> = occupied
            .iter()
            .zip(&percents)
            .rev()
            .map(|(&(index, ticks), &percent)| {
                cumulative += percent;
                Row {
                    index,
                    value: spec.index_to_value(index) * scale,
                    ticks,
                    percent,
                    cumulative,
                }
            })
            .collect();

        let percent_sum = rows.iter().map(|r| r.percent).sum();
        let weighted: f64 = rows.iter().map(|r| r.value * r.percent).sum();
        let average = weighted * 1e-2 - spec.display_bias() * scale;

        Self {
            total_ticks,
            rows,
            average,
            percent_sum,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the displayed percentages add up to 100.
    pub fn is_normalized(&self) -> bool {
        self.is_empty() || (self.percent_sum - 100.0).abs() <= SUM_TOLERANCE
    }
}

/// Per-metric presentation of a report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportStyle {
    /// Column header of the value column, at most five characters.
    pub value_header: &'static str,
    pub value_precision: usize,
    /// e.g. `"average frequency"`.
    pub average_label: &'static str,
    pub average_precision: usize,
}

/// Everything a reader shows for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    /// Collector name (`"cpufreq"`, `"rapl"`, `"amdgpu"`).
    pub metric: &'static str,
    pub device_id: u32,
    /// Header line without the sample count, e.g. `"package 0"`.
    pub title: String,
    pub unit: &'static str,
    pub distribution: Distribution,
    pub elapsed_secs: u64,
    /// Power over the last sampling interval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<EnergyUsage>,
    #[serde(skip)]
    pub style: ReportStyle,
}

fn write_table(out: &mut dyn Write, report: &DeviceReport) -> io::Result<()> {
    let style = &report.style;
    let header = vec![format!("{:>5}       %   sum % ", style.value_header); COLUMNS];
    writeln!(out, "{}", header.join(" | "))?;

    // Column-major fill: the first column holds the highest values.
    let rows = &report.distribution.rows;
    let lines = rows.len().div_ceil(COLUMNS);
    for j in 0..lines {
        let mut line = String::new();
        for i in 0..COLUMNS {
            let Some(row) = rows.get(j + lines * i) else {
                continue;
            };
            if i > 0 {
                line.push_str("  | ");
            }
            line.push_str(&format!(
                "{:5.prec$} {:7.2} {:7.2}",
                row.value,
                row.percent,
                row.cumulative,
                prec = style.value_precision
            ));
        }
        writeln!(out, "{line}")?;
    }
    Ok(())
}

/// Write the fixed-width text report for one device.
pub fn write_text(
    out: &mut dyn Write,
    report: &DeviceReport,
    verbosity: Verbosity,
) -> io::Result<()> {
    let dist = &report.distribution;
    let style = &report.style;

    writeln!(out, "{}", "=".repeat(BANNER_WIDTH * COLUMNS))?;
    writeln!(out, "{}, samples={}", report.title, dist.total_ticks)?;
    if dist.is_empty() {
        writeln!(out, "no samples yet")?;
        return Ok(());
    }
    if verbosity == Verbosity::Full {
        write_table(out, report)?;
    }

    let mut summary = format!(
        "{}: ~{:.prec$} {}",
        style.average_label,
        dist.average,
        report.unit,
        prec = style.average_precision
    );
    if let Some(last) = report.last_value {
        summary.push_str(&format!(
            ", power over last interval: {last:.2} {}",
            report.unit
        ));
    }
    writeln!(out, "{summary}")?;

    if let Some(energy) = report.energy {
        writeln!(
            out,
            "used energy:   ~{:.0} Ws, ~{:.3} kWh",
            energy.watt_seconds, energy.kilowatt_hours
        )?;
    }

    if !dist.is_normalized() {
        warn!(
            "{} {}: displayed percentages sum to {}",
            report.metric, report.device_id, dist.percent_sum
        );
        writeln!(out, "invalid sum {}", dist.percent_sum)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{CPU_FREQ, CPU_FREQ_BUCKETS, GPU_POWER, GPU_POWER_BUCKETS, RAPL_POWER};
    use rand::Rng;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    fn counts_with(n: usize, pairs: &[(usize, u32)]) -> Vec<u32> {
        let mut v = vec![0u32; n];
        for &(i, t) in pairs {
            v[i] = t;
        }
        v
    }

    const POWER_STYLE: ReportStyle = ReportStyle {
        value_header: "Pwr/W",
        value_precision: 1,
        average_label: "average power",
        average_precision: 2,
    };

    // -----------------------------------------------------------------------
    // Normalization
    // -----------------------------------------------------------------------

    #[test]
    fn fifty_thirty_twenty() {
        let counts = counts_with(GPU_POWER_BUCKETS, &[(2, 20), (5, 30), (10, 50)]);
        let d = Distribution::from_counts(&GPU_POWER, &counts, 1.0);
        assert_eq!(d.total_ticks, 100);
        let idx: Vec<usize> = d.rows.iter().map(|r| r.index).collect();
        assert_eq!(idx, vec![10, 5, 2]);
        let pct: Vec<f64> = d.rows.iter().map(|r| r.percent).collect();
        let cum: Vec<f64> = d.rows.iter().map(|r| r.cumulative).collect();
        for (a, b) in pct.iter().zip([50.0, 30.0, 20.0]) {
            assert_close(*a, b);
        }
        for (a, b) in cum.iter().zip([50.0, 80.0, 100.0]) {
            assert_close(*a, b);
        }
        assert!(d.is_normalized());
    }

    #[test]
    fn largest_bucket_absorbs_rounding() {
        // 1/3 each rounds to 33.33; the first largest bucket takes 33.34.
        let counts = counts_with(GPU_POWER_BUCKETS, &[(1, 1), (2, 1), (3, 1)]);
        let d = Distribution::from_counts(&GPU_POWER, &counts, 1.0);
        let by_index = |i: usize| d.rows.iter().find(|r| r.index == i).unwrap().percent;
        assert_close(by_index(1), 33.34);
        assert_close(by_index(2), 33.33);
        assert_close(by_index(3), 33.33);
        assert!((d.percent_sum - 100.0).abs() <= SUM_TOLERANCE);
        assert_close(d.rows.last().unwrap().cumulative, d.percent_sum);
    }

    #[test]
    fn single_bucket_is_one_hundred_percent() {
        let counts = counts_with(CPU_FREQ_BUCKETS, &[(17, 12345)]);
        let d = Distribution::from_counts(&CPU_FREQ, &counts, 1e-3);
        assert_eq!(d.rows.len(), 1);
        assert_eq!(d.rows[0].percent, 100.0);
        assert_eq!(d.rows[0].cumulative, 100.0);
        assert_close(d.average, 3400.0);
    }

    #[test]
    fn single_tick_in_last_bucket() {
        let counts = counts_with(GPU_POWER_BUCKETS, &[(GPU_POWER_BUCKETS - 1, 1)]);
        let d = Distribution::from_counts(&GPU_POWER, &counts, 1.0);
        assert_eq!(d.rows[0].index, GPU_POWER_BUCKETS - 1);
        assert_eq!(d.percent_sum, 100.0);
    }

    #[test]
    fn uniform_spread_sums_to_one_hundred() {
        for spec in [CPU_FREQ, RAPL_POWER, GPU_POWER] {
            let counts = vec![7u32; spec.bucket_count()];
            let d = Distribution::from_counts(&spec, &counts, 1.0);
            assert_eq!(d.rows.len(), spec.bucket_count());
            assert!(d.is_normalized(), "sum {}", d.percent_sum);
        }
    }

    #[test]
    fn random_distributions_sum_to_one_hundred() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let counts: Vec<u32> = (0..GPU_POWER_BUCKETS)
                .map(|_| {
                    if rng.random_bool(0.3) {
                        rng.random_range(1..1_000_000)
                    } else {
                        0
                    }
                })
                .collect();
            if counts.iter().all(|&c| c == 0) {
                continue;
            }
            let d = Distribution::from_counts(&GPU_POWER, &counts, 1.0);
            assert!(d.is_normalized(), "sum {} for {counts:?}", d.percent_sum);
            for w in d.rows.windows(2) {
                assert!(w[0].index > w[1].index);
            }
        }
    }

    #[test]
    fn near_max_counts_do_not_overflow() {
        let counts = counts_with(GPU_POWER_BUCKETS, &[(0, u32::MAX), (1, u32::MAX), (2, 1)]);
        let d = Distribution::from_counts(&GPU_POWER, &counts, 1.0);
        assert_eq!(d.total_ticks, 2 * u64::from(u32::MAX) + 1);
        assert!(d.is_normalized());
    }

    #[test]
    fn empty_histogram() {
        let d = Distribution::from_counts(&CPU_FREQ, &[0; CPU_FREQ_BUCKETS], 1e-3);
        assert!(d.is_empty());
        assert_eq!(d.total_ticks, 0);
        assert!(d.is_normalized());
    }

    // -----------------------------------------------------------------------
    // Average
    // -----------------------------------------------------------------------

    #[test]
    fn power_average_subtracts_half_step() {
        // 10..12.5 W and 20..22.5 W half the time each -> centers 11.25, 21.25
        let counts = counts_with(GPU_POWER_BUCKETS, &[(4, 5), (8, 5)]);
        let d = Distribution::from_counts(&GPU_POWER, &counts, 1.0);
        assert_close(d.average, 16.25);
    }

    #[test]
    fn frequency_average_in_mhz() {
        // 1000 MHz a quarter, 3000 MHz three quarters
        let counts = counts_with(CPU_FREQ_BUCKETS, &[(5, 1), (15, 3)]);
        let d = Distribution::from_counts(&CPU_FREQ, &counts, 1e-3);
        assert_close(d.average, 2500.0);
        assert_close(d.rows[0].value, 3000.0);
    }

    // -----------------------------------------------------------------------
    // Text output
    // -----------------------------------------------------------------------

    fn power_report(counts: &[u32]) -> DeviceReport {
        DeviceReport {
            metric: "amdgpu",
            device_id: 1,
            title: "amdgpu-hwmon 1".to_string(),
            unit: "W",
            distribution: Distribution::from_counts(&GPU_POWER, counts, 1.0),
            elapsed_secs: 200,
            last_value: Some(12.0),
            energy: Some(EnergyUsage {
                watt_seconds: 3600.0,
                kilowatt_hours: 0.001,
            }),
            style: POWER_STYLE,
        }
    }

    fn render(report: &DeviceReport, verbosity: Verbosity) -> String {
        let mut out = Vec::new();
        write_text(&mut out, report, verbosity).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn text_layout() {
        let counts = counts_with(GPU_POWER_BUCKETS, &[(2, 20), (5, 30), (10, 50)]);
        let text = render(&power_report(&counts), Verbosity::Full);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "=".repeat(72));
        assert_eq!(lines[1], "amdgpu-hwmon 1, samples=100");
        assert_eq!(
            lines[2],
            "Pwr/W       %   sum %  | Pwr/W       %   sum %  | Pwr/W       %   sum % "
        );
        // three rows fit into one line, one per column group
        assert_eq!(
            lines[3],
            " 27.5   50.00   50.00  |  15.0   30.00   80.00  |   7.5   20.00  100.00"
        );
        assert!(lines[4].starts_with("average power: ~"));
        assert!(lines[4].ends_with("power over last interval: 12.00 W"));
        assert_eq!(lines[5], "used energy:   ~3600 Ws, ~0.001 kWh");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn column_major_fill() {
        let pairs: Vec<(usize, u32)> = (0..7).map(|i| (i, 1)).collect();
        let counts = counts_with(GPU_POWER_BUCKETS, &pairs);
        let text = render(&power_report(&counts), Verbosity::Full);
        let table: Vec<&str> = text.lines().skip(3).take(3).collect();
        // 7 rows over 3 columns -> 3 lines; first column holds indices 6, 5, 4
        assert!(table[0].starts_with(" 17.5"));
        assert!(table[1].starts_with(" 15.0"));
        assert!(table[2].starts_with(" 12.5"));
        assert_eq!(table[2].matches('|').count(), 1);
    }

    #[test]
    fn short_output_skips_table() {
        let counts = counts_with(GPU_POWER_BUCKETS, &[(2, 20), (5, 30)]);
        let text = render(&power_report(&counts), Verbosity::Short);
        assert!(!text.contains("sum %"));
        assert!(text.contains("average power"));
    }

    #[test]
    fn empty_segment_says_so() {
        let text = render(&power_report(&[0; GPU_POWER_BUCKETS]), Verbosity::Full);
        assert!(text.contains("samples=0"));
        assert!(text.contains("no samples yet"));
        assert!(!text.contains("average"));
    }

    #[test]
    fn broken_sum_is_flagged() {
        let counts = counts_with(GPU_POWER_BUCKETS, &[(2, 20)]);
        let mut report = power_report(&counts);
        report.distribution.rows[0].percent = 90.0;
        report.distribution.percent_sum = 90.0;
        let text = render(&report, Verbosity::Full);
        assert!(text.contains("invalid sum 90"));
    }

    #[test]
    fn report_serializes_without_style() {
        let counts = counts_with(GPU_POWER_BUCKETS, &[(2, 20)]);
        let json = serde_json::to_value(power_report(&counts)).unwrap();
        assert_eq!(json["metric"], "amdgpu");
        assert_eq!(json["distribution"]["total_ticks"], 20);
        assert!(json.get("style").is_none());
        assert_eq!(json["energy"]["watt_seconds"], 3600.0);
    }
}
