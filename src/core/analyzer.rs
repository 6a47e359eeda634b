use super::error::AnalysisError;
use super::types::{
    CdfPoint, ConvergencePoint, HistogramBin, PercentileValue, SimulationResult,
    SummaryStatistics, TrialWeek,
};

/// Percentiles drawn as markers on histogram and CDF charts.
pub const CHART_PERCENTILES: [f64; 3] = [50.0, 85.0, 95.0];

const CONVERGENCE_PERCENTILE: f64 = 85.0;

/// Upper bound on histogram bins; bins are allocated up front.
pub const MAX_HISTOGRAM_BINS: usize = 10_000;

/// Read-only statistics over the completed trials of a [`SimulationResult`].
///
/// Trials that exceeded the horizon are left out of every figure. Nothing is
/// cached: each call recomputes from the borrowed result.
#[derive(Debug, Clone, Copy)]
pub struct Analyzer<'a> {
    result: &'a SimulationResult,
}

impl<'a> Analyzer<'a> {
    pub fn new(result: &'a SimulationResult) -> Self {
        Self { result }
    }

    /// Value at each requested percentile, in request order.
    pub fn summary(&self, percentiles: &[f64]) -> Result<Vec<PercentileValue>, AnalysisError> {
        if let Some(&bad) = percentiles.iter().find(|p| !is_open_percentile(**p)) {
            return Err(AnalysisError::InvalidPercentile(bad));
        }
        let sorted = self.sorted_values()?;
        Ok(percentiles
            .iter()
            .map(|&percentile| PercentileValue {
                percentile,
                value: percentile_sorted(&sorted, percentile),
            })
            .collect())
    }

    pub fn percentile_markers(&self) -> Result<Vec<PercentileValue>, AnalysisError> {
        self.summary(&CHART_PERCENTILES)
    }

    pub fn overall_stats(&self) -> Result<SummaryStatistics, AnalysisError> {
        let sorted = self.sorted_values()?;
        let (mean, std_dev) = mean_and_std(&sorted);
        Ok(SummaryStatistics {
            count: sorted.len(),
            mean,
            std_dev,
            min: sorted[0],
            p25: percentile_sorted(&sorted, 25.0),
            median: percentile_sorted(&sorted, 50.0),
            p75: percentile_sorted(&sorted, 75.0),
            max: sorted[sorted.len() - 1],
        })
    }

    /// Trials whose absolute z-score is at most `z_threshold`. When every
    /// trial has the same week the spread is zero and all trials are kept.
    pub fn filter_outliers(&self, z_threshold: f64) -> Result<Vec<TrialWeek>, AnalysisError> {
        if z_threshold.is_nan() || z_threshold <= 0.0 {
            return Err(AnalysisError::InvalidThreshold(z_threshold));
        }

        let completed = self.completed().collect::<Vec<_>>();
        if completed.is_empty() {
            return Ok(completed);
        }
        let values = completed.iter().map(|t| t.week as f64).collect::<Vec<_>>();
        let (mean, std_dev) = mean_and_std(&values);
        if std_dev == 0.0 {
            return Ok(completed);
        }

        Ok(completed
            .into_iter()
            .filter(|t| ((t.week as f64 - mean) / std_dev).abs() <= z_threshold)
            .collect())
    }

    /// Running P85 estimate over prefixes of `step`, `2 * step`, ... trials.
    /// A trailing partial prefix shorter than `step` is not reported.
    pub fn convergence_curve(&self, step: usize) -> Result<ConvergenceCurve, AnalysisError> {
        if step < 1 {
            return Err(AnalysisError::InvalidStep(step));
        }
        let weeks = self.result.completion_weeks().collect::<Vec<_>>();
        if weeks.len() / step < 2 {
            return Err(AnalysisError::InsufficientData {
                len: weeks.len(),
                step,
            });
        }
        let latest_week = weeks.iter().copied().max().unwrap_or(0);
        Ok(ConvergenceCurve {
            weeks,
            latest_week,
            step,
        })
    }

    /// Equal-width bins spanning `[min, max]`; the last bin is closed.
    pub fn histogram(&self, bins: usize) -> Result<Vec<HistogramBin>, AnalysisError> {
        if bins == 0 || bins > MAX_HISTOGRAM_BINS {
            return Err(AnalysisError::InvalidBins(bins));
        }
        let sorted = self.sorted_values()?;
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        if max == min {
            return Ok(vec![HistogramBin {
                lower: min,
                upper: max,
                count: sorted.len(),
            }]);
        }

        let width = (max - min) / bins as f64;
        let mut histogram = (0..bins)
            .map(|i| HistogramBin {
                lower: min + width * i as f64,
                upper: if i + 1 == bins {
                    max
                } else {
                    min + width * (i + 1) as f64
                },
                count: 0,
            })
            .collect::<Vec<_>>();
        for value in sorted {
            let idx = (((value - min) / width).floor() as usize).min(bins - 1);
            histogram[idx].count += 1;
        }
        Ok(histogram)
    }

    /// Empirical CDF: for each distinct week, the share of trials finished by then.
    pub fn cdf(&self) -> Vec<CdfPoint> {
        let mut weeks = self.result.completion_weeks().collect::<Vec<_>>();
        weeks.sort_unstable();
        let n = weeks.len() as f64;

        let mut points: Vec<CdfPoint> = Vec::new();
        for (idx, week) in weeks.iter().enumerate() {
            let probability = (idx + 1) as f64 / n;
            match points.last_mut() {
                Some(last) if last.week == *week => last.probability = probability,
                _ => points.push(CdfPoint {
                    week: *week,
                    probability,
                }),
            }
        }
        points
    }

    fn completed(&self) -> impl Iterator<Item = TrialWeek> + '_ {
        self.result
            .outcomes()
            .iter()
            .enumerate()
            .filter_map(|(trial, week)| week.map(|week| TrialWeek { trial, week }))
    }

    fn values(&self) -> Vec<f64> {
        self.result.completion_weeks().map(f64::from).collect()
    }

    fn sorted_values(&self) -> Result<Vec<f64>, AnalysisError> {
        let mut values = self.values();
        if values.is_empty() {
            return Err(AnalysisError::EmptyResult);
        }
        values.sort_by(|a, b| a.total_cmp(b));
        Ok(values)
    }
}

/// Lazily evaluated convergence series. Each call to [`ConvergenceCurve::iter`]
/// starts again from the first prefix.
#[derive(Debug, Clone)]
pub struct ConvergenceCurve {
    weeks: Vec<u32>,
    latest_week: u32,
    step: usize,
}

impl ConvergenceCurve {
    pub fn iter(&self) -> ConvergenceIter<'_> {
        ConvergenceIter {
            curve: self,
            prefixes: 0,
            counts: vec![0; self.latest_week as usize + 1],
        }
    }

    pub fn len(&self) -> usize {
        self.weeks.len() / self.step
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn step(&self) -> usize {
        self.step
    }
}

impl<'c> IntoIterator for &'c ConvergenceCurve {
    type Item = ConvergencePoint;
    type IntoIter = ConvergenceIter<'c>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Walks the prefixes keeping a per-week tally, so each point only adds the
/// `step` new trials instead of re-sorting the prefix.
pub struct ConvergenceIter<'c> {
    curve: &'c ConvergenceCurve,
    prefixes: usize,
    counts: Vec<usize>,
}

impl Iterator for ConvergenceIter<'_> {
    type Item = ConvergencePoint;

    fn next(&mut self) -> Option<Self::Item> {
        if self.prefixes >= self.curve.len() {
            return None;
        }
        let start = self.prefixes * self.curve.step;
        self.prefixes += 1;
        let samples = self.prefixes * self.curve.step;

        for &week in &self.curve.weeks[start..samples] {
            self.counts[week as usize] += 1;
        }
        Some(ConvergencePoint {
            samples,
            p85: percentile_counted(&self.counts, samples, CONVERGENCE_PERCENTILE),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.curve.len() - self.prefixes;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ConvergenceIter<'_> {}

fn is_open_percentile(p: f64) -> bool {
    p > 0.0 && p < 100.0
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Linear interpolation between closest ranks: rank = p / 100 * (n - 1).
fn percentile_sorted(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

/// Same interpolation as [`percentile_sorted`], reading ranks from a tally of
/// `n` integer weeks indexed by week.
fn percentile_counted(counts: &[usize], n: usize, p: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let low_value = nth_week(counts, lower);
    if lower == upper {
        return low_value;
    }
    let w = rank - lower as f64;
    low_value * (1.0 - w) + nth_week(counts, upper) * w
}

/// Week at zero-based position `index` of the sorted tally.
fn nth_week(counts: &[usize], index: usize) -> f64 {
    let mut seen = 0;
    for (week, &count) in counts.iter().enumerate() {
        seen += count;
        if seen > index {
            return week as f64;
        }
    }
    counts.len().saturating_sub(1) as f64
}
