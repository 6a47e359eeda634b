use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_WEEKS: u32 = 150;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// What to do with trials that never reach the backlog inside the horizon.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HorizonPolicy {
    /// Fail the whole run with `SimulationError::DidNotConverge`.
    #[default]
    Fail,
    /// Keep the run and mark those trials as exceeding the horizon.
    Censor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(alias = "max_weeks")]
    pub max_weeks: u32,
    pub seed: Option<u64>,
    #[serde(alias = "horizon_policy")]
    pub horizon_policy: HorizonPolicy,
    #[serde(alias = "chunk_size")]
    pub chunk_size: usize,
    pub threads: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_weeks: DEFAULT_MAX_WEEKS,
            seed: None,
            horizon_policy: HorizonPolicy::Fail,
            chunk_size: DEFAULT_CHUNK_SIZE,
            threads: None,
        }
    }
}

/// One completion week per trial, in trial order.
///
/// `None` marks a trial that exceeded `max_weeks`; only produced under
/// [`HorizonPolicy::Censor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    outcomes: Vec<Option<u32>>,
    max_weeks: u32,
    seed: u64,
}

impl SimulationResult {
    pub(crate) fn new(outcomes: Vec<Option<u32>>, max_weeks: u32, seed: u64) -> Self {
        Self {
            outcomes,
            max_weeks,
            seed,
        }
    }

    pub fn outcomes(&self) -> &[Option<u32>] {
        &self.outcomes
    }

    /// Completed trials only, in trial order.
    pub fn completion_weeks(&self) -> impl Iterator<Item = u32> + '_ {
        self.outcomes.iter().filter_map(|week| *week)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn exceeded_horizon(&self) -> usize {
        self.outcomes.iter().filter(|week| week.is_none()).count()
    }

    pub fn max_weeks(&self) -> u32 {
        self.max_weeks
    }

    /// Master seed the run used, whether supplied or drawn from the clock.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStatistics {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergencePoint {
    pub samples: usize,
    pub p85: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CdfPoint {
    pub week: u32,
    pub probability: f64,
}

/// A trial kept by outlier filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialWeek {
    pub trial: usize,
    pub week: u32,
}
