/// Rejected input while building a parameter set or a risk.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("field `{0}` is missing")]
    MissingField(String),

    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("invalid risk `{field}`: {reason}")]
    InvalidRisk { field: &'static str, reason: String },

    #[error("risk at index {index}: {source}")]
    AtIndex {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Name of the offending field, qualified with the element index for batch errors.
    pub fn field(&self) -> String {
        match self {
            Self::MissingField(name) => name.clone(),
            Self::InvalidParameter { field, .. } | Self::InvalidRisk { field, .. } => {
                (*field).to_string()
            }
            Self::AtIndex { index, source } => format!("risks[{index}].{}", source.field()),
        }
    }

    pub(crate) fn parameter(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn risk(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidRisk {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid horizon: max_weeks must be > 0, got {max_weeks}")]
    InvalidHorizon { max_weeks: u32 },

    #[error("{unfinished} of {total} trials did not reach the backlog within {max_weeks} weeks")]
    DidNotConverge {
        unfinished: usize,
        total: usize,
        max_weeks: u32,
    },

    #[error("simulation cancelled after {completed_trials} of {total} trials")]
    Cancelled { completed_trials: usize, total: usize },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the simulation has not been run yet")]
pub struct NotYetRun;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("z-score threshold must be > 0, got {0}")]
    InvalidThreshold(f64),

    #[error("step must be >= 1, got {0}")]
    InvalidStep(usize),

    #[error("not enough data: {len} results give fewer than two prefixes of step {step}")]
    InsufficientData { len: usize, step: usize },

    #[error("percentile must lie strictly between 0 and 100, got {0}")]
    InvalidPercentile(f64),

    #[error("bin count must be between 1 and 10000, got {0}")]
    InvalidBins(usize),

    #[error("no completed trials to analyze")]
    EmptyResult,

    #[error("at least one scenario is required")]
    InvalidScenarios,
}

/// Any failure surfaced by a multi-stage operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}
