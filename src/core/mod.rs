mod analyzer;
mod engine;
mod error;
mod params;
mod risk;
mod sensitivity;
mod types;

pub use analyzer::{
    Analyzer, CHART_PERCENTILES, ConvergenceCurve, ConvergenceIter, MAX_HISTOGRAM_BINS,
};
pub use engine::{CancellationToken, Simulator};
pub use error::{AnalysisError, Error, NotYetRun, SimulationError, ValidationError};
pub use params::SimulationParameters;
pub use risk::Risk;
pub use sensitivity::{Scenario, ScenarioOutcome, compare_scenarios};
pub use types::{
    CdfPoint, ConvergencePoint, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_WEEKS, HistogramBin,
    HorizonPolicy, PercentileValue, RunConfig, SimulationResult, SummaryStatistics, TrialWeek,
};
