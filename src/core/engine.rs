use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::error::{NotYetRun, SimulationError};
use super::params::SimulationParameters;
use super::risk::Risk;
use super::types::{HorizonPolicy, RunConfig, SimulationResult};

/// Lowest weekly throughput a trial can have after risks compound.
const THROUGHPUT_FLOOR: f64 = 1.0;

const THROUGHPUT_STREAM: u32 = 1;
const RISK_STREAM: u32 = 2;

/// Cooperative cancellation flag, checked between trial chunks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Monte Carlo engine over one parameter set and an ordered risk list.
#[derive(Debug, Clone)]
pub struct Simulator {
    parameters: SimulationParameters,
    risks: Vec<Risk>,
    results: Option<SimulationResult>,
}

impl Simulator {
    pub fn new(parameters: SimulationParameters, risks: Vec<Risk>) -> Self {
        Self {
            parameters,
            risks,
            results: None,
        }
    }

    pub fn parameters(&self) -> &SimulationParameters {
        &self.parameters
    }

    pub fn risks(&self) -> &[Risk] {
        &self.risks
    }

    pub fn run(
        &mut self,
        max_weeks: u32,
        seed: Option<u64>,
    ) -> Result<SimulationResult, SimulationError> {
        let config = RunConfig {
            max_weeks,
            seed,
            ..RunConfig::default()
        };
        self.run_with(&config, &CancellationToken::new())
    }

    /// Runs `num_sim` independent trials and returns a copy of the result that
    /// is also kept for [`Simulator::results`]. A failed or cancelled run leaves
    /// any previously stored result untouched.
    pub fn run_with(
        &mut self,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> Result<SimulationResult, SimulationError> {
        if config.max_weeks == 0 {
            return Err(SimulationError::InvalidHorizon {
                max_weeks: config.max_weeks,
            });
        }
        let seed = config.seed.unwrap_or_else(clock_seed);

        info!(
            trials = self.parameters.num_sim(),
            max_weeks = config.max_weeks,
            risks = self.risks.len(),
            seed,
            "running delivery simulation"
        );

        let total = self.parameters.num_sim();
        let progress = |completed_trials: usize| {
            debug!(completed_trials, total, "trial chunk done");
        };
        let outcomes = match config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| SimulationError::ThreadPool(e.to_string()))?;
                pool.install(|| self.simulate_trials(config, seed, cancel, progress))?
            }
            None => self.simulate_trials(config, seed, cancel, progress)?,
        };

        let unfinished = outcomes.iter().filter(|week| week.is_none()).count();
        if unfinished > 0 {
            warn!(
                unfinished,
                max_weeks = config.max_weeks,
                "trials exceeded the simulation horizon"
            );
            if config.horizon_policy == HorizonPolicy::Fail {
                return Err(SimulationError::DidNotConverge {
                    unfinished,
                    total: outcomes.len(),
                    max_weeks: config.max_weeks,
                });
            }
        }

        info!(trials = outcomes.len(), unfinished, "simulation finished");
        let result = SimulationResult::new(outcomes, config.max_weeks, seed);
        self.results = Some(result.clone());
        Ok(result)
    }

    pub fn results(&self) -> Result<&SimulationResult, NotYetRun> {
        self.results.as_ref().ok_or(NotYetRun)
    }

    /// `on_chunk` receives the number of trials finished after each chunk.
    fn simulate_trials<F>(
        &self,
        config: &RunConfig,
        seed: u64,
        cancel: &CancellationToken,
        on_chunk: F,
    ) -> Result<Vec<Option<u32>>, SimulationError>
    where
        F: Fn(usize) + Sync,
    {
        let total = self.parameters.num_sim() as usize;
        let chunk_size = config.chunk_size.max(1);
        let mut outcomes = vec![None; total];

        for (chunk_index, chunk) in outcomes.chunks_mut(chunk_size).enumerate() {
            let offset = chunk_index * chunk_size;
            if cancel.is_cancelled() {
                warn!(completed_trials = offset, total, "simulation cancelled");
                return Err(SimulationError::Cancelled {
                    completed_trials: offset,
                    total,
                });
            }

            chunk.par_iter_mut().enumerate().for_each(|(i, slot)| {
                *slot = simulate_trial(
                    &self.parameters,
                    &self.risks,
                    config.max_weeks,
                    seed,
                    (offset + i) as u64,
                );
            });
            on_chunk(offset + chunk.len());
        }

        Ok(outcomes)
    }
}

/// First-passage week (1-based) of a single trial, or `None` if cumulative
/// throughput is still below the backlog after `max_weeks`.
///
/// Throughput and risk draws come from separate streams, so the base
/// throughput path of a trial does not depend on how many risks are applied.
fn simulate_trial(
    parameters: &SimulationParameters,
    risks: &[Risk],
    max_weeks: u32,
    seed: u64,
    trial: u64,
) -> Option<u32> {
    let mut throughput_rng = Rng::new(derive_seed(seed, THROUGHPUT_STREAM, trial));
    let mut risk_rng = Rng::new(derive_seed(seed, RISK_STREAM, trial));

    let backlog = parameters.backlog() as f64;
    let low = parameters.th_min() as f64;
    let mode = parameters.th_ex() as f64;
    let high = parameters.th_max() as f64;

    let mut delivered = 0.0;
    for week in 0..max_weeks {
        let base = throughput_rng.triangular(low, mode, high);
        delivered += apply_risks(base, risks, &mut risk_rng);
        if delivered >= backlog {
            return Some(week + 1);
        }
    }
    None
}

/// Every risk gets its own Bernoulli draw each week; impacts of risks that
/// fire in the same week multiply together.
fn apply_risks(base: f64, risks: &[Risk], rng: &mut Rng) -> f64 {
    let mut adjusted = base;
    for risk in risks {
        if rng.next_f64() < risk.probability() {
            adjusted *= risk.impact();
        }
    }
    adjusted.max(THROUGHPUT_FLOOR)
}

fn clock_seed() -> u64 {
    let mut hasher = DefaultHasher::new();
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

fn derive_seed(base_seed: u64, stream: u32, trial: u64) -> u64 {
    let mixed = base_seed ^ ((stream as u64) << 56) ^ splitmix64(trial);
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Uniform in the open interval (0, 1).
    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    /// Inverse-CDF sample of the triangular distribution on `[low, high]`
    /// with peak at `mode`. Collapses to `low` when the range is empty.
    fn triangular(&mut self, low: f64, mode: f64, high: f64) -> f64 {
        let u = self.next_f64();
        triangular_inverse_cdf(u, low, mode, high)
    }
}

fn triangular_inverse_cdf(u: f64, low: f64, mode: f64, high: f64) -> f64 {
    let span = high - low;
    if span <= 0.0 {
        return low;
    }
    let split = (mode - low) / span;
    if u < split {
        low + (u * span * (mode - low)).sqrt()
    } else {
        high - ((1.0 - u) * span * (high - mode)).sqrt()
    }
}
