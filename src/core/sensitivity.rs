use serde::{Deserialize, Serialize};
use tracing::info;

use super::analyzer::Analyzer;
use super::engine::{CancellationToken, Simulator};
use super::error::{AnalysisError, Error};
use super::params::SimulationParameters;
use super::risk::Risk;
use super::types::RunConfig;

/// A named what-if variant of a forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub parameters: SimulationParameters,
    #[serde(default)]
    pub risks: Vec<Risk>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioOutcome {
    pub name: String,
    pub mean: f64,
    pub median: f64,
    pub p50: f64,
    pub p80: f64,
    pub p90: f64,
    pub min: f64,
    pub max: f64,
    pub exceeded_horizon: usize,
    /// Median minus the median of the first scenario.
    pub median_delta: f64,
}

/// Runs every scenario with the same configuration (and therefore the same
/// seed) so differences come from the inputs rather than sampling noise.
pub fn compare_scenarios(
    scenarios: &[Scenario],
    config: &RunConfig,
    cancel: &CancellationToken,
) -> Result<Vec<ScenarioOutcome>, Error> {
    if scenarios.is_empty() {
        return Err(AnalysisError::InvalidScenarios.into());
    }

    let mut outcomes: Vec<ScenarioOutcome> = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        info!(scenario = %scenario.name, "running scenario");
        let mut simulator = Simulator::new(scenario.parameters, scenario.risks.clone());
        let result = simulator.run_with(config, cancel)?;
        let analyzer = Analyzer::new(&result);

        let stats = analyzer.overall_stats()?;
        let percentiles = analyzer.summary(&[50.0, 80.0, 90.0])?;
        let baseline_median = outcomes.first().map_or(stats.median, |base| base.median);

        outcomes.push(ScenarioOutcome {
            name: scenario.name.clone(),
            mean: stats.mean,
            median: stats.median,
            p50: percentiles[0].value,
            p80: percentiles[1].value,
            p90: percentiles[2].value,
            min: stats.min,
            max: stats.max,
            exceeded_horizon: result.exceeded_horizon(),
            median_delta: stats.median - baseline_median,
        });
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> RunConfig {
        RunConfig {
            seed: Some(7),
            ..RunConfig::default()
        }
    }

    fn scenario(name: &str, th: (i64, i64, i64), risks: Vec<Risk>) -> Scenario {
        Scenario {
            name: name.to_string(),
            parameters: SimulationParameters::new(150, th.0, th.1, th.2, 1000)
                .expect("valid parameters"),
            risks,
        }
    }

    #[test]
    fn empty_scenario_list_is_rejected() {
        let err = compare_scenarios(&[], &seeded(), &CancellationToken::new())
            .expect_err("nothing to compare");
        assert_eq!(err, Error::Analysis(AnalysisError::InvalidScenarios));
    }

    #[test]
    fn baseline_has_zero_delta_and_slower_scenarios_are_positive() {
        let scenarios = vec![
            scenario("Base case", (3, 5, 9), Vec::new()),
            scenario("Lower throughput", (2, 4, 7), Vec::new()),
            scenario(
                "High risk frequency",
                (3, 5, 9),
                vec![
                    Risk::new("vacation", 0.1, 0.9).expect("valid risk"),
                    Risk::new("client dependency", 0.2, 0.8).expect("valid risk"),
                ],
            ),
        ];
        let outcomes =
            compare_scenarios(&scenarios, &seeded(), &CancellationToken::new()).expect("compare");

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].median_delta, 0.0);
        assert!(outcomes[1].median_delta > 0.0);
        assert!(outcomes[2].median_delta >= 0.0);
        for outcome in &outcomes {
            assert!(outcome.min <= outcome.p50 && outcome.p50 <= outcome.p80);
            assert!(outcome.p80 <= outcome.p90 && outcome.p90 <= outcome.max);
            assert_eq!(outcome.p50, outcome.median);
        }
    }

    #[test]
    fn scenarios_deserialize_through_validators() {
        let parsed: Vec<Scenario> = serde_json::from_value(json!([
            {
                "name": "Base case",
                "parameters": {"backlog": 150, "th_min": 3, "th_ex": 5, "th_max": 9, "num_sim": 100},
                "risks": [{"name": "vacation", "probability": 0.05, "impact": 0.9}]
            }
        ]))
        .expect("valid scenarios");
        assert_eq!(parsed[0].risks.len(), 1);

        let invalid = serde_json::from_value::<Vec<Scenario>>(json!([
            {
                "name": "Broken",
                "parameters": {"backlog": 150, "th_min": 3, "th_ex": 5, "th_max": 9, "num_sim": 100},
                "risks": [{"name": "boost", "probability": 0.2, "impact": 1.3}]
            }
        ]));
        assert!(invalid.is_err());
    }
}
