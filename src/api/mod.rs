//! Request/response boundary for transports that speak JSON.
//!
//! Parameters and risks are read from the raw JSON value and routed through
//! the strict validators, so `5.0` is never accepted where an integer is
//! required. Engine and analysis options are read through serde with
//! defaults for absent keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::{
    AnalysisError, Analyzer, CHART_PERCENTILES, CancellationToken, CdfPoint, ConvergencePoint,
    Error, HistogramBin, PercentileValue, Risk, RunConfig, Scenario, ScenarioOutcome,
    SimulationError, SimulationParameters, SimulationResult, Simulator, SummaryStatistics,
    ValidationError, compare_scenarios,
};

const DEFAULT_CONVERGENCE_STEP: usize = 500;
const DEFAULT_HISTOGRAM_BINS: usize = 30;

/// Canonical parameter keys and the alternative spellings accepted for them.
const PARAMETER_KEYS: [(&str, &[&str]); 5] = [
    ("backlog", &[]),
    ("th_min", &["thMin", "t_min", "tMin"]),
    ("th_ex", &["thEx", "t_mode", "tMode"]),
    ("th_max", &["thMax", "t_max", "tMax"]),
    ("num_sim", &["numSim", "iterations"]),
];

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    BadRequest,
    SimulationError,
    AnalysisError,
}

/// Error shape handed back to callers: kind tag, message, per-field details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
    pub fields: Option<BTreeMap<String, String>>,
}

impl ErrorBody {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            error: ErrorKind::BadRequest,
            message: message.into(),
            fields: None,
        }
    }

    fn with_field_prefix(mut self, prefix: &str) -> Self {
        if let Some(fields) = self.fields.take() {
            self.fields = Some(
                fields
                    .into_iter()
                    .map(|(field, detail)| (format!("{prefix}.{field}"), detail))
                    .collect(),
            );
        }
        self
    }
}

impl From<ValidationError> for ErrorBody {
    fn from(err: ValidationError) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(err.field(), err.to_string());
        Self {
            error: ErrorKind::ValidationError,
            message: err.to_string(),
            fields: Some(fields),
        }
    }
}

impl From<SimulationError> for ErrorBody {
    fn from(err: SimulationError) -> Self {
        Self {
            error: ErrorKind::SimulationError,
            message: err.to_string(),
            fields: None,
        }
    }
}

impl From<AnalysisError> for ErrorBody {
    fn from(err: AnalysisError) -> Self {
        Self {
            error: ErrorKind::AnalysisError,
            message: err.to_string(),
            fields: None,
        }
    }
}

impl From<Error> for ErrorBody {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(e) => e.into(),
            Error::Simulation(e) => e.into(),
            Error::Analysis(e) => e.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    percentiles: Option<Vec<f64>>,
    #[serde(alias = "convergence_step")]
    convergence_step: Option<usize>,
    #[serde(alias = "histogram_bins")]
    histogram_bins: Option<usize>,
    #[serde(alias = "outlier_z")]
    outlier_z: Option<f64>,
}

/// Which derived figures to compute for a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiOptions {
    pub percentiles: Vec<f64>,
    pub convergence_step: Option<usize>,
    pub histogram_bins: usize,
    pub outlier_z: Option<f64>,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            percentiles: CHART_PERCENTILES.to_vec(),
            convergence_step: None,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            outlier_z: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub parameters: SimulationParameters,
    pub risks: Vec<Risk>,
    pub config: RunConfig,
    pub options: ApiOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    pub parameters: SimulationParameters,
    pub risks: Vec<Risk>,
    pub seed: u64,
    pub max_weeks: u32,
    pub results: Vec<Option<u32>>,
    pub exceeded_horizon: usize,
    pub percentiles: Vec<PercentileValue>,
    pub stats: SummaryStatistics,
    pub outliers_removed: Option<usize>,
    pub convergence: Option<Vec<ConvergencePoint>>,
    pub histogram: Vec<HistogramBin>,
    pub cdf: Vec<CdfPoint>,
}

pub fn simulate_request_from_json(json: &str) -> Result<ApiRequest, ErrorBody> {
    let value = serde_json::from_str::<Value>(json)
        .map_err(|e| ErrorBody::bad_request(format!("Invalid API JSON payload: {e}")))?;
    api_request_from_value(value)
}

pub fn api_request_from_value(value: Value) -> Result<ApiRequest, ErrorBody> {
    let Value::Object(body) = value else {
        return Err(ErrorBody::bad_request("request body must be a JSON object"));
    };

    let parameters = SimulationParameters::from_mapping(&canonical_parameters(&body))?;
    let risks = match body.get("risks") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) if items.is_empty() => Vec::new(),
        Some(data) => Risk::parse(data)?,
    };

    let config = run_config(&body)?;
    let payload = serde_json::from_value::<SimulatePayload>(Value::Object(body))
        .map_err(|e| ErrorBody::bad_request(format!("Invalid analysis options: {e}")))?;

    let defaults = ApiOptions::default();
    let options = ApiOptions {
        percentiles: payload.percentiles.unwrap_or(defaults.percentiles),
        convergence_step: payload.convergence_step,
        histogram_bins: payload.histogram_bins.unwrap_or(defaults.histogram_bins),
        outlier_z: payload.outlier_z,
    };

    Ok(ApiRequest {
        parameters,
        risks,
        config,
        options,
    })
}

pub fn run_simulate_request(
    request: &ApiRequest,
    cancel: &CancellationToken,
) -> Result<SimulateResponse, ErrorBody> {
    let mut simulator = Simulator::new(request.parameters, request.risks.clone());
    let result = simulator.run_with(&request.config, cancel)?;
    let response = build_simulate_response(
        &request.parameters,
        &request.risks,
        &result,
        &request.options,
    )?;
    debug!(
        trials = response.results.len(),
        seed = response.seed,
        "simulate response assembled"
    );
    Ok(response)
}

pub fn simulate_json(json: &str) -> Result<SimulateResponse, ErrorBody> {
    let request = simulate_request_from_json(json)?;
    run_simulate_request(&request, &CancellationToken::new())
}

pub fn build_simulate_response(
    parameters: &SimulationParameters,
    risks: &[Risk],
    result: &SimulationResult,
    options: &ApiOptions,
) -> Result<SimulateResponse, AnalysisError> {
    let analyzer = Analyzer::new(result);
    let stats = analyzer.overall_stats()?;
    let percentiles = analyzer.summary(&options.percentiles)?;

    // A single completed trial has no convergence series unless one was asked for.
    let step = match options.convergence_step {
        Some(step) => Some(step),
        None if stats.count >= 2 => Some(default_convergence_step(stats.count)),
        None => None,
    };
    let convergence = match step {
        Some(step) => Some(analyzer.convergence_curve(step)?.iter().collect()),
        None => None,
    };

    let outliers_removed = match options.outlier_z {
        Some(z) => Some(stats.count - analyzer.filter_outliers(z)?.len()),
        None => None,
    };

    Ok(SimulateResponse {
        parameters: *parameters,
        risks: risks.to_vec(),
        seed: result.seed(),
        max_weeks: result.max_weeks(),
        results: result.outcomes().to_vec(),
        exceeded_horizon: result.exceeded_horizon(),
        percentiles,
        stats,
        outliers_removed,
        convergence,
        histogram: analyzer.histogram(options.histogram_bins)?,
        cdf: analyzer.cdf(),
    })
}

/// Scenario comparison request: `{"scenarios": [...], "seed": .., "maxWeeks": ..}`.
pub fn compare_json(json: &str) -> Result<Vec<ScenarioOutcome>, ErrorBody> {
    let value = serde_json::from_str::<Value>(json)
        .map_err(|e| ErrorBody::bad_request(format!("Invalid API JSON payload: {e}")))?;
    let Value::Object(body) = value else {
        return Err(ErrorBody::bad_request("request body must be a JSON object"));
    };
    let Some(Value::Array(items)) = body.get("scenarios") else {
        return Err(ErrorBody::bad_request("`scenarios` must be a list"));
    };

    let scenarios = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            scenario_from_value(item)
                .map_err(|e| e.with_field_prefix(&format!("scenarios[{index}]")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let config = run_config(&body)?;
    Ok(compare_scenarios(&scenarios, &config, &CancellationToken::new())?)
}

fn scenario_from_value(value: &Value) -> Result<Scenario, ErrorBody> {
    let Value::Object(map) = value else {
        return Err(ErrorBody::bad_request("each scenario must be a JSON object"));
    };
    let name = match map.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err(ErrorBody::bad_request("scenario `name` must be a non-empty string")),
    };
    let parameters = match map.get("parameters") {
        Some(Value::Object(params)) => {
            SimulationParameters::from_mapping(&canonical_parameters(params))?
        }
        _ => return Err(ValidationError::MissingField("parameters".to_string()).into()),
    };
    let risks = match map.get("risks") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) if items.is_empty() => Vec::new(),
        Some(data) => Risk::parse(data)?,
    };
    Ok(Scenario {
        name,
        parameters,
        risks,
    })
}

/// Engine options (`maxWeeks`, `seed`, `horizonPolicy`, `chunkSize`, `threads`)
/// read from the same body; absent keys fall back to [`RunConfig::default`].
fn run_config(body: &Map<String, Value>) -> Result<RunConfig, ErrorBody> {
    serde_json::from_value::<RunConfig>(Value::Object(body.clone()))
        .map_err(|e| ErrorBody::bad_request(format!("Invalid run options: {e}")))
}

/// Copies parameter values to their canonical keys. A canonical key wins over
/// any alias; missing keys stay missing so validation can report them.
fn canonical_parameters(body: &Map<String, Value>) -> Map<String, Value> {
    let mut params = Map::new();
    for (key, aliases) in PARAMETER_KEYS {
        let value = std::iter::once(key)
            .chain(aliases.iter().copied())
            .find_map(|k| body.get(k));
        if let Some(value) = value {
            params.insert(key.to_string(), value.clone());
        }
    }
    params
}

fn default_convergence_step(completed: usize) -> usize {
    (completed / 10).clamp(1, DEFAULT_CONVERGENCE_STEP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DEFAULT_MAX_WEEKS, HorizonPolicy};
    use serde_json::json;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn base_body() -> Value {
        json!({
            "backlog": 150,
            "th_min": 3,
            "th_ex": 5,
            "th_max": 9,
            "num_sim": 2000,
            "seed": 42
        })
    }

    fn with(mut body: Value, key: &str, value: Value) -> Value {
        body.as_object_mut()
            .expect("object body")
            .insert(key.to_string(), value);
        body
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let request = simulate_request_from_json(
            r#"{
                "backlog": 120,
                "t_min": 2,
                "t_mode": 4,
                "t_max": 8,
                "iterations": 1000,
                "seed": 9,
                "maxWeeks": 200,
                "horizonPolicy": "censor",
                "percentiles": [50, 85],
                "histogramBins": 12,
                "risks": {"name": "Dependencies", "probability": 0.3, "impact": 0.7}
            }"#,
        )
        .expect("valid request");

        assert_eq!(request.parameters.backlog(), 120);
        assert_eq!(request.parameters.th_ex(), 4);
        assert_eq!(request.parameters.num_sim(), 1000);
        assert_eq!(request.risks.len(), 1);
        assert_eq!(request.config.max_weeks, 200);
        assert_eq!(request.config.seed, Some(9));
        assert_eq!(request.config.horizon_policy, HorizonPolicy::Censor);
        assert_eq!(request.options.percentiles, vec![50.0, 85.0]);
        assert_eq!(request.options.histogram_bins, 12);
    }

    #[test]
    fn defaults_apply_when_options_are_absent() {
        let request = api_request_from_value(base_body()).expect("valid request");
        assert_eq!(request.config.max_weeks, DEFAULT_MAX_WEEKS);
        assert_eq!(request.config.horizon_policy, HorizonPolicy::Fail);
        assert!(request.risks.is_empty());
        assert_eq!(request.options, ApiOptions::default());
    }

    #[test]
    fn float_throughput_is_a_validation_error_with_field_detail() {
        let err = api_request_from_value(with(base_body(), "th_ex", json!(5.0)))
            .expect_err("float is not an integer");
        assert_eq!(err.error, ErrorKind::ValidationError);
        let fields = err.fields.expect("field details");
        assert!(fields.contains_key("th_ex"));
    }

    #[test]
    fn missing_parameter_is_reported_by_name() {
        let mut body = base_body();
        body.as_object_mut().expect("object body").remove("backlog");
        let err = api_request_from_value(body).expect_err("backlog missing");
        assert_eq!(err.error, ErrorKind::ValidationError);
        assert_eq!(err.message, "field `backlog` is missing");
    }

    #[test]
    fn risk_errors_carry_the_element_index() {
        let body = with(
            base_body(),
            "risks",
            json!([
                {"name": "a", "probability": 0.2, "impact": 0.8},
                {"name": "b", "probability": 0.2, "impact": 0.0}
            ]),
        );
        let err = api_request_from_value(body).expect_err("impact 0 is rejected");
        let fields = err.fields.expect("field details");
        assert!(fields.contains_key("risks[1].impact"));
    }

    #[test]
    fn oversized_histogram_is_an_analysis_error() {
        let body = with(base_body(), "num_sim", json!(100));
        for bins in [json!(4_000_000_000_000_000_000_u64), json!(1_000_000_000)] {
            let body = with(body.clone(), "histogramBins", bins);
            let err = simulate_json(&body.to_string()).expect_err("too many bins");
            assert_eq!(err.error, ErrorKind::AnalysisError);
        }
    }

    #[test]
    fn malformed_json_and_options_are_bad_requests() {
        let err = simulate_request_from_json("{not json").expect_err("malformed");
        assert_eq!(err.error, ErrorKind::BadRequest);

        let err = api_request_from_value(with(base_body(), "seed", json!(-3)))
            .expect_err("negative seed");
        assert_eq!(err.error, ErrorKind::BadRequest);

        let err = api_request_from_value(json!([1, 2])).expect_err("not an object");
        assert_eq!(err.error, ErrorKind::BadRequest);
    }

    #[test]
    fn simulate_json_returns_results_and_statistics() {
        let body = with(base_body(), "outlierZ", json!(3.0));
        let response = simulate_json(&body.to_string()).expect("simulation succeeds");

        assert_eq!(response.results.len(), 2000);
        assert_eq!(response.seed, 42);
        assert_eq!(response.exceeded_horizon, 0);
        assert_eq!(response.stats.count, 2000);
        assert_eq!(response.percentiles.len(), 3);
        for marker in &response.percentiles {
            assert!(response.stats.min <= marker.value && marker.value <= response.stats.max);
        }
        let convergence = response.convergence.as_ref().expect("convergence series");
        assert_eq!(convergence.len(), 10);
        assert_eq!(convergence[9].samples, 2000);
        let binned = response.histogram.iter().map(|b| b.count).sum::<usize>();
        assert_eq!(binned, 2000);
        assert_approx(response.cdf.last().expect("cdf points").probability, 1.0);
        assert!(response.outliers_removed.is_some());
    }

    #[test]
    fn same_seed_gives_identical_responses() {
        let first = simulate_json(&base_body().to_string()).expect("first");
        let second = simulate_json(&base_body().to_string()).expect("second");
        assert_eq!(first.results, second.results);
    }

    #[test]
    fn horizon_failure_is_a_simulation_error() {
        let body = with(base_body(), "maxWeeks", json!(5));
        let err = simulate_json(&body.to_string()).expect_err("150 units in 5 weeks is impossible");
        assert_eq!(err.error, ErrorKind::SimulationError);
        assert!(err.message.contains("did not reach the backlog"));
    }

    #[test]
    fn censored_trials_are_reported_not_counted() {
        let body = with(base_body(), "maxWeeks", json!(27));
        let body = with(body, "horizonPolicy", json!("censor"));
        let response = simulate_json(&body.to_string()).expect("censored run");
        assert_eq!(response.results.len(), 2000);
        assert_eq!(
            response.stats.count + response.exceeded_horizon,
            response.results.len()
        );
        assert!(response.stats.max <= 27.0);
    }

    #[test]
    fn single_trial_run_has_no_default_convergence_series() {
        let body = with(base_body(), "num_sim", json!(1));
        let response = simulate_json(&body.to_string()).expect("one trial");
        assert_eq!(response.results.len(), 1);
        assert!(response.convergence.is_none());
    }

    #[test]
    fn explicit_convergence_step_too_large_is_an_analysis_error() {
        let body = with(base_body(), "convergenceStep", json!(1500));
        let err = simulate_json(&body.to_string()).expect_err("only one prefix");
        assert_eq!(err.error, ErrorKind::AnalysisError);
    }

    #[test]
    fn error_body_serializes_with_kind_tag() {
        let body = ErrorBody::from(ValidationError::MissingField("num_sim".to_string()));
        let encoded = serde_json::to_value(&body).expect("serializable");
        assert_eq!(encoded["error"], json!("validation_error"));
        assert_eq!(encoded["fields"]["num_sim"], json!("field `num_sim` is missing"));

        let encoded = serde_json::to_value(ErrorBody::bad_request("nope")).expect("serializable");
        assert_eq!(encoded["fields"], Value::Null);
    }

    #[test]
    fn compare_json_runs_each_scenario() {
        let outcomes = compare_json(
            r#"{
                "seed": 3,
                "scenarios": [
                    {"name": "Base case", "parameters": {"backlog": 150, "th_min": 3, "th_ex": 5, "th_max": 9, "num_sim": 500}},
                    {"name": "Lower throughput", "parameters": {"backlog": 150, "t_min": 2, "t_mode": 4, "t_max": 7, "iterations": 500}}
                ]
            }"#,
        )
        .expect("comparison succeeds");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].name, "Base case");
        assert!(outcomes[1].median_delta > 0.0);
    }

    #[test]
    fn compare_json_prefixes_field_errors_with_scenario_index() {
        let err = compare_json(
            r#"{
                "scenarios": [
                    {"name": "ok", "parameters": {"backlog": 10, "th_min": 1, "th_ex": 2, "th_max": 3, "num_sim": 10}},
                    {"name": "bad", "parameters": {"backlog": 10, "th_min": 3, "th_ex": 2, "th_max": 1, "num_sim": 10}}
                ]
            }"#,
        )
        .expect_err("second scenario is unordered");
        let fields = err.fields.expect("field details");
        assert!(fields.contains_key("scenarios[1].th_min"));
    }
}
