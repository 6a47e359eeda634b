use std::fs;
use std::io::{self, Read};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use flowcast::api::{self, ApiOptions, ApiRequest, ErrorBody};
use flowcast::core::{
    CHART_PERCENTILES, CancellationToken, DEFAULT_MAX_WEEKS, HorizonPolicy, Risk, RunConfig,
    SimulationParameters, ValidationError,
};

#[derive(Parser, Debug)]
#[command(
    name = "flowcast",
    about = "Monte Carlo delivery forecast from weekly throughput bounds and compounding risks"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one forecast described by flags.
    Simulate(SimulateArgs),
    /// Run a JSON simulate request read from FILE, or stdin for `-`.
    Request { path: String },
    /// Compare the JSON scenarios read from FILE, or stdin for `-`.
    Sensitivity { path: String },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliHorizonPolicy {
    Fail,
    Censor,
}

impl From<CliHorizonPolicy> for HorizonPolicy {
    fn from(value: CliHorizonPolicy) -> Self {
        match value {
            CliHorizonPolicy::Fail => HorizonPolicy::Fail,
            CliHorizonPolicy::Censor => HorizonPolicy::Censor,
        }
    }
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long)]
    backlog: i64,
    #[arg(long)]
    th_min: i64,
    #[arg(long)]
    th_ex: i64,
    #[arg(long)]
    th_max: i64,
    #[arg(long, default_value_t = 5000)]
    num_sim: i64,
    /// Risk as NAME:PROBABILITY:IMPACT; repeat for several risks.
    #[arg(long = "risk", value_name = "NAME:P:I")]
    risks: Vec<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = DEFAULT_MAX_WEEKS)]
    max_weeks: u32,
    #[arg(long, value_enum, default_value_t = CliHorizonPolicy::Fail)]
    horizon_policy: CliHorizonPolicy,
    /// Worker threads; defaults to the global rayon pool.
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long, value_delimiter = ',')]
    percentiles: Vec<f64>,
    #[arg(long)]
    convergence_step: Option<usize>,
    #[arg(long, default_value_t = 30)]
    histogram_bins: usize,
    #[arg(long)]
    outlier_z: Option<f64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Simulate(args) => simulate(args),
        Command::Request { path } => {
            read_input(&path).and_then(|body| api::simulate_json(&body).and_then(|r| to_json(&r)))
        }
        Command::Sensitivity { path } => {
            read_input(&path).and_then(|body| api::compare_json(&body).and_then(|r| to_json(&r)))
        }
    };

    match outcome {
        Ok(json) => println!("{json}"),
        Err(body) => {
            let rendered = serde_json::to_string_pretty(&body).unwrap_or(body.message);
            eprintln!("{rendered}");
            process::exit(1);
        }
    }
}

fn simulate(args: SimulateArgs) -> Result<String, ErrorBody> {
    let parameters = SimulationParameters::new(
        args.backlog,
        args.th_min,
        args.th_ex,
        args.th_max,
        args.num_sim,
    )?;
    let risks = args
        .risks
        .iter()
        .enumerate()
        .map(|(index, arg)| parse_risk(index, arg))
        .collect::<Result<Vec<_>, _>>()?;

    let request = ApiRequest {
        parameters,
        risks,
        config: RunConfig {
            max_weeks: args.max_weeks,
            seed: args.seed,
            horizon_policy: args.horizon_policy.into(),
            threads: args.threads,
            ..RunConfig::default()
        },
        options: ApiOptions {
            percentiles: if args.percentiles.is_empty() {
                CHART_PERCENTILES.to_vec()
            } else {
                args.percentiles
            },
            convergence_step: args.convergence_step,
            histogram_bins: args.histogram_bins,
            outlier_z: args.outlier_z,
        },
    };

    let response = api::run_simulate_request(&request, &CancellationToken::new())?;
    to_json(&response)
}

/// Splits from the right so risk names may contain `:`.
fn parse_risk(index: usize, arg: &str) -> Result<Risk, ErrorBody> {
    let mut parts = arg.rsplitn(3, ':');
    let (Some(impact), Some(probability), Some(name)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ErrorBody::bad_request(format!(
            "--risk `{arg}` must look like NAME:PROBABILITY:IMPACT"
        )));
    };

    let number = |raw: &str, label: &str| {
        raw.trim().parse::<f64>().map_err(|_| {
            ErrorBody::bad_request(format!("--risk `{arg}`: {label} `{raw}` is not a number"))
        })
    };
    let probability = number(probability, "probability")?;
    let impact = number(impact, "impact")?;

    Risk::new(name, probability, impact).map_err(|source| {
        ValidationError::AtIndex {
            index,
            source: Box::new(source),
        }
        .into()
    })
}

fn read_input(path: &str) -> Result<String, ErrorBody> {
    let read = if path == "-" {
        let mut body = String::new();
        io::stdin().read_to_string(&mut body).map(|_| body)
    } else {
        fs::read_to_string(path)
    };
    read.map_err(|e| ErrorBody::bad_request(format!("cannot read `{path}`: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ErrorBody> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ErrorBody::bad_request(format!("cannot encode response: {e}")))
}
