use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use firesim::api::{SimulatePayload, SimulateResponse, current_year, normalise, run_http_server};
use firesim::core::{SimulationError, SimulationPool};

#[derive(Parser, Debug)]
#[command(
    name = "firesim",
    about = "Monte Carlo retirement sustainability simulator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long, help = "Simulation worker threads, defaults to one per core")]
        threads: Option<usize>,
    },
    /// Simulate a JSON profile and print the result.
    Simulate {
        #[arg(long, help = "Path to a JSON profile using the API payload keys")]
        profile: PathBuf,
        #[arg(long)]
        trials: Option<u32>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Serve { port, threads } => match run_http_server(port, threads).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "server error");
                ExitCode::FAILURE
            }
        },
        Command::Simulate {
            profile,
            trials,
            seed,
            pretty,
        } => simulate(profile, trials, seed, pretty).await,
    }
}

async fn simulate(path: PathBuf, trials: Option<u32>, seed: Option<u64>, pretty: bool) -> ExitCode {
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            error!(path = %path.display(), error = %e, "cannot read profile");
            return ExitCode::FAILURE;
        }
    };
    let mut payload: SimulatePayload = match serde_json::from_str(&raw) {
        Ok(payload) => payload,
        Err(e) => {
            error!(path = %path.display(), error = %e, "invalid profile JSON");
            return ExitCode::from(2);
        }
    };
    payload.trials = trials.or(payload.trials);
    payload.seed = seed.or(payload.seed);

    let (profile, options) = normalise(&payload, current_year());
    let pool = match SimulationPool::new(None) {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "cannot start worker pool");
            return ExitCode::FAILURE;
        }
    };
    info!(path = %path.display(), trials = options.trials, "simulating profile");

    let result = match pool.submit(profile, options).await {
        Ok(result) => result,
        Err(SimulationError::Validation(err)) => {
            for field in &err.errors {
                error!(field = %field.field, "{}", field.issue);
            }
            return ExitCode::from(2);
        }
        Err(e) => {
            error!(error = %e, "simulation failed");
            return ExitCode::FAILURE;
        }
    };

    let response = SimulateResponse::from(result);
    let rendered = if pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    };
    match rendered {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "cannot serialise result");
            ExitCode::FAILURE
        }
    }
}
