use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{ConfigError, IndexRegistry, SimulationConfig, run_monte_carlo, simulate};

const DEFAULT_TRIALS: u32 = 1_000;
const MAX_TRIALS: u32 = 20_000;

#[derive(Parser, Debug)]
#[command(
    name = "zinseszins",
    about = "German wealth projection: savings plans, fund taxation and withdrawal strategies"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one projection and print the result as JSON.
    Simulate {
        #[arg(long, help = "Path to a JSON simulation config")]
        config: PathBuf,
        #[arg(long, help = "Print single-line JSON")]
        compact: bool,
    },
    /// Repeat a stochastic projection and print percentiles.
    MonteCarlo {
        #[arg(long, help = "Path to a JSON simulation config")]
        config: PathBuf,
        #[arg(long, default_value_t = DEFAULT_TRIALS)]
        trials: u32,
        #[arg(long)]
        seed: Option<u64>,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve { port } => run_http_server(port).await.context("HTTP server stopped"),
        Command::Simulate { config, compact } => {
            let config = load_config(&config)?;
            let output = simulate(&config)?;
            print_json(&output, compact)
        }
        Command::MonteCarlo {
            config,
            trials,
            seed,
        } => {
            let config = load_config(&config)?;
            let result = run_monte_carlo(&config, trials, seed)?;
            print_json(&result, false)
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<SimulationConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> anyhow::Result<()> {
    let json = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{json}");
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API listening");

    axum::serve(listener, router()).await
}

pub fn router() -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .route("/api/indices", get(indices_handler))
        .fallback(not_found_handler)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonteCarloRequest {
    config: SimulationConfig,
    #[serde(default)]
    trials: Option<u32>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexSummary {
    id: String,
    name: String,
    first_year: Option<i32>,
    last_year: Option<i32>,
    average_return: f64,
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(body: String) -> Response {
    simulate_response(&body)
}

async fn monte_carlo_handler(body: String) -> Response {
    monte_carlo_response(&body)
}

async fn indices_handler() -> Response {
    json_response(StatusCode::OK, index_summaries(&IndexRegistry::builtin()))
}

fn simulate_response(body: &str) -> Response {
    let config = match config_from_json(body) {
        Ok(config) => config,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match simulate(&config) {
        Ok(output) => json_response(StatusCode::OK, output),
        Err(err) => config_error_response(&err),
    }
}

fn monte_carlo_response(body: &str) -> Response {
    let request = match serde_json::from_str::<MonteCarloRequest>(body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid API JSON payload: {e}"),
            );
        }
    };
    let trials = request.trials.unwrap_or(DEFAULT_TRIALS);
    if trials > MAX_TRIALS {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("trials must be at most {MAX_TRIALS}"),
        );
    }
    match run_monte_carlo(&request.config, trials, request.seed) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(err) => config_error_response(&err),
    }
}

fn config_from_json(json: &str) -> Result<SimulationConfig, String> {
    serde_json::from_str::<SimulationConfig>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))
}

fn index_summaries(registry: &IndexRegistry) -> Vec<IndexSummary> {
    registry
        .iter()
        .map(|index| IndexSummary {
            id: index.id.clone(),
            name: index.name.clone(),
            first_year: index.first_year(),
            last_year: index.last_year(),
            average_return: index.average_return(),
        })
        .collect()
}

fn config_error_response(err: &ConfigError) -> Response {
    warn!(error = %err, "rejected configuration");
    error_response(StatusCode::BAD_REQUEST, &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
