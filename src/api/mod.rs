use axum::{
    Json, Router,
    extract::Query,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::core::{
    ConflictPair, GoalOutcome, MoveCategory, MoveUnit, Plan, PlanError, catalog, detect_conflicts,
    load_plan, migrate_plan, simulate, solve_goal,
};

#[derive(Parser, Debug)]
#[command(
    name = "runway",
    about = "Deterministic household finance projection with bear/bull tracks and a goal solver"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, env = "RUNWAY_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Project a plan file year by year.
    Simulate {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
    /// List enabled moves that exclude each other.
    Conflicts {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Find the annual contribution that reaches a target net worth.
    Solve {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, help = "Overrides goal.targetNetWorth")]
        target: Option<f64>,
        #[arg(long, help = "Overrides goal.referenceAge")]
        reference_age: Option<u32>,
        #[arg(long)]
        pretty: bool,
    },
    /// Print the move catalog.
    Moves,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    id: &'static str,
    label: &'static str,
    category: MoveCategory,
    unit: MoveUnit,
    default_amount: f64,
    conflicts_with: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct ConflictsResponse {
    conflicts: Vec<ConflictPair>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SolveQuery {
    target: Option<f64>,
    reference_age: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve { port } => Ok(run_http_server(port).await?),
        command => {
            let output = render_command(&command)?;
            println!("{output}");
            Ok(())
        }
    }
}

/// Output of every command except `serve`.
pub fn render_command(command: &Command) -> Result<String, CliError> {
    match command {
        Command::Serve { .. } => Ok(String::new()),
        Command::Simulate { plan, pretty } => {
            let plan = read_plan(plan)?;
            let result = simulate(&plan)?;
            tracing::info!(
                years = result.years.len(),
                first_failure_age = ?result.summary.first_failure_age,
                "simulated plan"
            );
            encode(&result, *pretty)
        }
        Command::Conflicts { plan } => {
            let plan = read_plan(plan)?;
            let conflicts = detect_conflicts(&plan.moves);
            tracing::info!(conflicts = conflicts.len(), "checked move conflicts");
            encode(&ConflictsResponse { conflicts }, true)
        }
        Command::Solve {
            plan,
            target,
            reference_age,
            pretty,
        } => {
            let plan = with_goal_overrides(read_plan(plan)?, *target, *reference_age);
            let outcome = solve_goal(&plan)?;
            tracing::info!(solved = outcome.is_solved(), "goal solve finished");
            encode(&outcome, *pretty)
        }
        Command::Moves => encode(&catalog_entries(), true),
    }
}

fn read_plan(path: &Path) -> Result<Plan, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(load_plan(&raw)?)
}

fn encode<T: Serialize>(value: &T, pretty: bool) -> Result<String, CliError> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(out)
}

fn with_goal_overrides(mut plan: Plan, target: Option<f64>, reference_age: Option<u32>) -> Plan {
    if let Some(target) = target {
        plan.goal.target_net_worth = target;
    }
    if reference_age.is_some() {
        plan.goal.reference_age = reference_age;
    }
    plan
}

fn catalog_entries() -> Vec<CatalogEntry> {
    catalog()
        .iter()
        .map(|spec| CatalogEntry {
            id: spec.kind.id(),
            label: spec.label,
            category: spec.category,
            unit: spec.unit,
            default_amount: spec.default_amount,
            conflicts_with: spec.conflicts.iter().map(|k| k.id()).collect(),
        })
        .collect()
}

pub fn router() -> Router {
    Router::new()
        .route("/api/moves", get(moves_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/conflicts", post(conflicts_handler))
        .route("/api/solve", post(solve_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "runway HTTP API listening");
    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn moves_handler() -> Response {
    json_response(StatusCode::OK, catalog_entries())
}

async fn simulate_handler(Json(body): Json<Value>) -> Response {
    let result = migrate_plan(body).and_then(|plan| simulate(&plan));
    match result {
        Ok(result) => {
            tracing::info!(years = result.years.len(), "simulate request");
            json_response(StatusCode::OK, result)
        }
        Err(e) => plan_error_response("simulate", &e),
    }
}

async fn conflicts_handler(Json(body): Json<Value>) -> Response {
    match migrate_plan(body) {
        Ok(plan) => json_response(
            StatusCode::OK,
            ConflictsResponse {
                conflicts: detect_conflicts(&plan.moves),
            },
        ),
        Err(e) => plan_error_response("conflicts", &e),
    }
}

async fn solve_handler(Query(query): Query<SolveQuery>, Json(body): Json<Value>) -> Response {
    let outcome: Result<GoalOutcome, PlanError> = migrate_plan(body)
        .map(|plan| with_goal_overrides(plan, query.target, query.reference_age))
        .and_then(|plan| solve_goal(&plan));
    match outcome {
        Ok(outcome) => {
            tracing::info!(solved = outcome.is_solved(), "solve request");
            json_response(StatusCode::OK, outcome)
        }
        Err(e) => plan_error_response("solve", &e),
    }
}

fn plan_error_response(route: &str, err: &PlanError) -> Response {
    tracing::warn!(route, error = %err, "rejected plan");
    error_response(StatusCode::BAD_REQUEST, &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
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
