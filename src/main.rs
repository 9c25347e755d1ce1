//! gatekeeper command line.
//!
//! Runs the request guards against ad-hoc input, for checking a
//! configuration before deploying it.
//!
//! ```text
//! gatekeeper [--config guard.toml] check-sql "SELECT * FROM games"
//! gatekeeper check-path reports/summary.csv
//! gatekeeper check-request --client alice request.json
//! gatekeeper show-config
//! ```
//!
//! Exit code 0 when the input is accepted, 1 when it is rejected.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use gatekeeper::config::loader::load_config;
use gatekeeper::config::GuardConfig;
use gatekeeper::observability::logging;
use gatekeeper::security::{PathValidator, SecurityDecision, SecurityManager, SqlValidator};

#[derive(Parser)]
#[command(name = "gatekeeper")]
#[command(about = "Validate queries, paths and requests against the guard configuration", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a SQL query
    CheckSql { query: String },
    /// Validate a file path against the project root
    CheckPath { path: String },
    /// Validate a JSON request payload from a file, or `-` for stdin
    CheckRequest {
        #[arg(long, default_value = "cli")]
        client: String,
        input: String,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };
    logging::init(&config.observability);

    let decision = match cli.command {
        Commands::CheckSql { query } => {
            let result = SqlValidator::new(&config.sql).validate(&query);
            decision_from(result)
        }
        Commands::CheckPath { path } => {
            let result = PathValidator::new(&config.path).validate(&path);
            if let Ok(resolved) = &result {
                tracing::debug!(resolved = %resolved.display(), "Path resolved");
            }
            decision_from(result)
        }
        Commands::CheckRequest { client, input } => {
            let payload: serde_json::Value = serde_json::from_str(&read_input(&input)?)?;
            SecurityManager::from_config(&config).validate_request(&client, &payload)
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(ExitCode::SUCCESS);
        }
    };

    print_json(&decision)?;
    Ok(if decision.allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn decision_from<T>(result: Result<T, gatekeeper::security::ValidationError>) -> SecurityDecision {
    match result {
        Ok(_) => SecurityDecision::allow(),
        Err(e) => SecurityDecision::deny(e.category, e.reason),
    }
}

fn read_input(input: &str) -> std::io::Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
