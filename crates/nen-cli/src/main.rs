//! nen: run agent flows from the command line
//!
//! Drives the same create -> execute -> stats lifecycle that foreign callers
//! use through libnen, but through the typed Rust API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nen::{Config, Executor, FlowHandle, FlowRegistry, FlowStats, StatsReporter};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nen")]
#[command(about = "Minimal agent-flow engine", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to nen.toml (defaults to $NEN_CONFIG or the nearest nen.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create and run the demo agents
    Demo,

    /// Create, execute and report a single flow
    Run {
        /// Agent name
        #[arg(short, long)]
        name: String,

        /// Agent instructions
        #[arg(short, long, default_value = "")]
        instructions: String,

        /// Print stats as JSON
        #[arg(long)]
        json: bool,

        /// Print the step transcript
        #[arg(long)]
        transcript: bool,
    },

    /// Print the effective configuration
    Config,
}

const DEMO_AGENTS: &[(&str, &str)] = &[
    ("Code Assistant", "Help with coding and debugging"),
    ("Creative Writer", "Assist with creative writing"),
    ("Business Analyst", "Provide business insights"),
];

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::try_load().unwrap_or_else(Config::default_minimal),
    };

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&config.logging.filter)
            .with_context(|| format!("Invalid log filter '{}'", config.logging.filter))?
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Demo) | None => run_demo(config),
        Some(Commands::Run {
            name,
            instructions,
            json,
            transcript,
        }) => run_single(config, &name, &instructions, json, transcript),
        Some(Commands::Config) => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

struct Session {
    registry: FlowRegistry,
    executor: Executor,
}

impl Session {
    fn new(config: Config) -> Self {
        let executor = Executor::new(config.executor.clone());
        Self {
            registry: FlowRegistry::new(config),
            executor,
        }
    }

    fn create_agent(&self, name: &str, instructions: &str) -> Result<FlowHandle> {
        println!("Creating agent: {}", name);
        println!("Instructions: {}", instructions);

        self.registry
            .create(name, instructions)
            .with_context(|| format!("Failed to create agent flow '{}'", name))
    }

    /// Returns false when the flow failed; the failure is reported, not raised
    fn execute(&self, handle: FlowHandle) -> bool {
        println!("Executing flow...");

        match self.executor.execute(&self.registry, handle) {
            Ok(report) => {
                println!(
                    "Flow completed in {:.2} ms ({} steps)",
                    report.duration.as_secs_f64() * 1000.0,
                    report.steps
                );
                true
            }
            Err(e) => {
                println!("Flow execution failed: {}", e);
                false
            }
        }
    }

    fn stats(&self, handle: FlowHandle) -> Option<FlowStats> {
        match StatsReporter::snapshot(&self.registry, handle) {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!("Stats unavailable: {}", e);
                None
            }
        }
    }
}

fn run_demo(config: Config) -> Result<()> {
    let session = Session::new(config);

    println!("Nen agent-flow demo");
    println!("{}", "=".repeat(60));

    println!("\n1. Agent Demo");
    println!("{}", "-".repeat(20));

    let agent = session.create_agent(
        "Research Assistant",
        "You are a research assistant. Help users find information and answer questions.",
    )?;
    if session.execute(agent) {
        print_stats(session.stats(agent).as_ref());
    }

    println!("\n2. Multiple Agents Demo");
    println!("{}", "-".repeat(30));

    for (name, instructions) in DEMO_AGENTS {
        let agent = session.create_agent(name, instructions)?;
        session.execute(agent);
        print_stats(session.stats(agent).as_ref());
    }

    println!(
        "\nDemo completed: {} flows live",
        session.registry.live_count()
    );
    Ok(())
}

fn run_single(
    config: Config,
    name: &str,
    instructions: &str,
    json: bool,
    transcript: bool,
) -> Result<()> {
    let session = Session::new(config);
    let handle = session.create_agent(name, instructions)?;
    let succeeded = session.execute(handle);

    let stats = session.stats(handle);
    if json {
        let stats = stats.context("Stats unavailable")?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(stats.as_ref());
    }

    if transcript {
        let lines = session.registry.with_flow(handle, |r| r.transcript.clone())?;
        for line in lines {
            println!("  {}", line);
        }
    }

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn print_stats(stats: Option<&FlowStats>) {
    match stats {
        Some(stats) => {
            println!("Stats: status={}", stats.status);
            println!("  executions:    {}", stats.execution_count);
            println!("  failures:      {}", stats.failure_count);
            println!("  steps:         {}", stats.steps_completed);
            println!("  last duration: {:.3} ms", stats.last_duration_ms);
            if let Some(err) = &stats.last_error {
                println!("  last error:    {}", err);
            }
        }
        None => println!("Stats: failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "nen",
            "run",
            "--name",
            "Research Assistant",
            "--instructions",
            "Help users find information.",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Run { name, json, .. }) => {
                assert_eq!(name, "Research Assistant");
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_defaults_to_demo() {
        let cli = Cli::try_parse_from(["nen", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_session_lifecycle() {
        let session = Session::new(Config::default_minimal());
        let handle = session
            .create_agent("Research Assistant", "Help users find information.")
            .unwrap();

        assert!(session.execute(handle));
        let stats = session.stats(handle).unwrap();
        assert_eq!(stats.execution_count, 1);
        assert_eq!(stats.steps_completed, 1);
    }

    #[test]
    fn test_session_reports_failure() {
        let mut config = Config::default_minimal();
        config.executor.max_steps = 1;
        let session = Session::new(config);
        let handle = session.create_agent("Long", "One. Two.").unwrap();

        assert!(!session.execute(handle));
        let stats = session.stats(handle).unwrap();
        assert_eq!(stats.failure_count, 1);
        assert!(stats.last_error.is_some());
    }
}
