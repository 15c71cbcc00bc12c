// Toolgate - Main Entry Point
//
// CLI over the gated executor:
// - run: execute an allowlisted tool invocation
// - resolve: show which binary would be used
// - allowlist: print the permitted subcommands
// - launch: start a long-running tool in the background

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use toolgate::config::Config;
use toolgate::tools::{ExecutionOptions, ToolExecutor, ToolId};
use tracing::debug;

/// Toolgate: allowlisted execution of forge, cast and anvil
#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(author = "Toolgate Contributors")]
#[command(version)]
#[command(about = "Allowlisted, injection-safe execution of the Foundry toolchain", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.config/toolgate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a tool and print its output
    Run {
        #[arg(value_enum)]
        tool: ToolId,

        /// Working directory (default: the discovered project root)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Extra environment variable, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,

        /// Tool arguments, starting with the subcommand
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
    /// Print the binary that would be used for a tool
    Resolve {
        #[arg(value_enum)]
        tool: ToolId,

        /// Print JSON instead of a bare path
        #[arg(long)]
        json: bool,
    },
    /// Print the allowlisted subcommands
    Allowlist {
        #[arg(value_enum)]
        tool: Option<ToolId>,

        #[arg(long)]
        json: bool,
    },
    /// Start a tool in the background and print its PID
    Launch {
        #[arg(value_enum)]
        tool: ToolId,

        #[arg(long)]
        cwd: Option<PathBuf>,

        #[arg(long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,

        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn options(
    cwd: Option<PathBuf>,
    timeout_ms: Option<u64>,
    env: Vec<(String, String)>,
) -> ExecutionOptions {
    ExecutionOptions {
        working_directory: cwd,
        timeout_ms,
        environment_overrides: env.into_iter().collect(),
        structural_args: None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    toolgate::logging::init(&config.logging, args.verbose)?;
    debug!(?config, "Configuration loaded");

    let executor = ToolExecutor::from_config(&config)?;

    match args.command {
        Commands::Run {
            tool,
            cwd,
            timeout_ms,
            env,
            args,
        } => {
            let result = executor
                .execute(tool, &args, options(cwd, timeout_ms, env))
                .await?;
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
        }
        Commands::Resolve { tool, json } => {
            let resolved = executor.resolve(tool).await?;
            if json {
                println!(
                    "{}",
                    json!({
                        "tool": tool,
                        "path": resolved.path,
                        "verified": resolved.is_verified(),
                    })
                );
            } else {
                println!("{}", resolved.path.display());
            }
        }
        Commands::Allowlist { tool, json } => {
            let tools: Vec<ToolId> = match tool {
                Some(tool) => vec![tool],
                None => ToolId::ALL.to_vec(),
            };
            let table: BTreeMap<String, Vec<&str>> = tools
                .iter()
                .map(|tool| (tool.to_string(), executor.allowlist().subcommands(*tool)))
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                for (tool, subcommands) in &table {
                    println!("{}: {}", tool, subcommands.join(" "));
                }
            }
        }
        Commands::Launch {
            tool,
            cwd,
            env,
            args,
        } => {
            let launched = executor
                .launch_detached(tool, &args, options(cwd, None, env))
                .await?;
            println!("{}", launched.pid);
        }
    }

    Ok(ExitCode::SUCCESS)
}
