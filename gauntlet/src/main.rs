use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use gauntlet::cli;
use gauntlet::io::config::{ConfigOverrides, DEFAULT_CONFIG_PATH};
use gauntlet::logging;

#[derive(Parser)]
#[command(
    name = "gauntlet",
    version,
    about = "Measure how reliably a model passes mechanically checked tasks"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log progress at info level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every selected task x strategy pairing.
    Run {
        #[command(flatten)]
        overrides: OverrideArgs,

        /// Run identifier (default: local timestamp YYYYMMDD_HHMMSS).
        #[arg(long)]
        run_id: Option<String>,

        /// Provenance tag recorded with the run (default: git HEAD).
        #[arg(long)]
        provenance: Option<String>,
    },
    /// Regenerate report.md and results.csv for a recorded run.
    Report {
        run_id: String,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// List available tasks and strategies.
    List,
    /// List models served by the endpoint.
    Models {
        #[command(flatten)]
        overrides: OverrideArgs,
    },
}

#[derive(Args, Debug, Default)]
struct OverrideArgs {
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    max_attempts: Option<u32>,
    /// Per-call timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    temperature: Option<f64>,
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Comma-separated task keys.
    #[arg(long, value_delimiter = ',')]
    tasks: Option<Vec<String>>,
    /// Comma-separated strategy keys.
    #[arg(long, value_delimiter = ',')]
    strategies: Option<Vec<String>>,
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    runs_dir: Option<PathBuf>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            base_url: args.base_url,
            model: args.model,
            max_attempts: args.max_attempts,
            timeout_secs: args.timeout,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            tasks: args.tasks,
            strategies: args.strategies,
            db_path: args.db,
            runs_dir: args.runs_dir,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let repo_root = std::env::current_dir()?;

    match cli.command {
        Command::Run {
            overrides,
            run_id,
            provenance,
        } => cli::run(
            &repo_root,
            &cli.config,
            overrides.into(),
            cli::RunOptions { run_id, provenance },
        ),
        Command::Report { run_id, overrides } => {
            cli::report(&cli.config, overrides.into(), &run_id)
        }
        Command::List => cli::list(),
        Command::Models { overrides } => cli::models(&cli.config, overrides.into()),
    }
}
