use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use testgraph::cli::commands::{self, PlanOptions, RunOptions};

#[derive(Parser)]
#[command(name = "testgraph", about = "Dependency-graph test scheduler", version)]
struct Cli {
    /// Raise log and console verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the batch order a manifest would run in, without running it
    Plan {
        /// Manifest file
        manifest: PathBuf,

        /// Run config file (.yaml or .json), replacing the manifest's own
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format: yaml, json
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check dependency resolution and cycles
    Validate {
        /// Manifest files
        manifests: Vec<PathBuf>,

        /// Run config file (.yaml or .json), replacing the manifest's own
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run a manifest's scripted units and print the report
    Run {
        /// Manifest file
        manifest: PathBuf,

        /// Run config file (.yaml or .json), replacing the manifest's own
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format: yaml, json, junit
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Parallel mode: none, methods, classes, instances
        #[arg(long)]
        parallel: Option<String>,

        /// Pool thread count
        #[arg(long)]
        threads: Option<usize>,

        /// Per-test deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Plan {
            manifest,
            config,
            format,
            output,
        }) => {
            let options = PlanOptions {
                manifest,
                config,
                format,
                output,
            };
            match commands::run_plan(&options) {
                Ok(result) => print!("{result}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Validate { manifests, config }) => {
            if manifests.is_empty() {
                eprintln!("error: no manifest files provided");
                std::process::exit(1);
            }
            match commands::run_validate(&manifests, config.as_ref()) {
                Ok(result) => println!("{result}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Run {
            manifest,
            config,
            format,
            output,
            parallel,
            threads,
            timeout_ms,
        }) => {
            let options = RunOptions {
                manifest,
                config,
                format,
                output,
                parallel,
                threads,
                timeout_ms,
                verbose: cli.verbose,
            };
            match commands::run_run(options) {
                Ok(true) => {}
                Ok(false) => std::process::exit(1),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(2);
                }
            }
        }
        None => {
            // No subcommand: show help
            Cli::parse_from(["testgraph", "--help"]);
        }
    }
}
