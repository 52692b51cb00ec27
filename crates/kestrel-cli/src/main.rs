use anyhow::Result;
use clap::{Parser, Subcommand};
use kestrel_cli::driver::{self, Report};
use kestrel_cli::Config;
use kestrel_types::GlobalEnv;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kestrel")]
#[command(about = "Kestrel: algebraic effects with shallow handlers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment snapshot to load before checking and update afterwards
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Type-check a module and print the type of each toplevel
    Check {
        /// Path to a JSON-encoded module
        file: PathBuf,
    },

    /// Print the continuation-passing form of each definition and expression
    Lower {
        /// Path to a JSON-encoded module
        file: PathBuf,
    },

    /// Run a module's toplevel expressions and print their values
    Run {
        /// Path to a JSON-encoded module
        file: PathBuf,
    },

    /// Print the default configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let filter = if cli.verbose {
        "debug"
    } else {
        config.log.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Check { file } => {
            let (global, report) = load_and_check(&cli, &config, file)?;
            for line in driver::describe(&global, &report.items) {
                println!("{line}");
            }
            exit_on_errors(&report);
        }
        Commands::Lower { file } => {
            let (_, report) = load_and_check(&cli, &config, file)?;
            exit_on_errors(&report);
            for (name, cps) in driver::lower(&report.items)? {
                println!("{name} = {cps}");
            }
        }
        Commands::Run { file } => {
            let (global, report) = load_and_check(&cli, &config, file)?;
            exit_on_errors(&report);
            for value in driver::run(&global, &report.items, config.limits.max_call_depth)? {
                println!("{value}");
            }
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }
    Ok(())
}

fn load_and_check(cli: &Cli, config: &Config, file: &Path) -> Result<(GlobalEnv, Report)> {
    let module = driver::read_module(file, &config.limits)?;
    let mut global = match &cli.snapshot {
        Some(path) => driver::load_snapshot(path)?,
        None => GlobalEnv::new(),
    };
    let report = driver::check(&mut global, &module)?;
    if let Some(path) = &cli.snapshot {
        driver::save_snapshot(path, &global)?;
    }
    Ok((global, report))
}

fn exit_on_errors(report: &Report) {
    if report.errors.is_empty() {
        return;
    }
    for err in &report.errors {
        eprintln!("Type error: {err}");
    }
    std::process::exit(1);
}
