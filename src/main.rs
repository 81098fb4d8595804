use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use git_http_push::{
    commands::push::{self, PushContext},
    config::PushConfig,
    repository::Repository,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "git-http-push", version, about = "Push a branch over smart HTTP")]
struct Cli {
    /// Repository (working tree or git directory)
    #[arg(long, global = true, default_value = ".")]
    git_dir: PathBuf,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Push a local branch to its configured upstream
    Push {
        /// Local branch name
        branch: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = PushConfig::load().context("Failed to load configuration")?;
    if let Some(secs) = cli.timeout {
        if secs == 0 {
            anyhow::bail!("--timeout must be positive");
        }
        settings.timeout_secs = secs;
    }

    let repo = Repository::open(&cli.git_dir)?;
    let config = repo.config();
    let store = repo.object_store();
    let ctx = PushContext {
        config: &config,
        resolver: &repo,
        store: &store,
        settings: &settings,
    };

    match cli.command {
        Command::Push { branch } => push::handle(&ctx, &branch, &mut std::io::stdout().lock()),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
