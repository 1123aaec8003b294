//! Alumni invite worker.
//!
//! Runs the invite expiry sweeper on a schedule, performs one-off sweeps,
//! and imports roster files from disk.

use clap::{Parser, Subcommand};
use tracing::{info, Instrument};

mod commands;
mod config;
mod error;
mod logging;

use alumnet_db::{run_migrations, DbPool};
use config::Config;
use error::WorkerResult;

/// Alumni invite worker
#[derive(Parser)]
#[command(name = "alumnet-worker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Apply pending database migrations before running the command
    #[arg(long, global = true)]
    migrate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the expiry sweeper until interrupted
    Run,

    /// Run a single expiry sweep and exit
    Sweep,

    /// Import a roster file and create invites
    Import(commands::ImportArgs),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Run => "run",
            Commands::Sweep => "sweep",
            Commands::Import(_) => "import",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Fail fast on missing or malformed configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(78);
        }
    };

    logging::init_logging(&config.log_filter, config.app_env);
    let span = logging::command_span(cli.command.name());

    span.in_scope(|| {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            env = %config.app_env,
            remote_reviewer = config.reviewer_url.is_some(),
            "Starting alumnet worker"
        );
    });

    if let Err(e) = run(cli, config).instrument(span.clone()).await {
        let _entered = span.enter();
        tracing::error!(error = %e, "Worker command failed");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli, config: Config) -> WorkerResult<()> {
    let pool = DbPool::connect_with(&config.database_url, config.db_max_connections).await?;
    if cli.migrate {
        run_migrations(&pool).await?;
    }

    let ctx = commands::Context::new(config, pool);
    match cli.command {
        Commands::Run => commands::run(&ctx).await,
        Commands::Sweep => commands::sweep(&ctx).await,
        Commands::Import(args) => commands::import(&ctx, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_migrate_flag() {
        let cli = Cli::try_parse_from(["alumnet-worker", "sweep", "--migrate"]).unwrap();
        assert!(cli.migrate);
        assert!(matches!(cli.command, Commands::Sweep));
        assert_eq!(cli.command.name(), "sweep");
    }
}
