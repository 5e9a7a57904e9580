//! pget CLI - Parallel segmented FTP downloader
//!
//! Fetches one file over several FTP sessions at once and stitches the
//! segments together into a single local file.

mod commands;
mod config;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pget - Parallel FTP Downloader
#[derive(Parser)]
#[command(name = "pget")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file
    #[arg(long, env = "PGET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human", global = true)]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file
    Get {
        /// ftp://[user[:password]@]host[:port]/path
        url: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of parallel sessions
        #[arg(short, long)]
        segments: Option<u32>,

        /// Login name, overrides the URL
        #[arg(short, long)]
        user: Option<String>,

        /// Login password, overrides the URL
        #[arg(long, env = "PGET_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Show the size of a remote file
    Probe {
        /// ftp://[user[:password]@]host[:port]/path
        url: String,

        /// Login name, overrides the URL
        #[arg(short, long)]
        user: Option<String>,

        /// Login password, overrides the URL
        #[arg(long, env = "PGET_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose {
            "warn,pget_core=debug,pget=debug"
        } else {
            "warn"
        })
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = config::settings_path(cli.config);

    match cli.command {
        Commands::Get {
            url,
            output,
            segments,
            user,
            password,
        } => {
            let settings = config::load(&config_path)?;
            commands::get(settings, &url, output, segments, user, password, cli.output).await?
        }

        Commands::Probe {
            url,
            user,
            password,
        } => {
            let settings = config::load(&config_path)?;
            commands::probe(settings, &url, user, password, cli.output).await?
        }

        Commands::Config { action } => commands::config_action(&config_path, action, cli.output)?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "pget", &mut std::io::stdout());
        }
    }

    Ok(())
}
