#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use clap::{Parser, Subcommand};

/// faultline operator CLI -- inspect the event store and the daemon's config.
#[derive(Parser)]
#[command(name = "faultline", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show event store counts (default when no subcommand is given).
    Status {
        /// Output JSON.
        #[arg(short = 'j', long, default_value_t = false)]
        json: bool,
    },

    /// Check config, storage directory, and bind address.
    Doctor {
        /// Exit non-zero if any checks fail.
        #[arg(short = 'S', long, default_value_t = false)]
        strict: bool,
        /// Output JSON.
        #[arg(short = 'j', long, default_value_t = false)]
        json: bool,
        /// Write JSON artifact to this file path.
        #[arg(short = 'o', long = "out")]
        out: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => {
            commands::status::run(false).await?;
        }
        Some(Commands::Status { json }) => {
            commands::status::run(json).await?;
        }
        Some(Commands::Doctor { strict, json, out }) => {
            commands::doctor::run(strict, json, out.as_deref()).await?;
        }
    }

    Ok(())
}
