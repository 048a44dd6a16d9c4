//! push-dispatch CLI - host-facing entry points of the dispatch engine.
//!
//! This is the main binary entry point. See the `push_dispatch` library
//! for the core functionality.

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use push_dispatch::commands::{self, notify::NotifyArgs};
use push_dispatch::{Config, Mode};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "push-dispatch")]
#[command(version = VERSION)]
#[command(about = "Push notification dispatch for registered devices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a device token for a recipient
    Register {
        /// Device token as reported by the device
        token: String,
        /// Recipient identifier
        #[arg(long)]
        owner: i64,
        /// Environment of the app build: P (production) or D (development)
        #[arg(long, default_value = "P")]
        mode: Mode,
    },
    /// Unregister a device token, or every token of a recipient
    Unregister {
        /// Device token in any spelling
        #[arg(required_unless_present = "owner")]
        token: Option<String>,
        /// Remove all tokens of this recipient instead
        #[arg(long, conflicts_with = "token")]
        owner: Option<i64>,
        /// Only remove rows of this environment
        #[arg(long)]
        mode: Option<Mode>,
    },
    /// List the tokens registered for a recipient
    Tokens {
        /// Recipient identifier
        owner: i64,
    },
    /// Send a notification to every device of a recipient
    Notify {
        /// Recipient identifier
        owner: i64,
        /// Notification title
        title: String,
        /// Notification body
        body: String,
        /// Host-side notification identifier
        #[arg(long, default_value_t = 0)]
        id: u32,
        /// Badge count
        #[arg(long, default_value_t = 0)]
        badge: u32,
        /// Deliver silently
        #[arg(long)]
        no_sound: bool,
        /// Extra payload data as a JSON object
        #[arg(long)]
        extra: Option<String>,
    },
    /// Delete tokens not refreshed in the last three months
    PurgeStale,
    /// Run scheduled maintenance: stale purge plus feedback reconciliation
    Feedback,
    /// Show the effective configuration (secrets omitted)
    Config,
}

fn init_logging() {
    let builder_env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(builder_env);
    builder.format_timestamp_secs();

    // PUSH_DISPATCH_LOG_FILE redirects logs away from the command output
    if let Ok(path) = std::env::var("PUSH_DISPATCH_LOG_FILE") {
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}; logging to stderr", path, e),
        }
    }

    builder.init();
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Register { token, owner, mode } => {
            commands::tokens::register(&config, &token, owner, mode)?;
        }
        Commands::Unregister { token, owner, mode } => match (token, owner) {
            (Some(token), _) => commands::tokens::unregister(&config, &token, mode)?,
            (None, Some(owner)) => commands::tokens::unregister_owner(&config, owner, mode)?,
            (None, None) => anyhow::bail!("Give a token or --owner"),
        },
        Commands::Tokens { owner } => {
            commands::tokens::list(&config, owner)?;
        }
        Commands::Notify {
            owner,
            title,
            body,
            id,
            badge,
            no_sound,
            extra,
        } => {
            let args = NotifyArgs {
                owner_id: owner,
                id,
                title,
                body,
                badge,
                sound: !no_sound,
                extra,
            };
            commands::notify::run(&config, &args)?;
        }
        Commands::PurgeStale => {
            commands::tokens::purge_stale(&config)?;
        }
        Commands::Feedback => {
            commands::maintenance::run(&config)?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
