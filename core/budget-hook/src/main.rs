//! budget-hook: CLI bridge between the browser integration and the budget
//! daemon.
//!
//! The view layer calls it on every focus change and navigation; settings
//! and status surfaces call it to read or edit the budget. Answers are
//! printed to stdout as JSON.
//!
//! ## Subcommands
//!
//! - `activated`, `deactivated`, `settled`, `closed`: view events
//! - `sync`: full snapshot of open views (reads JSON from stdin)
//! - `status`: current budget
//! - `set-limit`: edit the daily limit
//! - `reset`: restore today's full budget
//! - `redirects`: drain pending redirects to the blocking target
//! - `health`: whether the daemon is reachable

mod budget;
mod daemon_client;
mod logging;
mod view;

use clap::{ArgGroup, Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "budget-hook")]
#[command(about = "Daily usage-budget tracker bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// A view became frontmost
    Activated {
        #[arg(value_name = "VIEW_ID")]
        view_id: u64,

        /// Destination the view currently shows, if known
        #[arg(long)]
        url: Option<String>,
    },

    /// The frontmost view lost focus without another view gaining it
    Deactivated {
        #[arg(value_name = "VIEW_ID")]
        view_id: u64,
    },

    /// A view navigated or finished loading
    Settled {
        #[arg(value_name = "VIEW_ID")]
        view_id: u64,

        #[arg(value_name = "URL")]
        url: String,

        /// The page has not finished loading yet
        #[arg(long)]
        loading: bool,
    },

    /// A view was closed
    Closed {
        #[arg(value_name = "VIEW_ID")]
        view_id: u64,
    },

    /// Replace the session with the open views read from stdin
    Sync,

    /// Print the current budget
    Status,

    /// Set the daily limit
    #[command(group(ArgGroup::new("limit").required(true).args(["minutes", "seconds"])))]
    SetLimit {
        #[arg(long)]
        minutes: Option<String>,

        #[arg(long)]
        seconds: Option<i64>,
    },

    /// Restore the full budget for today
    Reset,

    /// Print and clear pending redirects
    Redirects,

    /// Check whether the daemon is enabled and reachable
    Health,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Activated { view_id, url } => view::report(view::activated(view_id, url)),
        Commands::Deactivated { view_id } => view::report(view::deactivated(view_id)),
        Commands::Settled {
            view_id,
            url,
            loading,
        } => view::report(view::settled(view_id, url, loading)),
        Commands::Closed { view_id } => view::report(view::closed(view_id)),
        Commands::Sync => view::sync(),
        Commands::Status => budget::status(),
        Commands::SetLimit { minutes, seconds } => budget::set_limit(minutes, seconds),
        Commands::Reset => budget::reset(),
        Commands::Redirects => budget::redirects(),
        Commands::Health => Ok(budget::health()),
    };

    match result {
        Ok(value) => print_json(&value),
        Err(e) => {
            tracing::error!(error = %e, "budget-hook failed");
            eprintln!("budget-hook: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode output");
            std::process::exit(1);
        }
    }
}
