use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "gridboard")]
#[command(version, about = "Real-time grouped record boards")]
pub struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .gridboard/gridboard.toml with a sample board
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Serve the HTTP API and board event channels
    Serve {
        /// Port to serve on (overrides gridboard.toml and GRIDBOARD_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local front-end)
        #[arg(long)]
        dev: bool,
    },
    /// Print a board as text
    Show {
        board: String,

        /// Pin the swimlane path's first segment to this value
        #[arg(long)]
        swimlane: Option<String>,

        /// Only show these columns (comma-separated)
        #[arg(long)]
        columns: Option<String>,

        /// Print the grid as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an item to a board's table
    Add {
        board: String,

        /// Attribute assignments, `name=value` (JSON values are parsed)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,

        #[arg(long, default_value_t = 1)]
        role: u8,
    },
    /// Move an item into a cell
    Move {
        board: String,
        item: i64,

        /// Target column
        #[arg(long)]
        column: String,

        /// Target row (keeps the current row when absent)
        #[arg(long)]
        row: Option<String>,

        /// Target swimlane (plain swimlane attributes only)
        #[arg(long)]
        swimlane: Option<String>,

        /// Place ahead of this item; appends when absent
        #[arg(long)]
        before: Option<i64>,

        #[arg(long, default_value_t = 1)]
        role: u8,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate boards against their table schemas
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    gridboard::logging::init_subscriber(cli.verbose, cli.log_json)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Init { force } => cmd::cmd_init(&project_dir, force)?,
        Commands::Serve { port, dev } => cmd::cmd_serve(project_dir, port, dev).await?,
        Commands::Show {
            board,
            swimlane,
            columns,
            json,
        } => cmd::cmd_show(project_dir, &board, swimlane, columns, json).await?,
        Commands::Add { board, set, role } => cmd::cmd_add(project_dir, &board, &set, role).await?,
        Commands::Move {
            board,
            item,
            column,
            row,
            swimlane,
            before,
            role,
        } => {
            let target = cmd::MoveTarget {
                column,
                row,
                swimlane,
                before,
            };
            cmd::cmd_move(project_dir, &board, item, target, role).await?
        }
        Commands::Config { command } => cmd::cmd_config(project_dir, command)?,
    }

    Ok(())
}
