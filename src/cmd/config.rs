//! Configuration view and validation commands — `gridboard config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: std::path::PathBuf, command: Option<ConfigCommands>) -> Result<()> {
    use gridboard::board_config::{CONFIG_FILE, GridboardConfig};

    let config = GridboardConfig::new(project_dir)?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Gridboard Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration. Run 'gridboard init' to create one.");
            }
            println!();

            let toml = &config.toml;
            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!("  db_path = \"{}\"", toml.server.db_path);
            println!("  dev_mode = {}", toml.server.dev_mode);
            println!();
            println!("[sync]");
            println!("  echo_timeout_ms = {}", toml.sync.echo_timeout_ms);
            println!("  channel_capacity = {}", toml.sync.channel_capacity);
            println!();

            if !toml.tables.is_empty() {
                println!("Tables:");
                for table in &toml.tables {
                    let fields: Vec<&str> = table.fields.iter().map(|f| f.name.as_str()).collect();
                    println!("  {} ({})", table.name, fields.join(", "));
                }
                println!();
            }

            if !toml.boards.is_empty() {
                println!("Boards:");
                for board in &toml.boards {
                    println!("  {} on {}", board.name, board.table);
                    println!("    column = {}", board.column_attribute);
                    if let Some(row) = &board.row_attribute {
                        println!("    row = {}", row);
                    }
                    if let Some(path) = &board.swimlane_path {
                        println!("    swimlane = {}", path);
                    }
                    if let Some(position) = &board.position_attribute {
                        println!("    position = {}", position);
                    }
                    println!("    min_role_write = {}", board.min_role_write);
                }
                println!();
            }

            println!("Effective values (with env overrides):");
            println!("  port = {}", toml.port());
            println!("  db = {}", config.db_path().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
