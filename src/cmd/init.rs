//! Project initialization — `gridboard init`.

use anyhow::{Context, Result};

use gridboard::board::db::BoardDb;
use gridboard::board_config::{CONFIG_DIR, CONFIG_FILE, GridboardToml};

pub fn cmd_init(project_dir: &std::path::Path, force: bool) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        println!("{} already exists at {}", CONFIG_FILE, config_path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    let toml = GridboardToml::sample();
    toml.save(&config_path)?;

    let db_path = toml.db_path(&config_dir);
    let db = BoardDb::new(&db_path).context("Failed to initialize board database")?;
    for table in &toml.tables {
        db.upsert_table_schema(table)?;
    }
    tracing::info!(config = %config_path.display(), db = %db_path.display(), "initialized project");

    println!("Initialized gridboard project at {}", config_dir.display());
    println!();
    println!("Created:");
    println!("  {}/", CONFIG_DIR);
    println!("  ├── {}   # Tables and boards", CONFIG_FILE);
    println!("  └── {}", db_path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default());
    println!();
    println!("Next steps:");
    println!("  1. Run `gridboard add tasks --set title=\"First\" --set status=Todo`");
    println!("  2. Run `gridboard show tasks`");
    println!("  3. Run `gridboard serve` to expose the board over HTTP");
    Ok(())
}
