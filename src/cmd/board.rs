//! Local board commands — `gridboard show`, `gridboard add`, `gridboard move`.
//!
//! These open the project's database directly, so they work without a
//! running server.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use gridboard::board::db::BoardDb;
use gridboard::board::grouping::GroupingState;
use gridboard::board::models::GroupKey;
use gridboard::board::server::{ServerConfig, open_state};
use gridboard::board::service::{BoardService, MoveRequest};
use gridboard::board_config::GridboardConfig;

pub struct MoveTarget {
    pub column: String,
    pub row: Option<String>,
    pub swimlane: Option<String>,
    pub before: Option<i64>,
}

fn open_service(project_dir: std::path::PathBuf) -> Result<Arc<BoardService>> {
    let config = GridboardConfig::new(project_dir)?;
    let server = ServerConfig::from_config(&config);
    let db = BoardDb::new(&server.db_path).context("Failed to open board database")?;
    Ok(open_state(db, &server)?.service.clone())
}

/// Parse `name=value`. Values that are valid JSON keep their type.
fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("Expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim();
    anyhow::ensure!(!name.is_empty(), "Empty attribute name in '{}'", raw);
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

pub async fn cmd_show(
    project_dir: std::path::PathBuf,
    board: &str,
    swimlane: Option<String>,
    columns: Option<String>,
    json: bool,
) -> Result<()> {
    let service = open_service(project_dir)?;
    let state = GroupingState {
        restrict_columns: columns.map(|c| c.split(',').map(GroupKey::parse_lenient).collect()),
        swimlane_scope: swimlane.map(|s| GroupKey::parse_lenient(&s)),
    };
    let grid = service.load_grid(board, &state).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&grid)?);
    } else {
        print!("{}", grid.render_text());
    }
    Ok(())
}

pub async fn cmd_add(
    project_dir: std::path::PathBuf,
    board: &str,
    set: &[String],
    role: u8,
) -> Result<()> {
    let service = open_service(project_dir)?;
    let mut attributes = Map::new();
    for raw in set {
        let (name, value) = parse_assignment(raw)?;
        attributes.insert(name, value);
    }
    let item = service.create_item(board, role, attributes, None).await?;
    println!("Created item {}", item.id);
    Ok(())
}

pub async fn cmd_move(
    project_dir: std::path::PathBuf,
    board: &str,
    item: i64,
    target: MoveTarget,
    role: u8,
) -> Result<()> {
    let service = open_service(project_dir)?;
    let request = MoveRequest {
        item_id: item,
        row: target.row.as_deref().map(GroupKey::parse_lenient),
        column: GroupKey::parse_lenient(&target.column),
        swimlane: target.swimlane.as_deref().map(GroupKey::parse_lenient),
        before_id: target.before,
        origin: None,
    };
    let outcome = service.move_item(board, role, request).await?;
    if outcome.stale_target {
        println!(
            "Item {} is no longer in that cell; moved item {} to the end instead.",
            target.before.unwrap_or_default(),
            item
        );
    } else {
        println!("Moved item {} to column '{}'", item, outcome.cell.column);
    }
    Ok(())
}
