//! Configuration read from `.gridboard/gridboard.toml`.
//!
//! Layered: file, then environment (`GRIDBOARD_PORT`, `GRIDBOARD_DB`), then
//! CLI flags applied by the caller.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 3141
//! host = "127.0.0.1"
//! db_path = "gridboard.db"
//!
//! [sync]
//! echo_timeout_ms = 5000
//! channel_capacity = 256
//!
//! [[tables]]
//! name = "tasks"
//! fields = [
//!     { name = "title", type = "text" },
//!     { name = "status", type = "options", options = ["Todo", "Doing", "Done"] },
//!     { name = "position", type = "float" },
//! ]
//!
//! [[boards]]
//! name = "tasks"
//! table = "tasks"
//! column_attribute = "status"
//! position_attribute = "position"
//! min_role_write = 10
//! reload_on_drag = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::grouping::GroupingConfig;
use crate::board::models::{FieldDef, FieldKind, Schema, TableSchema};
use crate::errors::BoardResult;

pub const CONFIG_DIR: &str = ".gridboard";
pub const CONFIG_FILE: &str = "gridboard.toml";

/// Role of anonymous requests. Lower numbers are more privileged.
pub const PUBLIC_ROLE: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// SQLite file, relative to the config directory unless absolute.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Permissive CORS for local front-end development.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_port() -> u16 {
    3141
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_path() -> String {
    "gridboard.db".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSection {
    /// How long a viewer waits for the echo of its own mutation.
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
    /// Buffered events per board channel before slow subscribers lag.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_echo_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            echo_timeout_ms: default_echo_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SyncSection {
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }
}

/// One board over one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardDefinition {
    pub name: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_attribute: Option<String>,
    pub column_attribute: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swimlane_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_options: Option<Vec<String>>,
    /// Highest (least privileged) role allowed to write.
    #[serde(default = "default_min_role_write")]
    pub min_role_write: u8,
    /// Viewers re-fetch the board after their own drops instead of keeping
    /// the optimistic placement.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reload_on_drag: bool,
}

fn default_min_role_write() -> u8 {
    1
}

impl BoardDefinition {
    /// Check the definition against the table schema.
    pub fn grouping(&self, schema: &Schema) -> BoardResult<GroupingConfig> {
        GroupingConfig::validate(
            schema,
            &self.table,
            self.row_attribute.as_deref(),
            &self.column_attribute,
            self.swimlane_path.as_deref(),
            self.position_attribute.as_deref(),
            self.column_options.as_deref(),
        )
    }

    pub fn can_write(&self, role: u8) -> bool {
        role <= self.min_role_write
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridboardToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub tables: Vec<TableSchema>,
    #[serde(default)]
    pub boards: Vec<BoardDefinition>,
}

impl GridboardToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse gridboard.toml")
    }

    /// Load `gridboard.toml` from `config_dir`, or defaults if it is missing.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize gridboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Starter configuration written by `gridboard init`.
    pub fn sample() -> Self {
        Self {
            server: ServerSection::default(),
            sync: SyncSection::default(),
            tables: vec![
                TableSchema::new(
                    "tasks",
                    vec![
                        FieldDef::new("title", FieldKind::Text),
                        FieldDef::new(
                            "status",
                            FieldKind::Options {
                                options: vec!["Todo".into(), "Doing".into(), "Done".into()],
                            },
                        ),
                        FieldDef::foreign_key("owner", "people", Some("name")),
                        FieldDef::new("position", FieldKind::Float),
                    ],
                ),
                TableSchema::new("people", vec![FieldDef::new("name", FieldKind::Text)]),
            ],
            boards: vec![BoardDefinition {
                name: "tasks".into(),
                table: "tasks".into(),
                row_attribute: Some("owner".into()),
                column_attribute: "status".into(),
                swimlane_path: None,
                position_attribute: Some("position".into()),
                column_options: None,
                min_role_write: PUBLIC_ROLE,
                reload_on_drag: false,
            }],
        }
    }

    pub fn schema(&self) -> Schema {
        let mut schema = Schema::default();
        for table in &self.tables {
            schema.insert(table.clone());
        }
        schema
    }

    pub fn board(&self, name: &str) -> Option<&BoardDefinition> {
        self.boards.iter().find(|b| b.name == name)
    }

    /// Port, with `GRIDBOARD_PORT` taking precedence over the file.
    pub fn port(&self) -> u16 {
        std::env::var("GRIDBOARD_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.server.port)
    }

    /// Database path, with `GRIDBOARD_DB` taking precedence over the file.
    pub fn db_path(&self, config_dir: &Path) -> PathBuf {
        let raw = std::env::var("GRIDBOARD_DB").unwrap_or_else(|_| self.server.db_path.clone());
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            config_dir.join(path)
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let schema = self.schema();

        let mut names = std::collections::HashSet::new();
        for board in &self.boards {
            if !names.insert(board.name.as_str()) {
                warnings.push(format!("Duplicate board name '{}'", board.name));
            }
            if let Err(e) = board.grouping(&schema) {
                warnings.push(format!("Board '{}': {}", board.name, e));
            }
        }
        if self.sync.echo_timeout_ms == 0 {
            warnings.push("echo_timeout_ms is 0: own echoes will never be suppressed".into());
        }
        if self.sync.channel_capacity == 0 {
            warnings.push("channel_capacity must be at least 1".into());
        }
        warnings
    }
}

/// Configuration for one project directory.
#[derive(Debug, Clone)]
pub struct GridboardConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: GridboardToml,
}

impl GridboardConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = GridboardToml::load_or_default(&config_dir)?;
        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.toml.db_path(&self.config_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let config = GridboardToml::parse("").unwrap();
        assert_eq!(config.server.port, 3141);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.sync.echo_timeout(), Duration::from_secs(5));
        assert!(config.boards.is_empty());
        assert!(!GridboardToml::sample().boards[0].reload_on_drag);
    }

    #[test]
    fn test_parse_full_file() {
        let config = GridboardToml::parse(
            r#"
            [server]
            port = 8080
            dev_mode = true

            [sync]
            echo_timeout_ms = 250

            [[tables]]
            name = "tasks"
            fields = [
                { name = "status", type = "options", options = ["Todo", "Done"] },
                { name = "project", type = "foreign_key", table = "projects", summary_field = "name" },
                { name = "position", type = "float" },
            ]

            [[tables]]
            name = "projects"
            fields = [{ name = "name", type = "text" }]

            [[boards]]
            name = "by-project"
            table = "tasks"
            column_attribute = "status"
            swimlane_path = "project.name"
            position_attribute = "position"
            reload_on_drag = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(config.server.dev_mode);
        assert_eq!(config.sync.echo_timeout_ms, 250);
        let board = config.board("by-project").unwrap();
        assert_eq!(board.min_role_write, 1);
        assert!(board.reload_on_drag);
        assert!(board.can_write(1));
        assert!(!board.can_write(PUBLIC_ROLE));

        let grouping = board.grouping(&config.schema()).unwrap();
        assert!(grouping.swimlane.is_some());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = GridboardToml::parse("[server\nport = 1").unwrap_err();
        assert!(err.to_string().contains("gridboard.toml"));
    }

    #[test]
    fn test_validate_reports_bad_boards() {
        let mut config = GridboardToml::sample();
        let mut broken = config.boards[0].clone();
        broken.swimlane_path = Some("owner.missing".into());
        config.boards.push(broken);
        config.sync.echo_timeout_ms = 0;

        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("Duplicate board name")));
        assert!(warnings.iter().any(|w| w.contains("owner.missing")));
        assert!(warnings.iter().any(|w| w.contains("echo_timeout_ms")));
    }

    #[test]
    fn test_sample_is_valid() {
        let sample = GridboardToml::sample();
        assert!(sample.validate().is_empty(), "{:?}", sample.validate());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let sample = GridboardToml::sample();
        sample.save(&path).unwrap();

        let loaded = GridboardToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = GridboardToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, GridboardToml::default());
    }

    #[test]
    fn test_relative_db_path_resolves_under_config_dir() {
        let config = GridboardToml::default();
        if std::env::var("GRIDBOARD_DB").is_err() {
            assert_eq!(
                config.db_path(Path::new("/srv/.gridboard")),
                PathBuf::from("/srv/.gridboard/gridboard.db")
            );
        }
    }

    #[test]
    fn test_gridboard_config_reads_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        GridboardToml::sample().save(&config_dir.join(CONFIG_FILE)).unwrap();

        let config = GridboardConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.toml.boards.len(), 1);
        assert!(config.config_file().ends_with(".gridboard/gridboard.toml"));
    }
}
