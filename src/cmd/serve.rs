//! Board server command — `gridboard serve`.

use anyhow::Result;

use gridboard::board::server::{ServerConfig, start_server};
use gridboard::board_config::GridboardConfig;

pub async fn cmd_serve(
    project_dir: std::path::PathBuf,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    let config = GridboardConfig::new(project_dir)?;
    for warning in config.toml.validate() {
        tracing::warn!(%warning, "configuration");
    }

    let mut server = ServerConfig::from_config(&config);
    if let Some(port) = port {
        server.port = port;
    }
    server.dev_mode |= dev;

    start_server(server).await
}
