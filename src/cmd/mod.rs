//! CLI command implementations.
//!
//! | Module   | Commands handled            |
//! |----------|-----------------------------|
//! | `init`   | `Init`                      |
//! | `serve`  | `Serve`                     |
//! | `board`  | `Show`, `Add`, `Move`       |
//! | `config` | `Config`                    |

pub mod board;
pub mod config;
pub mod init;
pub mod serve;

pub use board::{MoveTarget, cmd_add, cmd_move, cmd_show};
pub use config::cmd_config;
pub use init::cmd_init;
pub use serve::cmd_serve;
