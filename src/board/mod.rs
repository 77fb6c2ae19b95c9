//! Board engine: grouping, ordering and real-time sync of record grids.
//!
//! ## Overview
//!
//! A board shows the records of one table as a grid. Each record lands in a
//! cell chosen by its row attribute, its column attribute and optionally a
//! swimlane value reached through a join path. Within a cell, records are
//! ordered by a sparse numeric position; the order of whole columns and rows
//! is persisted per board. Every mutation is broadcast to all viewers of the
//! board, and each viewer consumes the echo of its own edits.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Viewer  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │viewer.rs │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!      │                │         v                                        │
//!  SyncSession          │  service.rs  (BoardService: authorize, mutate,   │
//!  (sync.rs)            │              broadcast)                          │
//!                       │     │            │              │                │
//!                       │     v            v              v                │
//!                       │  grouping.rs  position.rs    db.rs (SQLite)      │
//!                       │  join_path.rs order.rs       ws.rs (channels)    │
//!                       │     └──── layout.rs (BoardGrid) ────┘            │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `models`    | `GroupKey`, `Item`, `CellKey`, `Axis`, schemas, relations |
//! | `join_path` | Parse and resolve `a`, `a.b`, `a.b.c` swimlane paths      |
//! | `grouping`  | `GroupingConfig` validation and `group_board`             |
//! | `position`  | Sparse position allocation with renumbering               |
//! | `order`     | `merge_order` / `set_order` for axis orders               |
//! | `layout`    | `BoardGrid`: grouped cells laid out along ordered axes    |
//! | `sync`      | `ChangeEvent`, `SyncSession` echo suppression             |
//! | `ws`        | Per-board broadcast channels + WebSocket fan-out          |
//! | `db`        | SQLite access via `DbHandle` (thin `Arc<Mutex<_>>`)       |
//!
//! ## Typical Request Flow (drag an item)
//!
//! 1. The viewer arms its suppress flag and places the item optimistically.
//! 2. `POST /api/boards/{board}/move` → `BoardService::move_item`.
//! 3. Inside one storage closure: the item's new cell is computed, siblings
//!    missing a position are seeded, and a position ahead of `before_id` is
//!    allocated (renumbering the cell when the gap is exhausted).
//! 4. An `update` event carrying the viewer's origin goes out on the board
//!    channel. The originating viewer consumes it; every other viewer
//!    re-fetches and re-groups.

pub mod api;
pub mod db;
pub mod grouping;
pub mod join_path;
pub mod layout;
pub mod models;
pub mod order;
pub mod position;
pub mod server;
pub mod service;
pub mod sync;
pub mod viewer;
pub mod ws;
