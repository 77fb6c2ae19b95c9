//! Board operations shared by the HTTP API and the CLI.
//!
//! Every mutation is authorized against the board's `min_role_write`, runs as
//! one read-compute-write closure on the database handle and is then broadcast
//! on the board channel with the caller's origin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::db::{BoardDb, DbHandle};
use super::grouping::{ColumnSource, GroupingConfig, GroupingState, group_board};
use super::join_path::JoinPathResolver;
use super::layout::BoardGrid;
use super::models::{
    Axis, AxisOrders, CellKey, FieldKind, GroupKey, Item, ItemId, Relations, Schema, TableSchema,
    deserialize_present_key,
};
use super::order::set_order;
use super::position::{Slot, allocate, seed_missing_positions, slots_of};
use super::sync::{ChangeEvent, ChangeKind};
use super::ws::BoardChannels;
use crate::board_config::BoardDefinition;
use crate::errors::{BoardError, BoardResult};

/// A board whose definition passed validation.
#[derive(Debug, Clone)]
pub struct RegisteredBoard {
    pub definition: BoardDefinition,
    pub grouping: GroupingConfig,
}

/// Items of a board plus the related rows its grouping reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardData {
    pub items: Vec<Item>,
    #[serde(default)]
    pub relations: Relations,
}

/// A board's definition with the schema it is validated against. Viewers
/// build their grouping from this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub definition: BoardDefinition,
    pub schema: Schema,
}

impl BoardInfo {
    pub fn grouping(&self) -> BoardResult<GroupingConfig> {
        self.definition.grouping(&self.schema)
    }
}

/// Drag-drop of one item into a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub item_id: ItemId,
    /// Target row; absent keeps the item's current row, `null` unallocates.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present_key"
    )]
    pub row: Option<GroupKey>,
    pub column: GroupKey,
    /// Target swimlane; only written when the swimlane path is a plain attribute.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present_key"
    )]
    pub swimlane: Option<GroupKey>,
    /// Drop ahead of this item; absent appends.
    #[serde(default)]
    pub before_id: Option<ItemId>,
    #[serde(default)]
    pub origin: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub item: Item,
    pub cell: CellKey,
    pub position: Option<f64>,
    /// The drop target had left the cell; the item was appended instead.
    pub stale_target: bool,
    /// Other items of the target cell whose positions were rewritten.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub renumbered: Vec<Slot>,
}

pub struct BoardService {
    db: DbHandle,
    schema: RwLock<Schema>,
    boards: RwLock<HashMap<String, Arc<RegisteredBoard>>>,
    channels: Arc<BoardChannels>,
    rng: Arc<Mutex<StdRng>>,
}

impl BoardService {
    pub fn new(db: DbHandle, schema: Schema, channels: Arc<BoardChannels>) -> Self {
        Self {
            db,
            schema: RwLock::new(schema),
            boards: RwLock::new(HashMap::new()),
            channels,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Deterministic positions, for tests.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            ..self
        }
    }

    /// Load the schema from storage and register every valid board. Boards
    /// that fail validation are logged and skipped.
    pub fn open(
        db: DbHandle,
        definitions: &[BoardDefinition],
        channels: Arc<BoardChannels>,
    ) -> anyhow::Result<Self> {
        let schema = db.lock_sync()?.load_schema()?;
        let service = Self::new(db, schema, channels);
        for definition in definitions {
            if let Err(e) = service.register(definition.clone()) {
                tracing::error!(board = %definition.name, error = %e, "board not registered");
            }
        }
        Ok(service)
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn channels(&self) -> &Arc<BoardChannels> {
        &self.channels
    }

    /// Validate a definition against the schema and make the board available.
    pub fn register(&self, definition: BoardDefinition) -> BoardResult<()> {
        let grouping = {
            let schema = self.schema.read().map_err(poisoned)?;
            definition.grouping(&schema)?
        };
        tracing::info!(board = %definition.name, table = %definition.table, "registered board");
        self.boards.write().map_err(poisoned)?.insert(
            definition.name.clone(),
            Arc::new(RegisteredBoard {
                definition,
                grouping,
            }),
        );
        Ok(())
    }

    /// Definitions of all registered boards, sorted by name.
    pub fn list_boards(&self) -> BoardResult<Vec<BoardDefinition>> {
        let boards = self.boards.read().map_err(poisoned)?;
        let mut defs: Vec<BoardDefinition> =
            boards.values().map(|b| b.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    pub fn board(&self, name: &str) -> BoardResult<Arc<RegisteredBoard>> {
        self.boards
            .read()
            .map_err(poisoned)?
            .get(name)
            .cloned()
            .ok_or_else(|| BoardError::BoardNotFound {
                name: name.to_string(),
            })
    }

    pub fn board_info(&self, name: &str) -> BoardResult<BoardInfo> {
        let definition = self.board(name)?.definition.clone();
        let schema = self.schema.read().map_err(poisoned)?.clone();
        Ok(BoardInfo { definition, schema })
    }

    fn authorize(&self, board: &str, role: u8) -> BoardResult<Arc<RegisteredBoard>> {
        let registered = self.board(board)?;
        if !registered.definition.can_write(role) {
            tracing::warn!(board, role, "write rejected");
            return Err(BoardError::Unauthorized {
                board: board.to_string(),
            });
        }
        Ok(registered)
    }

    fn table_schema(&self, table: &str) -> BoardResult<Option<TableSchema>> {
        Ok(self.schema.read().map_err(poisoned)?.table(table).cloned())
    }

    fn publish(&self, event: ChangeEvent) {
        tracing::debug!(
            board = %event.board,
            kind = ?event.kind,
            item_id = ?event.item_id,
            "broadcast"
        );
        self.channels.publish(&event);
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Items and related rows. Items missing a position get one, persisted.
    pub async fn load_data(&self, board: &str) -> BoardResult<BoardData> {
        let config = self.board(board)?.grouping.clone();
        let rng = self.rng.clone();
        self.db
            .call(move |db| {
                let mut items = db.list_records(&config.table)?;
                if let Some(field) = &config.position_attribute {
                    let mut rng = lock_rng(&rng)?;
                    let seeded = seed_missing_positions(&mut items, field, &mut *rng);
                    db.set_positions(&config.table, field, &seeded)?;
                }
                let relations = db.load_relations(&config.related_tables())?;
                Ok(BoardData { items, relations })
            })
            .await
            .map_err(BoardError::from_storage)
    }

    pub async fn load_orders(&self, board: &str) -> BoardResult<AxisOrders> {
        self.board(board)?;
        let name = board.to_string();
        self.db
            .call(move |db| db.load_orders(&name))
            .await
            .map_err(BoardError::from_storage)
    }

    /// Grouped, ordered grid for one board.
    pub async fn load_grid(&self, board: &str, state: &GroupingState) -> BoardResult<BoardGrid> {
        let config = self.board(board)?.grouping.clone();
        let data = self.load_data(board).await?;
        let orders = self.load_orders(board).await?;
        let grouped = group_board(&data.items, &config, &data.relations, state);
        Ok(BoardGrid::build(board, &grouped, &orders))
    }

    // ── Mutations ─────────────────────────────────────────────────────

    pub async fn move_item(
        &self,
        board: &str,
        role: u8,
        request: MoveRequest,
    ) -> BoardResult<MoveOutcome> {
        let config = self.authorize(board, role)?.grouping.clone();
        let rng = self.rng.clone();
        let origin = request.origin;
        let before_id = request.before_id;

        let outcome = self
            .db
            .call(move |db| {
                let Some(mut item) = db.get_record(&config.table, request.item_id)? else {
                    return Err(BoardError::ItemNotFound {
                        id: request.item_id,
                    }
                    .into());
                };
                let relations = db.load_relations(&config.related_tables())?;

                let column = match &config.columns {
                    ColumnSource::ForeignKey {
                        table,
                        summary_field,
                    } => {
                        let summary = summary_field.as_deref();
                        reference_key(&relations, table, summary, request.column)?
                    }
                    _ => request.column,
                };
                item.set(&config.column_attribute, column.to_value());

                if let (Some(attr), Some(row)) = (&config.row_attribute, request.row) {
                    let row = match &config.row_reference {
                        Some(r) => {
                            let summary = r.summary_field.as_deref();
                            reference_key(&relations, &r.table, summary, row)?
                        }
                        None => row,
                    };
                    item.set(attr, row.to_value());
                }
                match (config.direct_swimlane(), request.swimlane) {
                    (Some(field), Some(lane)) => item.set(field, lane.to_value()),
                    (None, Some(_)) => {
                        tracing::debug!(
                            item_id = item.id,
                            "joined swimlane is derived, not written"
                        );
                    }
                    _ => {}
                }

                let resolver = JoinPathResolver::new(&relations);
                let cell = cell_of(&item, &config, &resolver);
                let mut position = None;
                let mut stale_target = false;
                let mut renumbered = Vec::new();

                if let Some(field) = &config.position_attribute {
                    let mut siblings: Vec<Item> = db
                        .list_records(&config.table)?
                        .into_iter()
                        .filter(|i| i.id != item.id && cell_of(i, &config, &resolver) == cell)
                        .collect();
                    let mut rng = lock_rng(&rng)?;
                    let seeded = seed_missing_positions(&mut siblings, field, &mut *rng);
                    db.set_positions(&config.table, field, &seeded)?;

                    let allocation = allocate(
                        &slots_of(&siblings, field),
                        item.id,
                        request.before_id,
                        &mut *rng,
                    );
                    db.set_positions(&config.table, field, &allocation.renumbered)?;
                    item.set(field, Value::from(allocation.position));
                    position = Some(allocation.position);
                    stale_target = allocation.stale_target;
                    renumbered = merge_slots(seeded, allocation.renumbered);
                }

                let item = db
                    .update_record(&config.table, item.id, &item.attributes)?
                    .ok_or(BoardError::ItemNotFound { id: item.id })?;
                Ok(MoveOutcome {
                    item,
                    cell,
                    position,
                    stale_target,
                    renumbered,
                })
            })
            .await
            .map_err(BoardError::from_storage)?;

        if outcome.stale_target {
            tracing::warn!(
                board,
                item_id = outcome.item.id,
                before_id = ?before_id,
                "drop target left the cell, appended instead"
            );
        }
        tracing::info!(
            board,
            item_id = outcome.item.id,
            position = ?outcome.position,
            "moved item"
        );

        self.publish(
            ChangeEvent::new(board, ChangeKind::Update)
                .with_row(outcome.item.clone())
                .with_cell(outcome.cell.clone(), outcome.position)
                .with_origin(origin),
        );
        Ok(outcome)
    }

    /// Replace the stored order of one axis. Returns the order as stored.
    pub async fn set_axis_order(
        &self,
        board: &str,
        role: u8,
        axis: Axis,
        order: Vec<GroupKey>,
        origin: Option<Uuid>,
    ) -> BoardResult<Vec<GroupKey>> {
        self.authorize(board, role)?;
        let stored = set_order(&order);
        let name = board.to_string();
        let to_store = stored.clone();
        self.db
            .call(move |db| db.set_axis_order(&name, axis, &to_store))
            .await
            .map_err(BoardError::from_storage)?;

        tracing::info!(board, axis = %axis, keys = stored.len(), "stored axis order");
        self.publish(
            ChangeEvent::new(board, ChangeKind::Reorder)
                .with_axis(axis)
                .with_origin(origin),
        );
        Ok(stored)
    }

    /// Insert an item. With a position attribute and no position given, the
    /// item is appended to its cell.
    pub async fn create_item(
        &self,
        board: &str,
        role: u8,
        attributes: Map<String, Value>,
        origin: Option<Uuid>,
    ) -> BoardResult<Item> {
        let config = self.authorize(board, role)?.grouping.clone();
        let table = self.table_schema(&config.table)?;
        let rng = self.rng.clone();
        let item = self
            .db
            .call(move |db| {
                let mut attributes = attributes;
                normalize_references(db, table.as_ref(), &mut attributes)?;
                let mut item = db.insert_record(&config.table, &attributes)?;
                if let Some(field) = &config.position_attribute
                    && item.position(field).is_none()
                {
                    let relations = db.load_relations(&config.related_tables())?;
                    let resolver = JoinPathResolver::new(&relations);
                    let cell = cell_of(&item, &config, &resolver);
                    let siblings: Vec<Item> = db
                        .list_records(&config.table)?
                        .into_iter()
                        .filter(|i| i.id != item.id && cell_of(i, &config, &resolver) == cell)
                        .collect();
                    let mut rng = lock_rng(&rng)?;
                    let slots = slots_of(&siblings, field);
                    let allocation = allocate(&slots, item.id, None, &mut *rng);
                    db.set_positions(&config.table, field, &allocation.renumbered)?;
                    let position = Value::from(allocation.position);
                    item = update_one(db, &config.table, item.id, field, position)?;
                }
                Ok(item)
            })
            .await
            .map_err(BoardError::from_storage)?;

        tracing::info!(board, item_id = item.id, "created item");
        self.publish(
            ChangeEvent::new(board, ChangeKind::Insert)
                .with_row(item.clone())
                .with_origin(origin),
        );
        Ok(item)
    }

    pub async fn update_item(
        &self,
        board: &str,
        role: u8,
        id: ItemId,
        patch: Map<String, Value>,
        origin: Option<Uuid>,
    ) -> BoardResult<Item> {
        let table = self.authorize(board, role)?.grouping.table.clone();
        let schema = self.table_schema(&table)?;
        let item = self
            .db
            .call(move |db| {
                let mut patch = patch;
                normalize_references(db, schema.as_ref(), &mut patch)?;
                db.update_record(&table, id, &patch)
            })
            .await
            .map_err(BoardError::from_storage)?
            .ok_or(BoardError::ItemNotFound { id })?;

        tracing::info!(board, item_id = id, "updated item");
        self.publish(
            ChangeEvent::new(board, ChangeKind::Update)
                .with_row(item.clone())
                .with_origin(origin),
        );
        Ok(item)
    }

    pub async fn delete_item(
        &self,
        board: &str,
        role: u8,
        id: ItemId,
        origin: Option<Uuid>,
    ) -> BoardResult<()> {
        let table = self.authorize(board, role)?.grouping.table.clone();
        let deleted = self
            .db
            .call(move |db| db.delete_record(&table, id))
            .await
            .map_err(BoardError::from_storage)?;
        if !deleted {
            return Err(BoardError::ItemNotFound { id });
        }

        tracing::info!(board, item_id = id, "deleted item");
        self.publish(
            ChangeEvent::new(board, ChangeKind::Delete)
                .with_item(id)
                .with_origin(origin),
        );
        Ok(())
    }

    /// Replace a board's grouping configuration. Viewers re-fetch on the
    /// resulting config-change event.
    pub async fn configure_board(
        &self,
        role: u8,
        definition: BoardDefinition,
        origin: Option<Uuid>,
    ) -> BoardResult<()> {
        self.authorize(&definition.name, role)?;
        let name = definition.name.clone();
        self.register(definition)?;
        self.publish(ChangeEvent::new(&name, ChangeKind::ConfigChange).with_origin(origin));
        Ok(())
    }
}

fn lock_rng(rng: &Mutex<StdRng>) -> anyhow::Result<std::sync::MutexGuard<'_, StdRng>> {
    rng.lock().map_err(|e| anyhow::anyhow!("rng lock poisoned: {}", e))
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> BoardError {
    BoardError::Other(anyhow::anyhow!("board registry lock poisoned: {}", e))
}

/// Cell an item falls into under `config`.
fn cell_of(item: &Item, config: &GroupingConfig, resolver: &JoinPathResolver<'_>) -> CellKey {
    let row = config
        .row_attribute
        .as_deref()
        .map(|a| item.key(a))
        .unwrap_or(GroupKey::Null);
    let swimlane = config.swimlane.as_ref().map(|b| resolver.value_of(item, b));
    CellKey::new(row, item.key(&config.column_attribute), swimlane)
}

/// Map a foreign-key axis value to the referenced row id. Accepts the row id
/// itself or the row's summary label.
fn reference_key(
    relations: &Relations,
    table: &str,
    summary_field: Option<&str>,
    key: GroupKey,
) -> BoardResult<GroupKey> {
    if key.is_null() {
        return Ok(key);
    }
    if let Some(id) = key.as_id()
        && relations.row(table, id).is_some()
    {
        return Ok(GroupKey::from(id));
    }
    if let (Some(field), GroupKey::Text(label)) = (summary_field, &key)
        && let Some(row) = relations.rows(table).find(|r| r.key(field).to_string() == *label)
    {
        return Ok(GroupKey::from(row.id));
    }
    Err(BoardError::BadRequest(format!(
        "'{}' is not a row of '{}'",
        key, table
    )))
}

/// Store foreign-key attributes as the referenced row id. Numeric strings and
/// summary labels are translated; anything else is rejected.
fn normalize_references(
    db: &BoardDb,
    table: Option<&TableSchema>,
    attributes: &mut Map<String, Value>,
) -> anyhow::Result<()> {
    let Some(table) = table else {
        return Ok(());
    };
    for (name, value) in attributes.iter_mut() {
        let Some(FieldKind::ForeignKey {
            table: reftable,
            summary_field,
        }) = table.field(name).map(|f| &f.kind)
        else {
            continue;
        };
        let relations = db.load_relations(std::slice::from_ref(reftable))?;
        let key = GroupKey::from_value(Some(value));
        *value = reference_key(&relations, reftable, summary_field.as_deref(), key)?.to_value();
    }
    Ok(())
}

/// Position writes from seeding and renumbering, later writes winning.
fn merge_slots(seeded: Vec<Slot>, renumbered: Vec<Slot>) -> Vec<Slot> {
    let mut merged: Vec<Slot> = seeded
        .into_iter()
        .filter(|s| !renumbered.iter().any(|r| r.id == s.id))
        .collect();
    merged.extend(renumbered);
    merged
}

fn update_one(
    db: &BoardDb,
    table: &str,
    id: ItemId,
    field: &str,
    value: Value,
) -> anyhow::Result<Item> {
    let mut patch = Map::new();
    patch.insert(field.to_string(), value);
    db.update_record(table, id, &patch)?
        .ok_or_else(|| BoardError::ItemNotFound { id }.into())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::board::models::{FieldDef, FieldKind, TableSchema};
    use serde_json::json;

    pub(crate) fn schema() -> Schema {
        Schema::default()
            .with(TableSchema::new(
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
            ))
            .with(TableSchema::new(
                "people",
                vec![FieldDef::new("name", FieldKind::Text)],
            ))
    }

    pub(crate) fn definition(name: &str, column: &str) -> BoardDefinition {
        BoardDefinition {
            name: name.into(),
            table: "tasks".into(),
            row_attribute: None,
            column_attribute: column.into(),
            swimlane_path: None,
            position_attribute: Some("position".into()),
            column_options: None,
            min_role_write: 10,
            reload_on_drag: false,
        }
    }

    pub(crate) fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    /// Service with a `tasks` board (by status) and an `owners` board (by owner).
    pub(crate) fn service() -> BoardService {
        let db = BoardDb::new_in_memory().unwrap();
        for table in schema().tables.values() {
            db.upsert_table_schema(table).unwrap();
        }
        let defs = vec![definition("tasks", "status"), definition("owners", "owner")];
        BoardService::open(DbHandle::new(db), &defs, Arc::new(BoardChannels::new(64)))
            .unwrap()
            .with_seed(11)
    }

    async fn seed_tasks(svc: &BoardService, n: usize, status: &str) -> Vec<Item> {
        let mut out = Vec::new();
        for i in 0..n {
            let fields = attrs(json!({"title": format!("t{}", i), "status": status}));
            out.push(svc.create_item("tasks", 10, fields, None).await.unwrap());
        }
        out
    }

    fn column_ids(grid: &BoardGrid, column: &str) -> Vec<ItemId> {
        grid.cell(&CellKey::new(GroupKey::Null, column.into(), None))
            .map(|c| c.items.iter().map(|i| i.id).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_invalid_board_is_not_registered() {
        let svc = service();
        let mut bad = definition("bad", "status");
        bad.swimlane_path = Some("status.name".into());
        let err = svc.register(bad).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(svc.board("bad"), Err(BoardError::BoardNotFound { .. })));
        let names: Vec<String> = svc.list_boards().unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["owners", "tasks"]);
    }

    #[tokio::test]
    async fn test_create_appends_in_cell_order() {
        let svc = service();
        let items = seed_tasks(&svc, 3, "Todo").await;
        let positions: Vec<f64> = items.iter().map(|i| i.position("position").unwrap()).collect();
        assert!(positions[0] < positions[1] && positions[1] < positions[2]);

        let grid = svc.load_grid("tasks", &GroupingState::default()).await.unwrap();
        assert_eq!(column_ids(&grid, "Todo"), items.iter().map(|i| i.id).collect::<Vec<_>>());
        assert!(column_ids(&grid, "Done").is_empty());
    }

    #[tokio::test]
    async fn test_move_before_item_in_other_column() {
        let svc = service();
        let todo = seed_tasks(&svc, 2, "Todo").await;
        let done = seed_tasks(&svc, 2, "Done").await;

        let outcome = svc
            .move_item(
                "tasks",
                10,
                MoveRequest {
                    item_id: todo[0].id,
                    row: None,
                    column: "Done".into(),
                    swimlane: None,
                    before_id: Some(done[1].id),
                    origin: None,
                },
            )
            .await
            .unwrap();
        assert!(!outcome.stale_target);
        assert_eq!(outcome.cell.column, GroupKey::from("Done"));

        let grid = svc.load_grid("tasks", &GroupingState::default()).await.unwrap();
        assert_eq!(column_ids(&grid, "Done"), vec![done[0].id, todo[0].id, done[1].id]);
        assert_eq!(column_ids(&grid, "Todo"), vec![todo[1].id]);
    }

    #[tokio::test]
    async fn test_move_with_stale_target_appends() {
        let svc = service();
        let todo = seed_tasks(&svc, 3, "Todo").await;
        let outcome = svc
            .move_item(
                "tasks",
                10,
                MoveRequest {
                    item_id: todo[0].id,
                    row: None,
                    column: "Todo".into(),
                    swimlane: None,
                    before_id: Some(9999),
                    origin: None,
                },
            )
            .await
            .unwrap();
        assert!(outcome.stale_target);
        let grid = svc.load_grid("tasks", &GroupingState::default()).await.unwrap();
        assert_eq!(column_ids(&grid, "Todo"), vec![todo[1].id, todo[2].id, todo[0].id]);
    }

    #[tokio::test]
    async fn test_unauthorized_move_changes_nothing() {
        let svc = service();
        let mut locked = definition("locked", "status");
        locked.min_role_write = 1;
        svc.register(locked).unwrap();
        let todo = seed_tasks(&svc, 1, "Todo").await;
        let mut rx = svc.channels().subscribe("locked");

        let err = svc
            .move_item(
                "locked",
                10,
                MoveRequest {
                    item_id: todo[0].id,
                    row: None,
                    column: "Done".into(),
                    swimlane: None,
                    before_id: None,
                    origin: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Unauthorized { .. }));
        assert!(rx.try_recv().is_err());

        let data = svc.load_data("tasks").await.unwrap();
        assert_eq!(data.items[0].key("status"), GroupKey::from("Todo"));
    }

    #[tokio::test]
    async fn test_move_missing_item_is_not_found() {
        let svc = service();
        let err = svc
            .move_item(
                "tasks",
                10,
                MoveRequest {
                    item_id: 404,
                    row: None,
                    column: "Done".into(),
                    swimlane: None,
                    before_id: None,
                    origin: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::ItemNotFound { id: 404 }));
    }

    #[tokio::test]
    async fn test_move_translates_foreign_key_label() {
        let svc = service();
        let ada = svc
            .db()
            .call(|db| db.insert_record("people", &attrs(json!({"name": "Ada"}))))
            .await
            .unwrap();
        let task = seed_tasks(&svc, 1, "Todo").await.remove(0);

        let outcome = svc
            .move_item(
                "owners",
                10,
                MoveRequest {
                    item_id: task.id,
                    row: None,
                    column: "Ada".into(),
                    swimlane: None,
                    before_id: None,
                    origin: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.item.reference("owner"), Some(ada.id));

        let err = svc
            .move_item(
                "owners",
                10,
                MoveRequest {
                    item_id: task.id,
                    row: None,
                    column: "Nobody".into(),
                    swimlane: None,
                    before_id: None,
                    origin: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_move_broadcasts_update_with_origin() {
        let svc = service();
        let task = seed_tasks(&svc, 1, "Todo").await.remove(0);
        let mut rx = svc.channels().subscribe("tasks");
        let origin = Uuid::new_v4();

        svc.move_item(
            "tasks",
            10,
            MoveRequest {
                item_id: task.id,
                row: None,
                column: "Doing".into(),
                swimlane: None,
                before_id: None,
                origin: Some(origin),
            },
        )
        .await
        .unwrap();

        let event: ChangeEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.origin, Some(origin));
        assert_eq!(event.item_id, Some(task.id));
        assert_eq!(event.cell.unwrap().column, GroupKey::from("Doing"));
    }

    #[tokio::test]
    async fn test_load_data_seeds_missing_positions() {
        let svc = service();
        let id = svc
            .db()
            .call(|db| db.insert_record("tasks", &attrs(json!({"status": "Todo"}))))
            .await
            .unwrap()
            .id;
        let data = svc.load_data("tasks").await.unwrap();
        let p = data.items[0].position("position").unwrap();
        assert!((0.0..1.0).contains(&p));

        let stored = svc
            .db()
            .call(move |db| db.get_record("tasks", id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.position("position"), Some(p));
    }

    #[tokio::test]
    async fn test_axis_order_is_deduped_and_merged() {
        let svc = service();
        seed_tasks(&svc, 1, "Blocked").await;
        let mut rx = svc.channels().subscribe("tasks");

        let stored = svc
            .set_axis_order(
                "tasks",
                10,
                Axis::Column,
                vec!["Done".into(), "Todo".into(), "Done".into()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(stored, vec![GroupKey::from("Done"), GroupKey::from("Todo")]);

        let event: ChangeEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event.kind, ChangeKind::Reorder);
        assert_eq!(event.axis, Some(Axis::Column));

        let grid = svc.load_grid("tasks", &GroupingState::default()).await.unwrap();
        let keys: Vec<String> = grid.columns.iter().map(|c| c.key.to_string()).collect();
        assert_eq!(keys, vec!["Done", "Todo", "Blocked", "Doing"]);

        // Rendering does not rewrite the stored order.
        let orders = svc.load_orders("tasks").await.unwrap();
        assert_eq!(orders.column.len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete_item() {
        let svc = service();
        let task = seed_tasks(&svc, 1, "Todo").await.remove(0);
        let mut rx = svc.channels().subscribe("tasks");

        let updated = svc
            .update_item("tasks", 10, task.id, attrs(json!({"title": "renamed"})), None)
            .await
            .unwrap();
        assert_eq!(updated.key("title"), GroupKey::from("renamed"));
        assert_eq!(updated.key("status"), GroupKey::from("Todo"));

        svc.delete_item("tasks", 10, task.id, None).await.unwrap();
        assert!(matches!(
            svc.delete_item("tasks", 10, task.id, None).await,
            Err(BoardError::ItemNotFound { .. })
        ));
        assert!(matches!(
            svc.update_item("tasks", 10, task.id, Map::new(), None).await,
            Err(BoardError::ItemNotFound { .. })
        ));

        let kinds: Vec<ChangeKind> = (0..2)
            .map(|_| serde_json::from_str::<ChangeEvent>(&rx.try_recv().unwrap()).unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![ChangeKind::Update, ChangeKind::Delete]);
    }

    #[tokio::test]
    async fn test_configure_board_broadcasts_config_change() {
        let svc = service();
        let mut rx = svc.channels().subscribe("tasks");
        let mut def = definition("tasks", "status");
        def.column_options = Some(vec!["Backlog".into(), "Shipped".into()]);
        svc.configure_board(10, def, None).await.unwrap();

        let event: ChangeEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event.kind, ChangeKind::ConfigChange);

        let grid = svc.load_grid("tasks", &GroupingState::default()).await.unwrap();
        let keys: Vec<String> = grid.columns.iter().map(|c| c.key.to_string()).collect();
        assert_eq!(keys, vec!["Backlog", "Shipped"]);

        let mut broken = definition("tasks", "nope");
        broken.min_role_write = 10;
        assert!(svc.configure_board(10, broken, None).await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_move_reports_renumbered_cell() {
        let svc = service();
        let mut ids = Vec::new();
        for p in [1.0, 1.0 + 1e-12, 5.0] {
            let item = svc
                .create_item("tasks", 10, attrs(json!({"status": "Todo", "position": p})), None)
                .await
                .unwrap();
            ids.push(item.id);
        }
        let moving = seed_tasks(&svc, 1, "Done").await.remove(0);

        let outcome = svc
            .move_item(
                "tasks",
                10,
                MoveRequest {
                    item_id: moving.id,
                    row: None,
                    column: "Todo".into(),
                    swimlane: None,
                    before_id: Some(ids[1]),
                    origin: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.position, Some(1.5));
        let mut renumbered = outcome.renumbered.clone();
        renumbered.sort_by_key(|s| s.id);
        assert_eq!(
            renumbered,
            vec![Slot::new(ids[0], 1.0), Slot::new(ids[1], 2.0), Slot::new(ids[2], 3.0)]
        );

        let grid = svc.load_grid("tasks", &GroupingState::default()).await.unwrap();
        assert_eq!(column_ids(&grid, "Todo"), vec![ids[0], moving.id, ids[1], ids[2]]);
    }

    #[tokio::test]
    async fn test_foreign_key_attributes_are_stored_as_ids() {
        let svc = service();
        let ada = svc
            .db()
            .call(|db| db.insert_record("people", &attrs(json!({"name": "Ada"}))))
            .await
            .unwrap();

        let by_id = svc
            .create_item("owners", 10, attrs(json!({"owner": ada.id.to_string()})), None)
            .await
            .unwrap();
        assert_eq!(by_id.attributes["owner"], json!(ada.id));
        let by_label = svc
            .create_item("owners", 10, attrs(json!({"title": "x"})), None)
            .await
            .unwrap();
        let by_label = svc
            .update_item("owners", 10, by_label.id, attrs(json!({"owner": "Ada"})), None)
            .await
            .unwrap();
        assert_eq!(by_label.attributes["owner"], json!(ada.id));

        let grid = svc.load_grid("owners", &GroupingState::default()).await.unwrap();
        assert!(grid.columns.iter().all(|c| !matches!(c.key, GroupKey::Text(_))));
        assert_eq!(grid.columns.iter().filter(|c| c.label == "Ada").count(), 1);
        let cell = grid
            .cell(&CellKey::new(GroupKey::Null, GroupKey::from(ada.id), None))
            .unwrap();
        assert_eq!(cell.items.len(), 2);

        let err = svc
            .update_item("owners", 10, by_id.id, attrs(json!({"owner": "Nobody"})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_board() {
        let svc = service();
        assert!(matches!(
            svc.load_grid("ghost", &GroupingState::default()).await,
            Err(BoardError::BoardNotFound { .. })
        ));
    }
}
