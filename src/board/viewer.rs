//! Client side of a board: one viewing session.
//!
//! A `BoardViewer` keeps the fetched items and orders, regroups them into its
//! own grid and applies drags optimistically. Incoming change events go
//! through its [`SyncSession`], which decides whether to ignore them (own
//! echo) or to re-fetch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::api::ROLE_HEADER;
use super::grouping::{GroupingConfig, GroupingState, group_board};
use super::layout::BoardGrid;
use super::models::{Axis, AxisOrders, CellKey, GroupKey, ItemId, OrderRecord};
use super::order::set_order;
use super::service::{BoardData, BoardInfo, BoardService, MoveOutcome, MoveRequest};
use super::sync::{ChangeEvent, LocalResolution, MutationResult, SyncAction, SyncSession};
use crate::errors::{BoardError, BoardResult};

/// Transport used by a viewer to reach its board.
#[async_trait]
pub trait BoardClient: Send + Sync {
    async fn fetch_board(&self, board: &str) -> BoardResult<BoardInfo>;

    async fn fetch_data(&self, board: &str) -> BoardResult<BoardData>;

    async fn fetch_orders(&self, board: &str) -> BoardResult<AxisOrders>;

    async fn send_move(&self, board: &str, request: &MoveRequest) -> BoardResult<MoveOutcome>;

    async fn send_order(
        &self,
        board: &str,
        axis: Axis,
        order: &[GroupKey],
        origin: Uuid,
    ) -> BoardResult<Vec<GroupKey>>;
}

/// Body of `PUT /api/boards/{board}/orders/{axis}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order: Vec<GroupKey>,
    #[serde(default)]
    pub origin: Option<Uuid>,
}

// ── HTTP client ──────────────────────────────────────────────────────

pub struct HttpBoardClient {
    base_url: String,
    role: u8,
    client: reqwest::Client,
}

impl HttpBoardClient {
    pub fn new(base_url: &str, role: u8) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            role,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        board: &str,
        req: reqwest::RequestBuilder,
    ) -> BoardResult<reqwest::Response> {
        let resp = req
            .header(ROLE_HEADER, self.role.to_string())
            .send()
            .await
            .map_err(|e| BoardError::TransientSync(e.to_string()))?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let message = resp
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or_else(|| status.to_string());
        Err(match status {
            StatusCode::FORBIDDEN => BoardError::Unauthorized {
                board: board.to_string(),
            },
            StatusCode::NOT_FOUND if message.starts_with("Board") => BoardError::BoardNotFound {
                name: board.to_string(),
            },
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => BoardError::BadRequest(message),
            StatusCode::CONFLICT => BoardError::MutationInFlight,
            StatusCode::UNPROCESSABLE_ENTITY => BoardError::Configuration(message),
            _ => BoardError::TransientSync(message),
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> BoardResult<T> {
        resp.json::<T>()
            .await
            .map_err(|e| BoardError::TransientSync(format!("Malformed response: {}", e)))
    }
}

#[async_trait]
impl BoardClient for HttpBoardClient {
    async fn fetch_board(&self, board: &str) -> BoardResult<BoardInfo> {
        let req = self.client.get(self.url(&format!("/api/boards/{}", board)));
        Self::json(self.send(board, req).await?).await
    }

    async fn fetch_data(&self, board: &str) -> BoardResult<BoardData> {
        let req = self.client.get(self.url(&format!("/api/boards/{}/data", board)));
        Self::json(self.send(board, req).await?).await
    }

    async fn fetch_orders(&self, board: &str) -> BoardResult<AxisOrders> {
        let req = self.client.get(self.url(&format!("/api/boards/{}/orders", board)));
        Self::json(self.send(board, req).await?).await
    }

    async fn send_move(&self, board: &str, request: &MoveRequest) -> BoardResult<MoveOutcome> {
        let req = self
            .client
            .post(self.url(&format!("/api/boards/{}/move", board)))
            .json(request);
        Self::json(self.send(board, req).await?).await
    }

    async fn send_order(
        &self,
        board: &str,
        axis: Axis,
        order: &[GroupKey],
        origin: Uuid,
    ) -> BoardResult<Vec<GroupKey>> {
        let body = OrderUpdate {
            order: order.to_vec(),
            origin: Some(origin),
        };
        let req = self
            .client
            .put(self.url(&format!("/api/boards/{}/orders/{}", board, axis)))
            .json(&body);
        let record: OrderRecord = Self::json(self.send(board, req).await?).await?;
        Ok(record.order)
    }
}

// ── In-process client ────────────────────────────────────────────────

/// Talks to a `BoardService` in the same process.
pub struct LocalBoardClient {
    service: Arc<BoardService>,
    role: u8,
}

impl LocalBoardClient {
    pub fn new(service: Arc<BoardService>, role: u8) -> Self {
        Self { service, role }
    }
}

#[async_trait]
impl BoardClient for LocalBoardClient {
    async fn fetch_board(&self, board: &str) -> BoardResult<BoardInfo> {
        self.service.board_info(board)
    }

    async fn fetch_data(&self, board: &str) -> BoardResult<BoardData> {
        self.service.load_data(board).await
    }

    async fn fetch_orders(&self, board: &str) -> BoardResult<AxisOrders> {
        self.service.load_orders(board).await
    }

    async fn send_move(&self, board: &str, request: &MoveRequest) -> BoardResult<MoveOutcome> {
        self.service.move_item(board, self.role, request.clone()).await
    }

    async fn send_order(
        &self,
        board: &str,
        axis: Axis,
        order: &[GroupKey],
        origin: Uuid,
    ) -> BoardResult<Vec<GroupKey>> {
        self.service
            .set_axis_order(board, self.role, axis, order.to_vec(), Some(origin))
            .await
    }
}

// ── Viewer ───────────────────────────────────────────────────────────

pub struct BoardViewer<C: BoardClient> {
    client: C,
    config: Option<GroupingConfig>,
    state: GroupingState,
    session: SyncSession,
    data: BoardData,
    orders: AxisOrders,
    grid: BoardGrid,
    reload_on_drag: bool,
    needs_full_refresh: bool,
    last_error: Option<String>,
}

impl<C: BoardClient> BoardViewer<C> {
    pub fn new(client: C, board: &str, echo_timeout: Duration) -> Self {
        Self {
            client,
            config: None,
            state: GroupingState::default(),
            session: SyncSession::with_timeout(board, echo_timeout),
            data: BoardData::default(),
            orders: AxisOrders::default(),
            grid: BoardGrid::default(),
            reload_on_drag: false,
            needs_full_refresh: true,
            last_error: None,
        }
    }

    pub fn board(&self) -> &str {
        self.session.board()
    }

    pub fn grid(&self) -> &BoardGrid {
        &self.grid
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    /// Error of the last reverted mutation or failed refresh.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Fetch everything and render.
    pub async fn open(&mut self) -> BoardResult<()> {
        self.full_refresh().await
    }

    pub fn set_state(&mut self, state: GroupingState) {
        self.state = state;
        self.regroup();
    }

    fn regroup(&mut self) {
        let Some(config) = &self.config else {
            return;
        };
        let grouped = group_board(&self.data.items, config, &self.data.relations, &self.state);
        self.grid = BoardGrid::build(self.session.board(), &grouped, &self.orders);
    }

    async fn full_refresh(&mut self) -> BoardResult<()> {
        let board = self.session.board().to_string();
        let fetched = async {
            let info = self.client.fetch_board(&board).await?;
            let config = info.grouping()?;
            let data = self.client.fetch_data(&board).await?;
            let orders = self.client.fetch_orders(&board).await?;
            Ok::<_, BoardError>((info.definition.reload_on_drag, config, data, orders))
        }
        .await;
        match fetched {
            Ok((reload_on_drag, config, data, orders)) => {
                self.reload_on_drag = reload_on_drag;
                self.config = Some(config);
                self.data = data;
                self.orders = orders;
                self.needs_full_refresh = false;
                self.regroup();
                Ok(())
            }
            Err(e) if e.is_configuration() || matches!(e, BoardError::BoardNotFound { .. }) => {
                Err(e)
            }
            Err(e) => Err(self.refresh_failed(e)),
        }
    }

    fn refresh_failed(&mut self, err: BoardError) -> BoardError {
        tracing::warn!(
            board = %self.session.board(),
            error = %err,
            "refresh failed, full re-fetch pending"
        );
        self.session.connection_lost();
        self.needs_full_refresh = true;
        self.last_error = Some(err.to_string());
        BoardError::TransientSync(err.to_string())
    }

    /// Drag `id` into `target` ahead of `before_id`. The grid changes
    /// immediately and is put back if the server refuses.
    pub async fn move_item(
        &mut self,
        id: ItemId,
        target: CellKey,
        before_id: Option<ItemId>,
    ) -> BoardResult<LocalResolution> {
        self.session.begin_local(Instant::now())?;
        let snapshot = self.grid.clone();
        self.grid.place(id, &target, before_id);

        let request = MoveRequest {
            item_id: id,
            row: self
                .config
                .as_ref()
                .and_then(|c| c.row_attribute.as_ref())
                .map(|_| target.row.clone()),
            column: target.column.clone(),
            swimlane: target.swimlane.clone(),
            before_id,
            origin: Some(self.session.origin()),
        };
        let result = self.client.send_move(self.session.board(), &request).await;

        let mutation = match &result {
            Ok(outcome) if outcome.stale_target => MutationResult::StaleTarget,
            Ok(_) => MutationResult::Ok,
            Err(e) => MutationResult::from_error(e),
        };
        let resolution = self.session.complete_local(&mutation);

        match (resolution, result) {
            (LocalResolution::Applied, Ok(outcome)) => {
                self.last_error = None;
                self.apply_outcome(outcome);
                if self.reload_on_drag {
                    self.reload_items().await;
                }
                self.regroup();
            }
            (_, Err(e)) => {
                tracing::warn!(
                    board = %self.session.board(),
                    item_id = id,
                    error = %e,
                    "move reverted"
                );
                self.grid = snapshot;
                self.last_error = Some(e.to_string());
            }
            (LocalResolution::Reverted, Ok(_)) => {
                self.grid = snapshot;
            }
        }
        Ok(resolution)
    }

    /// Merge the server's answer to a move: the moved item plus any cell
    /// positions it rewrote.
    fn apply_outcome(&mut self, outcome: MoveOutcome) {
        if let Some(field) = self.config.as_ref().and_then(|c| c.position_attribute.as_deref()) {
            for slot in &outcome.renumbered {
                if let Some(item) = self.data.items.iter_mut().find(|i| i.id == slot.id) {
                    item.set(field, Value::from(slot.position));
                }
            }
        }
        match self.data.items.iter_mut().find(|i| i.id == outcome.item.id) {
            Some(existing) => *existing = outcome.item,
            None => self.data.items.push(outcome.item),
        }
    }

    async fn reload_items(&mut self) {
        let board = self.session.board().to_string();
        match self.client.fetch_data(&board).await {
            Ok(data) => self.data = data,
            Err(e) => {
                self.refresh_failed(e);
            }
        }
    }

    /// Drag a whole column or row to a new place in its axis.
    pub async fn reorder_axis(
        &mut self,
        axis: Axis,
        order: Vec<GroupKey>,
    ) -> BoardResult<LocalResolution> {
        self.session.begin_local(Instant::now())?;
        let previous = self.orders.get(axis).to_vec();
        self.orders.set(axis, set_order(&order));
        self.regroup();

        let result = self
            .client
            .send_order(self.session.board(), axis, &order, self.session.origin())
            .await;
        let mutation = match &result {
            Ok(_) => MutationResult::Ok,
            Err(e) => MutationResult::from_error(e),
        };
        let resolution = self.session.complete_local(&mutation);
        match result {
            Ok(stored) => {
                self.orders.set(axis, stored);
                self.last_error = None;
            }
            Err(e) => {
                tracing::warn!(
                    board = %self.session.board(),
                    axis = %axis,
                    error = %e,
                    "reorder reverted"
                );
                self.orders.set(axis, previous);
                self.last_error = Some(e.to_string());
            }
        }
        self.regroup();
        Ok(resolution)
    }

    /// Apply one event from the board channel.
    pub async fn handle_event(&mut self, event: &ChangeEvent) -> BoardResult<SyncAction> {
        let action = self.session.receive(event, Instant::now());
        let board = self.session.board().to_string();
        let refreshed = match action {
            SyncAction::RefreshItems => match self.client.fetch_data(&board).await {
                Ok(data) => {
                    self.data = data;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            SyncAction::RefreshOrder => match self.client.fetch_orders(&board).await {
                Ok(orders) => {
                    self.orders = orders;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            SyncAction::FullRefresh => {
                self.full_refresh().await?;
                self.session.finish_apply();
                return Ok(action);
            }
            SyncAction::Ignored | SyncAction::Consumed => return Ok(action),
        };
        match refreshed {
            Ok(()) => {
                self.regroup();
                self.session.finish_apply();
                Ok(action)
            }
            Err(e) => Err(self.refresh_failed(e)),
        }
    }

    /// Parse and apply a raw frame from the WebSocket.
    pub async fn handle_message(&mut self, text: &str) -> BoardResult<SyncAction> {
        let event: ChangeEvent = serde_json::from_str(text)
            .map_err(|e| BoardError::BadRequest(format!("Malformed change event: {}", e)))?;
        self.handle_event(&event).await
    }

    /// The event channel dropped: discard pending echoes and re-fetch.
    pub async fn connection_lost(&mut self) -> BoardResult<()> {
        self.session.connection_lost();
        self.needs_full_refresh = true;
        self.full_refresh().await
    }

    /// Periodic housekeeping: expire stale echo flags and retry a pending
    /// full refresh.
    pub async fn tick(&mut self) -> BoardResult<()> {
        self.session.expire(Instant::now());
        if self.needs_full_refresh {
            self.full_refresh().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::Item;
    use crate::board::service::tests::{attrs, definition, service};
    use crate::board::sync::{ChangeKind, SessionState};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegates to a local client but can be switched to fail.
    struct FlakyClient {
        inner: LocalBoardClient,
        down: Arc<AtomicBool>,
    }

    impl FlakyClient {
        fn check(&self) -> BoardResult<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(BoardError::TransientSync("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl BoardClient for FlakyClient {
        async fn fetch_board(&self, board: &str) -> BoardResult<BoardInfo> {
            self.check()?;
            self.inner.fetch_board(board).await
        }
        async fn fetch_data(&self, board: &str) -> BoardResult<BoardData> {
            self.check()?;
            self.inner.fetch_data(board).await
        }
        async fn fetch_orders(&self, board: &str) -> BoardResult<AxisOrders> {
            self.check()?;
            self.inner.fetch_orders(board).await
        }
        async fn send_move(&self, board: &str, request: &MoveRequest) -> BoardResult<MoveOutcome> {
            self.check()?;
            self.inner.send_move(board, request).await
        }
        async fn send_order(
            &self,
            board: &str,
            axis: Axis,
            order: &[GroupKey],
            origin: Uuid,
        ) -> BoardResult<Vec<GroupKey>> {
            self.check()?;
            self.inner.send_order(board, axis, order, origin).await
        }
    }

    async fn setup(n: usize) -> (Arc<BoardService>, Vec<Item>) {
        let svc = Arc::new(service());
        let mut items = Vec::new();
        for i in 0..n {
            let fields = attrs(json!({"title": format!("t{}", i), "status": "Todo"}));
            items.push(svc.create_item("tasks", 10, fields, None).await.unwrap());
        }
        (svc, items)
    }

    fn viewer(svc: &Arc<BoardService>, role: u8) -> BoardViewer<LocalBoardClient> {
        BoardViewer::new(
            LocalBoardClient::new(svc.clone(), role),
            "tasks",
            Duration::from_secs(5),
        )
    }

    fn cell(column: &str) -> CellKey {
        CellKey::new(GroupKey::Null, column.into(), None)
    }

    fn ids(v: &BoardViewer<impl BoardClient>, column: &str) -> Vec<ItemId> {
        v.grid()
            .cell(&cell(column))
            .map(|c| c.items.iter().map(|i| i.id).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_open_renders_grid() {
        let (svc, items) = setup(2).await;
        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();
        assert_eq!(ids(&v, "Todo"), vec![items[0].id, items[1].id]);
        assert_eq!(v.grid().item_count(), 2);
    }

    #[tokio::test]
    async fn test_move_applies_and_own_echo_is_consumed() {
        let (svc, items) = setup(2).await;
        let mut rx = svc.channels().subscribe("tasks");
        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();

        let r = v.move_item(items[1].id, cell("Done"), None).await.unwrap();
        assert_eq!(r, LocalResolution::Applied);
        assert_eq!(ids(&v, "Done"), vec![items[1].id]);
        assert_eq!(v.session().state(), SessionState::AwaitingEcho);

        let echo = rx.recv().await.unwrap();
        assert_eq!(v.handle_message(&echo).await.unwrap(), SyncAction::Consumed);
        assert_eq!(v.session().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_move_into_exhausted_cell_matches_server_order() {
        let svc = Arc::new(service());
        let mut todo = Vec::new();
        for p in [1.0, 1.0 + 1e-12, 5.0] {
            let fields = attrs(json!({"status": "Todo", "position": p}));
            todo.push(svc.create_item("tasks", 10, fields, None).await.unwrap().id);
        }
        let fields = attrs(json!({"status": "Done"}));
        let moving = svc.create_item("tasks", 10, fields, None).await.unwrap().id;

        let mut rx = svc.channels().subscribe("tasks");
        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();
        v.move_item(moving, cell("Todo"), Some(todo[1])).await.unwrap();
        let echo = rx.recv().await.unwrap();
        assert_eq!(v.handle_message(&echo).await.unwrap(), SyncAction::Consumed);

        let server = svc.load_grid("tasks", &GroupingState::default()).await.unwrap();
        let remote: Vec<ItemId> = server
            .cell(&cell("Todo"))
            .map(|c| c.items.iter().map(|i| i.id).collect())
            .unwrap_or_default();
        assert_eq!(remote, vec![todo[0], moving, todo[1], todo[2]]);
        assert_eq!(ids(&v, "Todo"), remote);
    }

    #[tokio::test]
    async fn test_reload_on_drag_refetches_after_own_move() {
        let (svc, items) = setup(2).await;
        let mut def = definition("tasks", "status");
        def.reload_on_drag = true;
        svc.register(def).unwrap();

        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();
        // Changed behind the viewer's back, no event delivered.
        svc.update_item("tasks", 10, items[0].id, attrs(json!({"status": "Doing"})), None)
            .await
            .unwrap();

        let r = v.move_item(items[1].id, cell("Done"), None).await.unwrap();
        assert_eq!(r, LocalResolution::Applied);
        assert_eq!(ids(&v, "Done"), vec![items[1].id]);
        assert_eq!(ids(&v, "Doing"), vec![items[0].id]);
        assert!(v.last_error().is_none());
    }

    #[tokio::test]
    async fn test_remote_move_triggers_regroup() {
        let (svc, items) = setup(2).await;
        let mut rx = svc.channels().subscribe("tasks");
        let mut a = viewer(&svc, 10);
        let mut b = viewer(&svc, 10);
        a.open().await.unwrap();
        b.open().await.unwrap();

        a.move_item(items[0].id, cell("Doing"), None).await.unwrap();
        let event = rx.recv().await.unwrap();

        assert_eq!(b.handle_message(&event).await.unwrap(), SyncAction::RefreshItems);
        assert_eq!(ids(&b, "Doing"), vec![items[0].id]);
        assert_eq!(b.session().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unauthorized_move_reverts() {
        let (svc, items) = setup(2).await;
        let mut locked = definition("tasks", "status");
        locked.min_role_write = 1;
        svc.register(locked).unwrap();

        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();
        let before = v.grid().clone();

        let r = v.move_item(items[0].id, cell("Done"), None).await.unwrap();
        assert_eq!(r, LocalResolution::Reverted);
        assert_eq!(v.grid(), &before);
        assert!(!v.session().is_suppressing());
        assert!(v.last_error().unwrap().contains("Not authorized"));
    }

    #[tokio::test]
    async fn test_reorder_axis_and_remote_reorder() {
        let (svc, _) = setup(1).await;
        let mut rx = svc.channels().subscribe("tasks");
        let mut a = viewer(&svc, 10);
        let mut b = viewer(&svc, 10);
        a.open().await.unwrap();
        b.open().await.unwrap();

        let r = a
            .reorder_axis(Axis::Column, vec!["Done".into(), "Done".into(), "Todo".into()])
            .await
            .unwrap();
        assert_eq!(r, LocalResolution::Applied);
        let keys: Vec<String> = a.grid().columns.iter().map(|c| c.key.to_string()).collect();
        assert_eq!(keys, vec!["Done", "Todo", "Doing"]);

        let event = rx.recv().await.unwrap();
        assert_eq!(a.handle_message(&event).await.unwrap(), SyncAction::Consumed);
        assert_eq!(b.handle_message(&event).await.unwrap(), SyncAction::RefreshOrder);
        assert_eq!(b.grid().columns, a.grid().columns);
    }

    #[tokio::test]
    async fn test_events_for_other_boards_are_ignored() {
        let (svc, _) = setup(0).await;
        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();
        let other = ChangeEvent::new("owners", ChangeKind::Insert);
        assert_eq!(v.handle_event(&other).await.unwrap(), SyncAction::Ignored);
    }

    #[tokio::test]
    async fn test_failed_refresh_schedules_full_refetch() {
        let (svc, items) = setup(1).await;
        let down = Arc::new(AtomicBool::new(false));
        let mut v = BoardViewer::new(
            FlakyClient {
                inner: LocalBoardClient::new(svc.clone(), 10),
                down: down.clone(),
            },
            "tasks",
            Duration::from_secs(5),
        );
        v.open().await.unwrap();

        svc.update_item("tasks", 10, items[0].id, attrs(json!({"status": "Done"})), None)
            .await
            .unwrap();
        down.store(true, Ordering::SeqCst);
        let event = ChangeEvent::new("tasks", ChangeKind::Update).with_item(items[0].id);
        assert!(matches!(
            v.handle_event(&event).await,
            Err(BoardError::TransientSync(_))
        ));
        assert_eq!(ids(&v, "Todo"), vec![items[0].id]);

        down.store(false, Ordering::SeqCst);
        v.tick().await.unwrap();
        assert_eq!(ids(&v, "Done"), vec![items[0].id]);
    }

    #[tokio::test]
    async fn test_move_while_in_flight_is_rejected_by_session() {
        let (svc, _) = setup(0).await;
        let mut v = viewer(&svc, 10);
        v.session.begin_local(Instant::now()).unwrap();
        assert!(matches!(
            v.move_item(1, cell("Done"), None).await,
            Err(BoardError::MutationInFlight)
        ));
    }

    #[tokio::test]
    async fn test_connection_lost_refetches() {
        let (svc, _) = setup(1).await;
        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();
        svc.create_item("tasks", 10, attrs(json!({"status": "Todo"})), None)
            .await
            .unwrap();
        v.connection_lost().await.unwrap();
        assert_eq!(v.grid().item_count(), 2);
    }

    #[tokio::test]
    async fn test_resync_frame_refetches_missed_changes() {
        let (svc, items) = setup(1).await;
        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();
        svc.update_item("tasks", 10, items[0].id, attrs(json!({"status": "Done"})), None)
            .await
            .unwrap();

        let frame = serde_json::to_string(&ChangeEvent::new("tasks", ChangeKind::Resync)).unwrap();
        assert_eq!(v.handle_message(&frame).await.unwrap(), SyncAction::FullRefresh);
        assert_eq!(ids(&v, "Done"), vec![items[0].id]);
        assert_eq!(v.session().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_config_change_regroups_by_new_column() {
        let (svc, items) = setup(1).await;
        let mut rx = svc.channels().subscribe("tasks");
        let mut v = viewer(&svc, 10);
        v.open().await.unwrap();

        svc.configure_board(10, definition("tasks", "owner"), None).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(v.handle_message(&event).await.unwrap(), SyncAction::FullRefresh);
        assert_eq!(ids(&v, ""), vec![items[0].id]);
        assert_eq!(v.session().state(), SessionState::Idle);
    }
}
