//! The rendered grid: grouped cells laid out along ordered axes.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::grouping::{GroupedBoard, UNALLOCATED_LABEL};
use super::models::{AxisOrders, CellKey, GroupKey, Item, ItemId};
use super::order::merge_order;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisEntry {
    pub key: GroupKey,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellView {
    pub column: GroupKey,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowView {
    pub key: GroupKey,
    pub label: String,
    pub cells: Vec<CellView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwimlaneView {
    /// `None` when the board has no swimlane path.
    pub key: Option<GroupKey>,
    pub label: String,
    /// Column keys shown in this lane, in axis order.
    pub columns: Vec<GroupKey>,
    pub rows: Vec<RowView>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardGrid {
    pub board: String,
    pub columns: Vec<AxisEntry>,
    pub rows: Vec<AxisEntry>,
    pub swimlanes: Vec<SwimlaneView>,
}

impl BoardGrid {
    /// Lay out `grouped` with stored axis orders merged over the live keys.
    pub fn build(board: &str, grouped: &GroupedBoard, orders: &AxisOrders) -> Self {
        let column_keys = merge_order(&orders.column, &grouped.columns);
        let row_keys = merge_order(&orders.row, &grouped.rows);

        let columns = column_keys
            .iter()
            .map(|k| AxisEntry {
                key: k.clone(),
                label: grouped.column_label(k),
            })
            .collect();
        let rows = row_keys
            .iter()
            .map(|k| AxisEntry {
                key: k.clone(),
                label: grouped.row_label(k),
            })
            .collect();

        let lanes: Vec<Option<GroupKey>> = if grouped.swimlanes.is_empty() {
            vec![None]
        } else {
            grouped.swimlanes.iter().cloned().map(Some).collect()
        };

        let swimlanes = lanes
            .into_iter()
            .map(|lane| {
                let lane_columns = grouped.columns_for_lane(lane.as_ref(), &column_keys);
                let rows = row_keys
                    .iter()
                    .map(|row| RowView {
                        key: row.clone(),
                        label: grouped.row_label(row),
                        cells: lane_columns
                            .iter()
                            .map(|column| CellView {
                                column: column.clone(),
                                items: grouped
                                    .cell(&CellKey::new(row.clone(), column.clone(), lane.clone()))
                                    .to_vec(),
                            })
                            .collect(),
                    })
                    .collect();
                SwimlaneView {
                    label: lane.as_ref().map(lane_label).unwrap_or_default(),
                    key: lane,
                    columns: lane_columns,
                    rows,
                }
            })
            .collect();

        Self {
            board: board.to_string(),
            columns,
            rows,
            swimlanes,
        }
    }

    pub fn cell(&self, key: &CellKey) -> Option<&CellView> {
        self.swimlanes
            .iter()
            .find(|lane| lane.key == key.swimlane)?
            .rows
            .iter()
            .find(|row| row.key == key.row)?
            .cells
            .iter()
            .find(|cell| cell.column == key.column)
    }

    fn cell_mut(&mut self, key: &CellKey) -> Option<&mut CellView> {
        self.swimlanes
            .iter_mut()
            .find(|lane| lane.key == key.swimlane)?
            .rows
            .iter_mut()
            .find(|row| row.key == key.row)?
            .cells
            .iter_mut()
            .find(|cell| cell.column == key.column)
    }

    /// Cell currently holding `id`.
    pub fn locate(&self, id: ItemId) -> Option<CellKey> {
        for lane in &self.swimlanes {
            for row in &lane.rows {
                for cell in &row.cells {
                    if cell.items.iter().any(|i| i.id == id) {
                        return Some(CellKey::new(
                            row.key.clone(),
                            cell.column.clone(),
                            lane.key.clone(),
                        ));
                    }
                }
            }
        }
        None
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.swimlanes
            .iter()
            .flat_map(|l| &l.rows)
            .flat_map(|r| &r.cells)
            .flat_map(|c| &c.items)
            .find(|i| i.id == id)
    }

    pub fn item_count(&self) -> usize {
        self.swimlanes
            .iter()
            .flat_map(|l| &l.rows)
            .flat_map(|r| &r.cells)
            .map(|c| c.items.len())
            .sum()
    }

    /// Move `id` into `target` ahead of `before_id` (or to the end) without
    /// touching positions. Returns false when the item or cell is unknown.
    pub fn place(&mut self, id: ItemId, target: &CellKey, before_id: Option<ItemId>) -> bool {
        if self.cell(target).is_none() {
            return false;
        }
        let Some(source) = self.locate(id) else {
            return false;
        };
        let Some(item) = self.cell_mut(&source).and_then(|cell| {
            let idx = cell.items.iter().position(|i| i.id == id)?;
            Some(cell.items.remove(idx))
        }) else {
            return false;
        };
        let Some(cell) = self.cell_mut(target) else {
            return false;
        };
        let idx = before_id
            .and_then(|b| cell.items.iter().position(|i| i.id == b))
            .unwrap_or(cell.items.len());
        cell.items.insert(idx, item);
        true
    }

    /// Plain-text rendering for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Board: {}", self.board);
        for lane in &self.swimlanes {
            if lane.key.is_some() {
                let _ = writeln!(out, "\n== {} ==", display_label(&lane.label));
            }
            for row in &lane.rows {
                if row.key.is_null() && self.rows.len() <= 1 {
                    let _ = writeln!(out);
                } else {
                    let _ = writeln!(out, "\n[{}]", display_label(&row.label));
                }
                for cell in &row.cells {
                    let label = self
                        .columns
                        .iter()
                        .find(|c| c.key == cell.column)
                        .map(|c| c.label.as_str())
                        .unwrap_or_default();
                    let _ = writeln!(out, "  {} ({})", display_label(label), cell.items.len());
                    for item in &cell.items {
                        let _ = writeln!(out, "    #{} {}", item.id, item_summary(item));
                    }
                }
            }
        }
        out
    }
}

fn lane_label(key: &GroupKey) -> String {
    if key.is_null() {
        UNALLOCATED_LABEL.to_string()
    } else {
        key.to_string()
    }
}

fn display_label(label: &str) -> &str {
    if label.is_empty() { "-" } else { label }
}

fn item_summary(item: &Item) -> String {
    ["title", "name", "summary"]
        .iter()
        .find_map(|f| item.get(f).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_default()
}
