//! Bucketing items into grid cells.
//!
//! [`group`] is the bare bucketing pass over three key accessors.
//! [`group_board`] runs it for a validated [`GroupingConfig`]: it resolves
//! swimlanes through the join path, adds declared columns that have no items,
//! applies the grouping state and derives axis labels. Axis order is not
//! decided here; see `order` and `layout`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::join_path::{BoundPath, JoinPath, JoinPathResolver};
use super::models::{CellKey, FieldKind, GroupKey, Item, Relations, Schema};
use crate::errors::{BoardError, BoardResult};

/// Label shown for the unallocated key on any axis.
pub const UNALLOCATED_LABEL: &str = "Unallocated";

pub type CellMap = HashMap<CellKey, Vec<Item>>;

/// Where the column axis gets its declared (always shown) values from.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    /// Only values present in the data.
    Free,
    /// Enumerated option list.
    Options(Vec<String>),
    /// Every row of a reference table, labelled by `summary_field`.
    ForeignKey {
        table: String,
        summary_field: Option<String>,
    },
}

/// Labels for a foreign-key row axis.
#[derive(Debug, Clone, PartialEq)]
pub struct RowReference {
    pub table: String,
    pub summary_field: Option<String>,
}

/// Grouping configuration checked against the table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingConfig {
    pub table: String,
    pub row_attribute: Option<String>,
    pub row_reference: Option<RowReference>,
    pub column_attribute: String,
    pub columns: ColumnSource,
    pub swimlane: Option<BoundPath>,
    pub position_attribute: Option<String>,
}

impl GroupingConfig {
    /// Validate raw grouping settings. Every failure is a configuration error.
    pub fn validate(
        schema: &Schema,
        table: &str,
        row_attribute: Option<&str>,
        column_attribute: &str,
        swimlane_path: Option<&str>,
        position_attribute: Option<&str>,
        column_options: Option<&[String]>,
    ) -> BoardResult<Self> {
        let table_schema = schema
            .table(table)
            .ok_or_else(|| BoardError::configuration(format!("unknown table '{}'", table)))?;

        let column_field = table_schema.field(column_attribute).ok_or_else(|| {
            BoardError::configuration(format!(
                "column attribute '{}' is not a field of '{}'",
                column_attribute, table
            ))
        })?;

        let columns = match (column_options, &column_field.kind) {
            (Some(options), _) if !options.is_empty() => ColumnSource::Options(options.to_vec()),
            (_, FieldKind::Options { options }) => ColumnSource::Options(options.clone()),
            (_, FieldKind::ForeignKey {
                table: reftable,
                summary_field,
            }) => {
                if schema.table(reftable).is_none() {
                    return Err(BoardError::configuration(format!(
                        "column attribute '{}' references unknown table '{}'",
                        column_attribute, reftable
                    )));
                }
                ColumnSource::ForeignKey {
                    table: reftable.clone(),
                    summary_field: summary_field.clone(),
                }
            }
            _ => ColumnSource::Free,
        };

        let row_reference = match row_attribute {
            None => None,
            Some(row) => {
                let field = table_schema.field(row).ok_or_else(|| {
                    BoardError::configuration(format!(
                        "row attribute '{}' is not a field of '{}'",
                        row, table
                    ))
                })?;
                match &field.kind {
                    FieldKind::ForeignKey {
                        table: reftable,
                        summary_field,
                    } => Some(RowReference {
                        table: reftable.clone(),
                        summary_field: summary_field.clone(),
                    }),
                    _ => None,
                }
            }
        };

        if let Some(position) = position_attribute {
            let field = table_schema.field(position).ok_or_else(|| {
                BoardError::configuration(format!(
                    "position attribute '{}' is not a field of '{}'",
                    position, table
                ))
            })?;
            if !matches!(field.kind, FieldKind::Float | FieldKind::Integer) {
                return Err(BoardError::configuration(format!(
                    "position attribute '{}' must be numeric",
                    position
                )));
            }
        }

        let swimlane = swimlane_path
            .map(|p| JoinPath::parse(p)?.bind(schema, table))
            .transpose()?;

        Ok(Self {
            table: table.to_string(),
            row_attribute: row_attribute.map(str::to_string),
            row_reference,
            column_attribute: column_attribute.to_string(),
            columns,
            swimlane,
            position_attribute: position_attribute.map(str::to_string),
        })
    }

    /// Tables whose rows the grouping pass reads besides the board table.
    pub fn related_tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        if let ColumnSource::ForeignKey { table, .. } = &self.columns {
            tables.push(table.clone());
        }
        if let Some(r) = &self.row_reference {
            tables.push(r.table.clone());
        }
        if let Some(lane) = &self.swimlane {
            tables.extend(lane.first_table.iter().cloned());
            tables.extend(lane.second_table.iter().cloned());
        }
        tables.sort();
        tables.dedup();
        tables
    }

    /// Whether a move can write the swimlane value (it is a plain attribute).
    pub fn direct_swimlane(&self) -> Option<&str> {
        match &self.swimlane {
            Some(BoundPath {
                path: JoinPath::Direct { field },
                ..
            }) => Some(field),
            _ => None,
        }
    }
}

/// Per-request narrowing of the board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupingState {
    /// Only these columns are shown.
    #[serde(default)]
    pub restrict_columns: Option<Vec<GroupKey>>,
    /// Pins the first segment of the swimlane path to one value.
    #[serde(default)]
    pub swimlane_scope: Option<GroupKey>,
}

/// Output of a grouping pass. Axis vectors hold live keys in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedBoard {
    pub cells: CellMap,
    pub rows: Vec<GroupKey>,
    pub columns: Vec<GroupKey>,
    pub swimlanes: Vec<GroupKey>,
    /// Visible columns per swimlane, present only when a column filter applies.
    pub swimlane_columns: HashMap<GroupKey, Vec<GroupKey>>,
    pub row_labels: HashMap<GroupKey, String>,
    pub column_labels: HashMap<GroupKey, String>,
}

impl GroupedBoard {
    pub fn cell(&self, key: &CellKey) -> &[Item] {
        self.cells.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn column_label(&self, key: &GroupKey) -> String {
        label_for(&self.column_labels, key)
    }

    pub fn row_label(&self, key: &GroupKey) -> String {
        label_for(&self.row_labels, key)
    }

    /// Columns shown in `lane`, in the order of `ordered`.
    pub fn columns_for_lane(&self, lane: Option<&GroupKey>, ordered: &[GroupKey]) -> Vec<GroupKey> {
        match lane.and_then(|l| self.swimlane_columns.get(l)) {
            Some(visible) => ordered
                .iter()
                .filter(|c| visible.contains(c))
                .cloned()
                .collect(),
            None => ordered.to_vec(),
        }
    }
}

fn label_for(labels: &HashMap<GroupKey, String>, key: &GroupKey) -> String {
    match labels.get(key) {
        Some(label) => label.clone(),
        None if key.is_null() => UNALLOCATED_LABEL.to_string(),
        None => key.to_string(),
    }
}

/// Bucket `items` by the cell key the accessors produce. Cells keep the
/// items' input order.
pub fn group(
    items: &[Item],
    row_key: &dyn Fn(&Item) -> GroupKey,
    col_key: &dyn Fn(&Item) -> GroupKey,
    swimlane_key: Option<&dyn Fn(&Item) -> GroupKey>,
) -> CellMap {
    let mut cells: CellMap = HashMap::new();
    for item in items {
        let key = CellKey::new(row_key(item), col_key(item), swimlane_key.map(|f| f(item)));
        cells.entry(key).or_default().push(item.clone());
    }
    cells
}

/// Sort a cell by position (ties by id, unpositioned items last).
pub fn sort_cell(items: &mut [Item], position_attribute: &str) {
    items.sort_by(|a, b| {
        match (a.position(position_attribute), b.position(position_attribute)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then(a.id.cmp(&b.id))
    });
}

fn push_unique(keys: &mut Vec<GroupKey>, seen: &mut HashSet<GroupKey>, key: GroupKey) {
    if seen.insert(key.clone()) {
        keys.push(key);
    }
}

fn summary_labels(
    relations: &Relations,
    table: &str,
    summary_field: Option<&str>,
) -> HashMap<GroupKey, String> {
    relations
        .rows(table)
        .map(|row| {
            let label = summary_field
                .map(|f| row.key(f).to_string())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| row.id.to_string());
            (GroupKey::from(row.id), label)
        })
        .collect()
}

/// Full grouping pass for one board.
pub fn group_board(
    items: &[Item],
    config: &GroupingConfig,
    relations: &Relations,
    state: &GroupingState,
) -> GroupedBoard {
    let resolver = JoinPathResolver::new(relations);
    let lanes = config
        .swimlane
        .as_ref()
        .map(|bound| resolver.resolve(items, bound));

    let row_key = |item: &Item| match &config.row_attribute {
        Some(attr) => item.key(attr),
        None => GroupKey::Null,
    };
    let col_key = |item: &Item| item.key(&config.column_attribute);
    let lane_key = |item: &Item| {
        lanes
            .as_ref()
            .and_then(|m| m.get(&item.id).cloned())
            .unwrap_or(GroupKey::Null)
    };
    let lane_fn: Option<&dyn Fn(&Item) -> GroupKey> = if lanes.is_some() {
        Some(&lane_key as &dyn Fn(&Item) -> GroupKey)
    } else {
        None
    };

    let mut cells = group(items, &row_key, &col_key, lane_fn);
    if let Some(position) = &config.position_attribute {
        for cell in cells.values_mut() {
            sort_cell(cell, position);
        }
    }

    // Columns: data first, then declared values without items.
    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    for item in items {
        push_unique(&mut columns, &mut seen, col_key(item));
    }
    let mut column_labels = HashMap::new();
    match &config.columns {
        ColumnSource::Free => {}
        ColumnSource::Options(options) => {
            for option in options {
                push_unique(&mut columns, &mut seen, GroupKey::from(option.as_str()));
            }
        }
        ColumnSource::ForeignKey {
            table,
            summary_field,
        } => {
            for row in relations.rows(table) {
                push_unique(&mut columns, &mut seen, GroupKey::from(row.id));
            }
            column_labels = summary_labels(relations, table, summary_field.as_deref());
        }
    }
    if let Some(restrict) = &state.restrict_columns {
        let allowed: HashSet<&GroupKey> = restrict.iter().collect();
        columns.retain(|c| allowed.contains(c));
        cells.retain(|k, _| allowed.contains(&k.column));
    }

    let mut rows = Vec::new();
    let mut seen_rows = HashSet::new();
    if config.row_attribute.is_none() {
        rows.push(GroupKey::Null);
    } else {
        for item in items {
            push_unique(&mut rows, &mut seen_rows, row_key(item));
        }
    }
    let row_labels = config
        .row_reference
        .as_ref()
        .map(|r| summary_labels(relations, &r.table, r.summary_field.as_deref()))
        .unwrap_or_default();

    let mut swimlanes = Vec::new();
    let mut swimlane_columns = HashMap::new();
    if let Some(bound) = &config.swimlane {
        let scope = state.swimlane_scope.as_ref();
        let mut seen_lanes = HashSet::new();
        for lane in resolver.distinct_values(items, bound, scope) {
            push_unique(&mut swimlanes, &mut seen_lanes, lane);
        }
        if scope.is_some() {
            cells.retain(|k, _| k.swimlane.as_ref().is_some_and(|l| seen_lanes.contains(l)));
        } else {
            for item in items {
                push_unique(&mut swimlanes, &mut seen_lanes, lane_key(item));
            }
        }

        if let Some(filter) = resolver.column_filter(bound, &config.column_attribute) {
            for lane in &swimlanes {
                if let Some(allowed) = filter.get(lane) {
                    let visible: Vec<GroupKey> = columns
                        .iter()
                        .filter(|c| allowed.contains(c))
                        .cloned()
                        .collect();
                    swimlane_columns.insert(lane.clone(), visible);
                }
            }
        }
    }

    tracing::debug!(
        table = %config.table,
        items = items.len(),
        cells = cells.len(),
        columns = columns.len(),
        swimlanes = swimlanes.len(),
        "grouped board"
    );

    GroupedBoard {
        cells,
        rows,
        columns,
        swimlanes,
        swimlane_columns,
        row_labels,
        column_labels,
    }
}
