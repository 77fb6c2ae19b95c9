use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ItemId = i64;

/// A grouping value on one axis.
///
/// `Null` is the "unallocated" sentinel. Numbers and text never compare equal
/// to each other, so a numeric foreign key and its string form stay distinct.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GroupKey {
    Null,
    Number(f64),
    Text(String),
}

impl GroupKey {
    /// Normalize a raw attribute value. Missing, `null` and `""` are unallocated.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Null,
            Some(Value::String(s)) if s.is_empty() => Self::Null,
            Some(Value::String(s)) => Self::Text(s.clone()),
            Some(Value::Number(n)) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            Some(Value::Bool(b)) => Self::Text(b.to_string()),
            Some(other) => Self::Text(other.to_string()),
        }
    }

    /// Parse a value that arrived as plain text (query strings, CLI flags).
    /// `"null"` and `""` are unallocated, anything numeric becomes a number.
    pub fn parse_lenient(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s == "null" {
            return Self::Null;
        }
        match s.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(s.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The referenced row id when this key is a whole number.
    pub fn as_id(&self) -> Option<ItemId> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as ItemId),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Text(_) => 1,
            Self::Null => 2,
        }
    }

    // -0.0 and 0.0 are the same key; every NaN is the same key.
    fn number_bits(n: f64) -> u64 {
        if n == 0.0 {
            0
        } else if n.is_nan() {
            f64::NAN.to_bits()
        } else {
            n.to_bits()
        }
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Number(a), Self::Number(b)) => Self::number_bits(*a) == Self::number_bits(*b),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Number(n) => Self::number_bits(*n).hash(state),
            Self::Text(s) => s.hash(state),
        }
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => {
                if self == other {
                    Ordering::Equal
                } else {
                    a.total_cmp(b)
                }
            }
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'de> Deserialize<'de> for GroupKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(Some(&value)))
    }
}

/// For `Option<GroupKey>` fields with `#[serde(default)]`: an absent field is
/// `None`, an explicit `null` is `Some(GroupKey::Null)`.
pub fn deserialize_present_key<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<GroupKey>, D::Error> {
    GroupKey::deserialize(deserializer).map(Some)
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Self::Null
        } else {
            Self::Text(s.to_string())
        }
    }
}

impl From<i64> for GroupKey {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

/// A record produced by the data layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Item {
    pub fn new(id: ItemId) -> Self {
        Self {
            id,
            attributes: Map::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Grouping value of an attribute.
    pub fn key(&self, name: &str) -> GroupKey {
        GroupKey::from_value(self.get(name))
    }

    /// Foreign-key id held by an attribute.
    pub fn reference(&self, name: &str) -> Option<ItemId> {
        match self.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as ItemId)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Manual-order position stored under `field`, if present and finite.
    pub fn position(&self, field: &str) -> Option<f64> {
        self.get(field)
            .and_then(Value::as_f64)
            .filter(|p| p.is_finite())
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }
}

/// Address of one cell in the grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub row: GroupKey,
    pub column: GroupKey,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present_key"
    )]
    pub swimlane: Option<GroupKey>,
}

impl CellKey {
    pub fn new(row: GroupKey, column: GroupKey, swimlane: Option<GroupKey>) -> Self {
        Self {
            row,
            column,
            swimlane,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Column,
    Row,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Column => "column",
            Self::Row => "row",
        }
    }
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "column" | "columns" => Ok(Self::Column),
            "row" | "rows" => Ok(Self::Row),
            _ => Err(format!("Invalid axis: {}", s)),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted custom ordering of one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub axis: Axis,
    pub order: Vec<GroupKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisOrders {
    #[serde(default)]
    pub column: Vec<GroupKey>,
    #[serde(default)]
    pub row: Vec<GroupKey>,
}

impl AxisOrders {
    pub fn get(&self, axis: Axis) -> &[GroupKey] {
        match axis {
            Axis::Column => &self.column,
            Axis::Row => &self.row,
        }
    }

    pub fn set(&mut self, axis: Axis, order: Vec<GroupKey>) {
        match axis {
            Axis::Column => self.column = order,
            Axis::Row => self.row = order,
        }
    }
}

// ── Table schema ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Bool,
    Date,
    /// Enumerated string with a declared option list.
    Options { options: Vec<String> },
    /// Reference to a row of `table`; `summary_field` labels it.
    ForeignKey {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_field: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    pub fn foreign_key(name: &str, table: &str, summary_field: Option<&str>) -> Self {
        Self::new(
            name,
            FieldKind::ForeignKey {
                table: table.to_string(),
                summary_field: summary_field.map(str::to_string),
            },
        )
    }

    pub fn referenced_table(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ForeignKey { table, .. } => Some(table),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl TableSchema {
    pub fn new(name: &str, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.to_string(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// All table schemas known to the data layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: HashMap<String, TableSchema>,
}

impl Schema {
    pub fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn with(mut self, table: TableSchema) -> Self {
        self.insert(table);
        self
    }
}

/// Snapshot of the rows of related tables, keyed by table then id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relations {
    pub tables: HashMap<String, BTreeMap<ItemId, Item>>,
}

impl Relations {
    pub fn insert_rows(&mut self, table: &str, rows: impl IntoIterator<Item = Item>) {
        let entry = self.tables.entry(table.to_string()).or_default();
        for row in rows {
            entry.insert(row.id, row);
        }
    }

    pub fn with_rows(mut self, table: &str, rows: impl IntoIterator<Item = Item>) -> Self {
        self.insert_rows(table, rows);
        self
    }

    pub fn row(&self, table: &str, id: ItemId) -> Option<&Item> {
        self.tables.get(table)?.get(&id)
    }

    /// Rows of `table` in id order.
    pub fn rows<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a Item> + use<'a> {
        self.tables.get(table).into_iter().flat_map(|t| t.values())
    }
}
