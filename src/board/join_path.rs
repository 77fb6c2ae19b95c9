//! Dotted attribute paths through foreign keys.
//!
//! A path such as `project.client.name` is parsed once into a [`JoinPath`],
//! bound against the table schema into a [`BoundPath`] (which records the
//! table reached by each hop), and then resolved per render against the
//! current item set and a snapshot of the related rows.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::models::{GroupKey, Item, ItemId, Relations, Schema};
use crate::errors::{BoardError, BoardResult};

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("segment pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JoinPath {
    /// `field`
    Direct { field: String },
    /// `field.target`
    OneHop { field: String, target: String },
    /// `field.through.target`
    TwoHop {
        field: String,
        through: String,
        target: String,
    },
}

impl JoinPath {
    pub fn parse(path: &str) -> BoardResult<Self> {
        let segments: Vec<&str> = path.trim().split('.').collect();
        for segment in &segments {
            if segment.is_empty() {
                return Err(BoardError::invalid_path(path, "empty segment"));
            }
            if !SEGMENT.is_match(segment) {
                return Err(BoardError::invalid_path(
                    path,
                    format!("'{}' is not a field name", segment),
                ));
            }
        }
        match segments.as_slice() {
            [field] => Ok(Self::Direct {
                field: field.to_string(),
            }),
            [field, target] => Ok(Self::OneHop {
                field: field.to_string(),
                target: target.to_string(),
            }),
            [field, through, target] => Ok(Self::TwoHop {
                field: field.to_string(),
                through: through.to_string(),
                target: target.to_string(),
            }),
            _ => Err(BoardError::invalid_path(
                path,
                format!("{} segments, at most 3 are supported", segments.len()),
            )),
        }
    }

    /// First segment: an attribute of the root table.
    pub fn root(&self) -> &str {
        match self {
            Self::Direct { field } | Self::OneHop { field, .. } | Self::TwoHop { field, .. } => {
                field
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::Direct { .. } => 1,
            Self::OneHop { .. } => 2,
            Self::TwoHop { .. } => 3,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.depth() > 1
    }

    /// Check every segment against `schema` starting at `root_table` and
    /// record the tables the hops land on.
    pub fn bind(&self, schema: &Schema, root_table: &str) -> BoardResult<BoundPath> {
        let path = self.to_string();
        let fk_target = |table: &str, field: &str| -> BoardResult<String> {
            let def = schema
                .table(table)
                .ok_or_else(|| {
                    BoardError::invalid_path(&path, format!("unknown table '{}'", table))
                })?
                .field(field)
                .ok_or_else(|| {
                    BoardError::invalid_path(&path, format!("'{}' has no field '{}'", table, field))
                })?;
            let referenced = def.referenced_table().ok_or_else(|| {
                BoardError::invalid_path(
                    &path,
                    format!("'{}.{}' is not a foreign key", table, field),
                )
            })?;
            if schema.table(referenced).is_none() {
                return Err(BoardError::invalid_path(
                    &path,
                    format!("'{}.{}' references unknown table '{}'", table, field, referenced),
                ));
            }
            Ok(referenced.to_string())
        };
        let has_field = |table: &str, field: &str| -> BoardResult<()> {
            let known = field == "id"
                || schema
                    .table(table)
                    .is_some_and(|t| t.field(field).is_some());
            if known {
                Ok(())
            } else {
                Err(BoardError::invalid_path(
                    &path,
                    format!("'{}' has no field '{}'", table, field),
                ))
            }
        };

        if schema.table(root_table).is_none() {
            return Err(BoardError::invalid_path(
                &path,
                format!("unknown table '{}'", root_table),
            ));
        }

        let (first, second) = match self {
            Self::Direct { field } => {
                has_field(root_table, field)?;
                (None, None)
            }
            Self::OneHop { field, target } => {
                let first = fk_target(root_table, field)?;
                has_field(&first, target)?;
                (Some(first), None)
            }
            Self::TwoHop {
                field,
                through,
                target,
            } => {
                let first = fk_target(root_table, field)?;
                let second = fk_target(&first, through)?;
                has_field(&second, target)?;
                (Some(first), Some(second))
            }
        };

        Ok(BoundPath {
            path: self.clone(),
            first_table: first,
            second_table: second,
        })
    }
}

impl fmt::Display for JoinPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { field } => write!(f, "{}", field),
            Self::OneHop { field, target } => write!(f, "{}.{}", field, target),
            Self::TwoHop {
                field,
                through,
                target,
            } => write!(f, "{}.{}.{}", field, through, target),
        }
    }
}

impl FromStr for JoinPath {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JoinPath {
    type Error = BoardError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<JoinPath> for String {
    fn from(path: JoinPath) -> Self {
        path.to_string()
    }
}

/// A path checked against the schema, with the table each hop reaches.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPath {
    pub path: JoinPath,
    pub first_table: Option<String>,
    pub second_table: Option<String>,
}

impl BoundPath {
    pub fn root(&self) -> &str {
        self.path.root()
    }
}

fn attribute_key(row: &Item, name: &str) -> GroupKey {
    if name == "id" {
        GroupKey::from(row.id)
    } else {
        row.key(name)
    }
}

/// Resolves bound paths against a snapshot of related rows.
pub struct JoinPathResolver<'a> {
    relations: &'a Relations,
}

impl<'a> JoinPathResolver<'a> {
    pub fn new(relations: &'a Relations) -> Self {
        Self { relations }
    }

    /// Grouping value of one item. Dangling references resolve to `Null`.
    pub fn value_of(&self, item: &Item, bound: &BoundPath) -> GroupKey {
        match (&bound.path, &bound.first_table, &bound.second_table) {
            (JoinPath::Direct { field }, _, _) => attribute_key(item, field),
            (JoinPath::OneHop { field, target }, Some(first), _) => item
                .reference(field)
                .and_then(|id| self.relations.row(first, id))
                .map(|row| attribute_key(row, target))
                .unwrap_or(GroupKey::Null),
            (
                JoinPath::TwoHop {
                    field,
                    through,
                    target,
                },
                Some(first),
                Some(second),
            ) => item
                .reference(field)
                .and_then(|id| self.relations.row(first, id))
                .and_then(|mid| mid.reference(through))
                .and_then(|id| self.relations.row(second, id))
                .map(|row| attribute_key(row, target))
                .unwrap_or(GroupKey::Null),
            _ => GroupKey::Null,
        }
    }

    /// Grouping value of every item, keyed by item id.
    pub fn resolve(&self, items: &[Item], bound: &BoundPath) -> HashMap<ItemId, GroupKey> {
        items
            .iter()
            .map(|item| (item.id, self.value_of(item, bound)))
            .collect()
    }

    /// Distinct non-null values the path can take, in first-seen order.
    ///
    /// `scope` is the value the grouping state pins the first segment to
    /// (a related row id for joined paths); it narrows the candidates to the
    /// rows reachable from that one.
    pub fn distinct_values(
        &self,
        items: &[Item],
        bound: &BoundPath,
        scope: Option<&GroupKey>,
    ) -> Vec<GroupKey> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |key: GroupKey| {
            if !key.is_null() && seen.insert(key.clone()) {
                out.push(key);
            }
        };
        let scope_id = scope.and_then(GroupKey::as_id);

        match (&bound.path, &bound.first_table, &bound.second_table) {
            (JoinPath::Direct { field }, _, _) => match scope {
                Some(key) => push(key.clone()),
                None => items.iter().for_each(|i| push(attribute_key(i, field))),
            },
            (JoinPath::OneHop { target, .. }, Some(first), _) => {
                for row in self.relations.rows(first) {
                    if scope.is_none() || scope_id == Some(row.id) {
                        push(attribute_key(row, target));
                    }
                }
            }
            (
                JoinPath::TwoHop {
                    through, target, ..
                },
                Some(first),
                Some(second),
            ) => match scope {
                None => self
                    .relations
                    .rows(second)
                    .for_each(|row| push(attribute_key(row, target))),
                Some(_) => {
                    let reachable = scope_id
                        .and_then(|id| self.relations.row(first, id))
                        .and_then(|mid| mid.reference(through))
                        .and_then(|id| self.relations.row(second, id));
                    if let Some(row) = reachable {
                        push(attribute_key(row, target));
                    }
                }
            },
            _ => {}
        }
        out
    }

    /// For a joined path rooted at the column attribute: the column values
    /// (ids of rows in the first related table) that lead to each swimlane
    /// value. `None` when the path is not rooted at the column attribute.
    pub fn column_filter(
        &self,
        bound: &BoundPath,
        column_attribute: &str,
    ) -> Option<HashMap<GroupKey, HashSet<GroupKey>>> {
        if bound.root() != column_attribute {
            return None;
        }
        let first = bound.first_table.as_deref()?;
        let mut filter: HashMap<GroupKey, HashSet<GroupKey>> = HashMap::new();

        for row in self.relations.rows(first) {
            let lane = match &bound.path {
                JoinPath::OneHop { target, .. } => attribute_key(row, target),
                JoinPath::TwoHop {
                    through, target, ..
                } => bound
                    .second_table
                    .as_deref()
                    .and_then(|second| {
                        row.reference(through)
                            .and_then(|id| self.relations.row(second, id))
                    })
                    .map(|r| attribute_key(r, target))
                    .unwrap_or(GroupKey::Null),
                JoinPath::Direct { .. } => return None,
            };
            filter.entry(lane).or_default().insert(GroupKey::from(row.id));
        }
        Some(filter)
    }
}
