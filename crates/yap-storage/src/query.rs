//! Collection queries and value ordering

use crate::{CollectionPath, Snapshot, StoreError};
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One sort key of a query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(field: &str, direction: Direction) -> Self {
        Self {
            field: field.to_string(),
            direction,
        }
    }
}

/// Ordered read of one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: CollectionPath,
    pub order_by: Vec<OrderBy>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            order_by: Vec::new(),
        }
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(OrderBy::new(field, direction));
        self
    }

    /// More than one sort key needs a composite index on some backends
    pub fn is_compound(&self) -> bool {
        self.order_by.len() > 1
    }

    /// Sort keys must be plain identifiers; backends embed them in queries
    pub fn validate(&self) -> Result<(), StoreError> {
        for key in &self.order_by {
            let valid = !key.field.is_empty()
                && key.field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(StoreError::InvalidPath(format!(
                    "invalid sort field: {}",
                    key.field
                )));
            }
        }
        Ok(())
    }

    /// Sort snapshots by the query keys, breaking ties on document id
    pub fn sort(&self, docs: &mut [Snapshot]) {
        docs.sort_by(|a, b| {
            for key in &self.order_by {
                let ord = compare_values(a.data.get(&key.field), b.data.get(&key.field));
                let ord = match key.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id().cmp(b.id())
        });
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order over JSON values: missing/null < bool < number < string,
/// with arrays and objects last and compared only by kind
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
