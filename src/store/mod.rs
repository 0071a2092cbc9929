//! The entity-store collaborator.
//!
//! Storage is reached through [`EntityStore`]: a handful of single-row-set operations over
//! named tables of JSON object rows. Every call is atomic on its own, but nothing spans calls;
//! sequencing several calls safely is the job of the ledger.

mod memory;

pub use memory::MemoryStore;

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// A loosely typed row exactly as storage holds it
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Students,
    Groups,
    SubscriptionPlans,
    StudentSubscriptions,
    Attendance,
    FinancialTransactions,
    ScheduleEvents,
    EventExceptions,
    Expenses,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::Students,
        Table::Groups,
        Table::SubscriptionPlans,
        Table::StudentSubscriptions,
        Table::Attendance,
        Table::FinancialTransactions,
        Table::ScheduleEvents,
        Table::EventExceptions,
        Table::Expenses,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Students => "students",
            Table::Groups => "groups",
            Table::SubscriptionPlans => "subscription_plans",
            Table::StudentSubscriptions => "student_subscriptions",
            Table::Attendance => "attendance",
            Table::FinancialTransactions => "financial_transactions",
            Table::ScheduleEvents => "schedule_events",
            Table::EventExceptions => "schedule_event_exceptions",
            Table::Expenses => "expenses",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An equality conjunction over row columns. A `null` condition also matches a row that
/// lacks the column; an empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq<C: Into<String>, V: Into<Value>>(column: C, value: V) -> Self {
        Filter::all().and(column, value)
    }

    pub fn and<C: Into<String>, V: Into<Value>>(mut self, column: C, value: V) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{table}: {message}")]
    Backend { table: Table, message: String },
    #[error("could not encode row")]
    Encode(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotARow(String),
    #[error("{0} returned a row without an id")]
    MissingId(Table),
    #[error("{0}: no stored row matched")]
    NoMatch(Table),
}

/// Storage operations the core relies on.
pub trait EntityStore {
    /// Every row of `table`, in storage order.
    fn list(&self, table: Table) -> Result<Vec<Row>, StoreError>;

    /// Insert `row`, assigning an `id` when it has none. Returns the stored row.
    fn insert(&mut self, table: Table, row: Row) -> Result<Row, StoreError>;

    /// Merge `patch` into every row matching `filter`. Returns how many rows changed.
    fn update(&mut self, table: Table, filter: &Filter, patch: Row) -> Result<usize, StoreError>;

    /// Merge `row` into the row agreeing with it on every `conflict` column, or insert it.
    fn upsert(&mut self, table: Table, row: Row, conflict: &[&str]) -> Result<Row, StoreError>;

    /// Remove every row matching `filter`. Returns how many rows went.
    fn delete(&mut self, table: Table, filter: &Filter) -> Result<usize, StoreError>;
}

/// Fail a write that had to change an existing row but matched none.
pub(crate) fn matched(
    table: Table,
    count: Result<usize, StoreError>,
) -> Result<usize, StoreError> {
    match count? {
        0 => Err(StoreError::NoMatch(table)),
        n => Ok(n),
    }
}

/// Serialise an entity into a row. An empty `id` is left out so the store assigns one.
pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    let mut row = match serde_json::to_value(value)? {
        Value::Object(row) => row,
        other => return Err(StoreError::NotARow(other.to_string())),
    };

    if row.get("id").and_then(Value::as_str) == Some("") {
        row.remove("id");
    }

    Ok(row)
}

/// Serialise a single column value.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

/// Build a patch from column/value pairs.
pub fn patch<I, C>(columns: I) -> Row
where
    I: IntoIterator<Item = (C, Value)>,
    C: Into<String>,
{
    columns.into_iter().map(|(c, v)| (c.into(), v)).collect()
}

pub(crate) fn row_id(table: Table, row: &Row) -> Result<String, StoreError> {
    row.get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(StoreError::MissingId(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_null_matches_missing_column() {
        let row = patch(vec![("student_id", json!("s1"))]);

        assert!(Filter::all().matches(&row));
        assert!(Filter::eq("student_id", "s1").matches(&row));
        assert!(Filter::eq("student_id", "s1")
            .and("student_subscription_id", Value::Null)
            .matches(&row));
        assert!(!Filter::eq("student_id", "s2").matches(&row));
    }

    #[test]
    fn to_row_drops_empty_id() {
        #[derive(Serialize)]
        struct Thing {
            id: String,
            name: &'static str,
        }

        let row = to_row(&Thing {
            id: String::new(),
            name: "x",
        })
        .unwrap();
        assert!(row.get("id").is_none());

        let row = to_row(&Thing {
            id: "t1".into(),
            name: "x",
        })
        .unwrap();
        assert_eq!(row_id(Table::Groups, &row).unwrap(), "t1");
    }

    #[test]
    fn to_row_rejects_non_objects() {
        assert!(matches!(to_row(&5), Err(StoreError::NotARow(_))));
    }
}
