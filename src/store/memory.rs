use super::{EntityStore, Filter, Row, StoreError, Table};
use log::trace;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// An [`EntityStore`] held entirely in memory. Rows keep their insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<Table, Vec<Row>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Seed `table` with raw rows, stored as given.
    pub fn with_rows(mut self, table: Table, rows: Vec<Row>) -> Self {
        self.tables.entry(table).or_default().extend(rows);
        self
    }

    pub fn rows(&self, table: Table) -> &[Row] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn merge(target: &mut Row, patch: &Row) {
    for (column, value) in patch {
        target.insert(column.clone(), value.clone());
    }
}

impl EntityStore for MemoryStore {
    fn list(&self, table: Table) -> Result<Vec<Row>, StoreError> {
        Ok(self.rows(table).to_vec())
    }

    fn insert(&mut self, table: Table, mut row: Row) -> Result<Row, StoreError> {
        if !row.get("id").map_or(false, Value::is_string) {
            row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }
        trace!("insert into {}: {:?}", table, row.get("id"));

        self.tables.entry(table).or_default().push(row.clone());
        Ok(row)
    }

    fn update(&mut self, table: Table, filter: &Filter, patch: Row) -> Result<usize, StoreError> {
        let mut changed = 0;
        for row in self.tables.entry(table).or_default().iter_mut() {
            if filter.matches(row) {
                merge(row, &patch);
                changed += 1;
            }
        }
        trace!("update {}: {} row(s)", table, changed);

        Ok(changed)
    }

    fn upsert(&mut self, table: Table, row: Row, conflict: &[&str]) -> Result<Row, StoreError> {
        let key = conflict.iter().fold(Filter::all(), |filter, column| {
            filter.and(*column, row.get(*column).cloned().unwrap_or(Value::Null))
        });

        let existing = self
            .tables
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|r| key.matches(r));

        match existing {
            Some(existing) => {
                merge(existing, &row);
                Ok(existing.clone())
            }
            None => self.insert(table, row),
        }
    }

    fn delete(&mut self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        let rows = self.tables.entry(table).or_default();
        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        trace!("delete from {}: {} row(s)", table, before - rows.len());

        Ok(before - rows.len())
    }
}
