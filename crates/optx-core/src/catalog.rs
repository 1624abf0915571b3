//! Table metadata consumed by statistics derivation.
//!
//! The optimizer only reads from a [`Catalog`]; it is shared across concurrent
//! searches as `Arc<dyn Catalog>`.

use crate::expr::{ColumnRef, TableRef};
use crate::stats::Statistics;
use std::collections::HashMap;

pub trait Catalog: Send + Sync {
    fn get_table_stats(&self, table: &TableRef) -> Option<Statistics>;
    fn get_table_columns(&self, table: &TableRef) -> Option<Vec<ColumnRef>>;
}

#[derive(Debug, Clone)]
struct TableEntry {
    columns: Vec<ColumnRef>,
    stats: Statistics,
}

/// Catalog populated programmatically, used by tests and the HTTP server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<TableRef, TableEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, columns: Vec<ColumnRef>, stats: Statistics) {
        self.tables
            .insert(table.clone(), TableEntry { columns, stats });
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Catalog for InMemoryCatalog {
    fn get_table_stats(&self, table: &TableRef) -> Option<Statistics> {
        self.tables.get(table).map(|t| t.stats.clone())
    }

    fn get_table_columns(&self, table: &TableRef) -> Option<Vec<ColumnRef>> {
        self.tables.get(table).map(|t| t.columns.clone())
    }
}
