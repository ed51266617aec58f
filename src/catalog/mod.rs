use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::common::TableId;
use crate::storage::heap::file::HeapFile;
use crate::tuple::schema::Schema;

struct TableEntry {
    name: String,
    file: Arc<HeapFile>,
}

/// Keeps track of every table: its name and the heap file storing it.
#[derive(Default)]
pub struct Catalog {
    tables: DashMap<TableId, TableEntry>,
    table_name_to_id: DashMap<String, TableId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table. An existing table with the same name or the same id is replaced.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str) {
        let table_id = file.id();
        if let Some((_, previous_id)) = self.table_name_to_id.remove(name) {
            self.tables.remove(&previous_id);
        }
        if let Some(previous) = self.tables.insert(
            table_id,
            TableEntry {
                name: name.to_owned(),
                file,
            },
        ) {
            self.table_name_to_id.remove(&previous.name);
        }
        self.table_name_to_id.insert(name.to_owned(), table_id);
        debug!(table_id, name, "Added table to catalog");
    }

    pub fn table_id(&self, table_name: &str) -> Option<TableId> {
        self.table_name_to_id.get(table_name).map(|kv| *kv.value())
    }

    pub fn heap_file(&self, table_id: TableId) -> Option<Arc<HeapFile>> {
        self.tables
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
    }

    pub fn schema(&self, table_id: TableId) -> Option<Schema> {
        self.tables
            .get(&table_id)
            .map(|entry| entry.file.schema().clone())
    }

    pub fn table_name(&self, table_id: TableId) -> Option<String> {
        self.tables.get(&table_id).map(|entry| entry.name.clone())
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.iter().map(|entry| *entry.key()).collect()
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names = self
            .table_name_to_id
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
