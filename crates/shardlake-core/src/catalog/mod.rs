//! Catalog authority: databases and the tables they own, looked up by id or
//! name.

pub mod property;
pub mod table;
pub mod tablet_index;

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::error::CatalogError;
use crate::types::{DbId, TableId};

use self::table::Table;

/// A database and its tables.
#[derive(Debug, Clone, Default)]
pub struct Database {
    pub id: DbId,
    pub name: String,
    tables: BTreeMap<TableId, Table>,
    name_to_id: HashMap<String, TableId>,
}

impl Database {
    pub fn new(id: DbId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tables: BTreeMap::new(),
            name_to_id: HashMap::new(),
        }
    }

    /// Register a table. Fails if the name is taken.
    pub fn add_table(&mut self, table: Table) -> Result<(), CatalogError> {
        if self.name_to_id.contains_key(&table.name) || self.tables.contains_key(&table.id) {
            return Err(CatalogError::TableAlreadyExists(table.name));
        }
        self.name_to_id.insert(table.name.clone(), table.id);
        self.tables.insert(table.id, table);
        Ok(())
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(&id)
    }

    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.name_to_id.get(name).and_then(|id| self.tables.get(id))
    }

    /// Tables in id order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Remove a table from both lookup maps and hand back ownership.
    pub fn forget_table(&mut self, id: TableId) -> Option<Table> {
        let table = self.tables.remove(&id)?;
        self.name_to_id.remove(&table.name);
        debug!(db_id = self.id, table_id = id, "table removed from catalog");
        Some(table)
    }

    /// Force a dependent view inactive. Returns `false` if no such view
    /// exists any more.
    pub fn deactivate_view(&mut self, id: TableId) -> bool {
        match self.tables.get_mut(&id) {
            Some(table) => table.set_active(false),
            None => false,
        }
    }
}

/// All databases known to this node.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    databases: BTreeMap<DbId, Database>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_database(&mut self, id: DbId, name: &str) -> Result<(), CatalogError> {
        if self.databases.values().any(|db| db.name == name) || self.databases.contains_key(&id)
        {
            return Err(CatalogError::DatabaseAlreadyExists(name.to_string()));
        }
        self.databases.insert(id, Database::new(id, name));
        Ok(())
    }

    pub fn database(&self, id: DbId) -> Result<&Database, CatalogError> {
        self.databases
            .get(&id)
            .ok_or_else(|| CatalogError::db_not_found(id))
    }

    pub fn database_mut(&mut self, id: DbId) -> Result<&mut Database, CatalogError> {
        self.databases
            .get_mut(&id)
            .ok_or_else(|| CatalogError::db_not_found(id))
    }

    pub fn database_by_name(&self, name: &str) -> Result<&Database, CatalogError> {
        self.databases
            .values()
            .find(|db| db.name == name)
            .ok_or_else(|| CatalogError::DatabaseNotFound(name.to_string()))
    }

    pub fn databases(&self) -> impl Iterator<Item = &Database> {
        self.databases.values()
    }

    pub fn table(&self, db_id: DbId, table_id: TableId) -> Result<&Table, CatalogError> {
        self.database(db_id)?
            .table(table_id)
            .ok_or_else(|| CatalogError::table_not_found(table_id))
    }

    pub fn table_mut(&mut self, db_id: DbId, table_id: TableId) -> Result<&mut Table, CatalogError> {
        self.database_mut(db_id)?
            .table_mut(table_id)
            .ok_or_else(|| CatalogError::table_not_found(table_id))
    }
}
