//! Cache for PostgreSQL relation metadata.
//!
//! PostgreSQL sends a Relation message before the first change to each table
//! in a replication session, and again whenever the table's definition
//! changes. Relation ids are only meaningful within the session.

use std::collections::HashMap;

use pgarrow_core::Table;

use super::pgoutput::{ColumnInfo, RelationMessage, ReplicaIdentity};
use crate::error::{PgError, PgResult};

/// Cached information about a PostgreSQL relation (table).
#[derive(Debug, Clone, PartialEq)]
pub struct RelationInfo {
    pub relation_id: u32,
    pub namespace: String,
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub replica_identity: ReplicaIdentity,
}

impl RelationInfo {
    pub fn table(&self) -> Table {
        Table::new(&self.namespace, &self.name)
    }

    /// Columns that make up the replica identity, in declared order.
    pub fn identity_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.is_identity())
    }
}

impl From<&RelationMessage> for RelationInfo {
    fn from(msg: &RelationMessage) -> Self {
        Self {
            relation_id: msg.relation_id,
            namespace: msg.namespace.clone(),
            name: msg.name.clone(),
            columns: msg.columns.clone(),
            replica_identity: msg.replica_identity,
        }
    }
}

/// Cache of relation id to table metadata.
#[derive(Debug, Default)]
pub struct RelationCache {
    relations: HashMap<u32, RelationInfo>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a relation definition, replacing any previous one for the same id.
    pub fn put(&mut self, msg: &RelationMessage) {
        self.relations.insert(msg.relation_id, msg.into());
    }

    /// Look up relation info by id.
    pub fn get(&self, relation_id: u32) -> PgResult<&RelationInfo> {
        self.relations
            .get(&relation_id)
            .ok_or(PgError::UnknownRelation(relation_id))
    }

    pub fn contains(&self, relation_id: u32) -> bool {
        self.relations.contains_key(&relation_id)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
