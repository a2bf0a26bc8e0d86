use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::columns::Columns;
use crate::error::{Error, Result};
use crate::sql;

/// The kind of change a [`Transaction`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Truncate => "TRUNCATE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            "TRUNCATE" => Ok(Operation::Truncate),
            other => Err(Error::UnknownOperation(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operation {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Table {
    pub namespace: String,
    pub name: String,
}

impl Table {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The quoted, qualified name for use in SQL.
    ///
    /// An empty namespace yields just the quoted table name.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            sql::quote_ident(&self.name)
        } else {
            format!(
                "{}.{}",
                sql::quote_ident(&self.namespace),
                sql::quote_ident(&self.name)
            )
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// One replicated data change: the unit that travels through a channel and
/// is applied to the target as a single SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Source WAL position of the change.
    pub lsn: u64,
    pub op: Operation,
    /// Set on rows produced by a resync rather than by the WAL stream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub snapshot: bool,
    pub tables: Vec<Table>,
    /// New column values (INSERT and UPDATE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Columns>,
    /// Row identity predicate (UPDATE and DELETE, or the key of a snapshot row).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Columns>,
}

impl Transaction {
    pub fn insert(lsn: u64, table: Table, values: Columns) -> Self {
        Self {
            lsn,
            op: Operation::Insert,
            snapshot: false,
            tables: vec![table],
            values: Some(values),
            identity: None,
        }
    }

    pub fn update(lsn: u64, table: Table, values: Columns, identity: Columns) -> Self {
        Self {
            lsn,
            op: Operation::Update,
            snapshot: false,
            tables: vec![table],
            values: Some(values),
            identity: Some(identity),
        }
    }

    pub fn delete(lsn: u64, table: Table, identity: Columns) -> Self {
        Self {
            lsn,
            op: Operation::Delete,
            snapshot: false,
            tables: vec![table],
            values: None,
            identity: Some(identity),
        }
    }

    pub fn truncate(lsn: u64, tables: Vec<Table>) -> Self {
        Self {
            lsn,
            op: Operation::Truncate,
            snapshot: false,
            tables,
            values: None,
            identity: None,
        }
    }

    /// A row copied during a resync. `key` holds the primary key columns, if
    /// the table has one, and turns the INSERT into an upsert.
    pub fn snapshot(lsn: u64, table: Table, values: Columns, key: Option<Columns>) -> Self {
        Self {
            lsn,
            op: Operation::Insert,
            snapshot: true,
            tables: vec![table],
            values: Some(values),
            identity: key.filter(|k| !k.is_empty()),
        }
    }

    /// The single target table of a row-level change.
    pub fn table(&self) -> Option<&Table> {
        match self.op {
            Operation::Truncate => None,
            _ => self.tables.first(),
        }
    }

    /// Check the cardinality rules for the operation kind.
    pub fn validate(&self) -> Result<()> {
        let op = self.op;

        if self.snapshot && op != Operation::Insert {
            return Err(Error::invalid(op, "only INSERT can be a snapshot row"));
        }

        match op {
            Operation::Truncate => {
                if self.tables.is_empty() {
                    return Err(Error::invalid(op, "no tables"));
                }
                if self.values.is_some() || self.identity.is_some() {
                    return Err(Error::invalid(op, "unexpected column values"));
                }
                return Ok(());
            }
            _ => {
                if self.tables.len() != 1 {
                    return Err(Error::invalid(
                        op,
                        format!("expected exactly one table, got {}", self.tables.len()),
                    ));
                }
            }
        }

        match (op, &self.values) {
            (Operation::Insert | Operation::Update, None) => {
                return Err(Error::invalid(op, "missing new values"));
            }
            (Operation::Insert | Operation::Update, Some(values))
                if values.changed().next().is_none() =>
            {
                return Err(Error::invalid(op, "no changed column values"));
            }
            (Operation::Delete, Some(_)) => {
                return Err(Error::invalid(op, "unexpected new values"));
            }
            _ => {}
        }

        match (op, &self.identity) {
            (Operation::Insert, Some(_)) if !self.snapshot => {
                return Err(Error::invalid(op, "unexpected identity predicate"));
            }
            (Operation::Update | Operation::Delete, None) => {
                return Err(Error::invalid(op, "missing identity predicate"));
            }
            (Operation::Update | Operation::Delete, Some(identity)) if identity.is_empty() => {
                return Err(Error::invalid(op, "empty identity predicate"));
            }
            (_, Some(identity)) => {
                if let Some(col) = identity.iter().find(|c| c.value.is_unchanged()) {
                    return Err(Error::invalid(
                        op,
                        format!("identity column '{}' has no value", col.name),
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Render the transaction as a single SQL statement.
    pub fn to_sql(&self) -> Result<String> {
        self.validate()?;
        sql::render(self)
    }

    /// Encode as the canonical channel record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a channel record. The result is validated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let txn: Transaction = serde_json::from_slice(bytes)?;
        txn.validate()?;
        Ok(txn)
    }
}
