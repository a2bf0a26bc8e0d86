use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ColumnType, Value};

/// A single replicated column value as carried in a [`Transaction`](crate::Transaction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ColumnValue {
    /// SQL NULL.
    Null,
    /// An unchanged TOASTed value that the server did not send.
    Unchanged,
    /// A text-format value together with its resolved type.
    Text {
        data: String,
        #[serde(rename = "type")]
        column_type: ColumnType,
    },
}

impl ColumnValue {
    pub fn text(data: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnValue::Text {
            data: data.into(),
            column_type,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, ColumnValue::Unchanged)
    }

    /// Decode the value. Returns `None` for unchanged values.
    pub fn decode(&self) -> Option<Value> {
        match self {
            ColumnValue::Null => Some(Value::Null),
            ColumnValue::Unchanged => None,
            ColumnValue::Text { data, column_type } => Some(column_type.decode(data)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: ColumnValue,
}

/// An ordered set of named column values.
///
/// Column names are unique and keep the relation's declared order, which
/// keeps generated SQL deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Column>", into = "Vec<Column>")]
pub struct Columns {
    columns: Vec<Column>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. Fails if a column of that name already exists.
    pub fn push(&mut self, name: impl Into<String>, value: ColumnValue) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(Error::DuplicateColumn(name));
        }
        self.columns.push(Column { name, value });
        Ok(())
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, name: impl Into<String>, value: ColumnValue) -> Result<Self> {
        self.push(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// Columns whose value was actually sent (not an unchanged TOAST value).
    pub fn changed(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.value.is_unchanged())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl TryFrom<Vec<Column>> for Columns {
    type Error = Error;

    fn try_from(columns: Vec<Column>) -> Result<Self> {
        let mut set = Columns::new();
        for column in columns {
            set.push(column.name, column.value)?;
        }
        Ok(set)
    }
}

impl From<Columns> for Vec<Column> {
    fn from(columns: Columns) -> Self {
        columns.columns
    }
}

impl<'a> IntoIterator for &'a Columns {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}
