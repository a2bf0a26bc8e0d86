//! SQL synthesis for replicated transactions.
//!
//! Every identifier is double-quoted and every value that is not a plain
//! number or boolean is single-quoted and cast to its column type, so the
//! output is safe to run with the simple query protocol.

use crate::columns::{Column, ColumnValue, Columns};
use crate::error::{Error, Result};
use crate::transaction::{Operation, Table, Transaction};
use crate::types::{is_plain_number, ColumnType, Value};

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
///
/// Backslashes are left alone, which is only safe on a session with
/// `standard_conforming_strings = on`.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Type names that are plain lowercase identifiers are emitted as is,
/// anything else is quoted.
fn type_name_sql(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .map_or(false, |c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        quote_ident(name)
    }
}

/// Last check before text goes into a statement without quotes.
fn unquoted(literal: String) -> Result<String> {
    if matches!(literal.as_str(), "NULL" | "true" | "false") || is_plain_number(&literal) {
        Ok(literal)
    } else {
        Err(Error::UnsafeLiteral(literal))
    }
}

fn quoted_with_cast(text: &str, column_type: &ColumnType) -> String {
    match (&column_type.schema, &column_type.name) {
        (Some(schema), Some(name)) => format!(
            "{}::{}.{}",
            quote_literal(text),
            quote_ident(schema),
            quote_ident(name)
        ),
        (None, Some(name)) => format!("{}::{}", quote_literal(text), type_name_sql(name)),
        (_, None) => quote_literal(text),
    }
}

/// Render a column value as a SQL literal.
pub fn render_value(name: &str, value: &ColumnValue) -> Result<String> {
    let (data, column_type) = match value {
        ColumnValue::Null => return unquoted("NULL".to_string()),
        ColumnValue::Unchanged => return Err(Error::UnchangedValue(name.to_string())),
        ColumnValue::Text { data, column_type } => (data, column_type),
    };

    match column_type.decode(data) {
        Value::Null => unquoted("NULL".to_string()),
        Value::Bool(b) => unquoted(b.to_string()),
        Value::Int(i) => unquoted(i.to_string()),
        Value::Numeric(n) => unquoted(n),
        // Keep the server's text so the value is not reformatted
        Value::Float(_) if is_plain_number(data) => unquoted(data.clone()),
        Value::Float(_) => Ok(quoted_with_cast(data, column_type)),
        decoded => {
            let text = decoded.to_text().unwrap_or_else(|| data.clone());
            Ok(quoted_with_cast(&text, column_type))
        }
    }
}

fn column_list<'a>(columns: impl Iterator<Item = &'a Column>) -> String {
    columns
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(",")
}

fn value_list<'a>(columns: impl Iterator<Item = &'a Column>) -> Result<String> {
    Ok(columns
        .map(|c| render_value(&c.name, &c.value))
        .collect::<Result<Vec<_>>>()?
        .join(","))
}

fn assignments<'a>(columns: impl Iterator<Item = &'a Column>) -> Result<String> {
    Ok(columns
        .map(|c| -> Result<String> {
            Ok(format!("{} = {}", quote_ident(&c.name), render_value(&c.name, &c.value)?))
        })
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

fn predicate(identity: &Columns) -> Result<String> {
    Ok(identity
        .iter()
        .map(|c| -> Result<String> {
            if c.value.is_null() {
                Ok(format!("{} IS NULL", quote_ident(&c.name)))
            } else {
                Ok(format!("{} = {}", quote_ident(&c.name), render_value(&c.name, &c.value)?))
            }
        })
        .collect::<Result<Vec<_>>>()?
        .join(" AND "))
}

fn single_table(txn: &Transaction) -> Result<&Table> {
    txn.table()
        .ok_or_else(|| Error::invalid(txn.op, "expected exactly one table"))
}

fn required<'a>(op: Operation, columns: &'a Option<Columns>, what: &str) -> Result<&'a Columns> {
    columns
        .as_ref()
        .ok_or_else(|| Error::invalid(op, format!("missing {}", what)))
}

fn render_insert(txn: &Transaction) -> Result<String> {
    let table = single_table(txn)?;
    let values = required(txn.op, &txn.values, "new values")?;
    if values.changed().next().is_none() {
        return Err(Error::EmptyColumnList(txn.op));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.qualified_name(),
        column_list(values.changed()),
        value_list(values.changed())?
    );

    if let Some(key) = txn.identity.as_ref().filter(|k| txn.snapshot && !k.is_empty()) {
        let updates: Vec<String> = values
            .changed()
            .filter(|c| !key.contains(&c.name))
            .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(&c.name)))
            .collect();
        let conflict = column_list(key.iter());
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", conflict));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                conflict,
                updates.join(", ")
            ));
        }
    }

    Ok(sql)
}

fn render_update(txn: &Transaction) -> Result<String> {
    let table = single_table(txn)?;
    let values = required(txn.op, &txn.values, "new values")?;
    let identity = required(txn.op, &txn.identity, "identity predicate")?;

    // Key columns that kept their value add nothing to the SET list
    let mut set: Vec<&Column> = values
        .changed()
        .filter(|c| identity.get(&c.name) != Some(&c.value))
        .collect();
    if set.is_empty() {
        set = values.changed().collect();
    }
    if set.is_empty() {
        return Err(Error::EmptyColumnList(txn.op));
    }

    Ok(format!(
        "UPDATE {} SET {} WHERE {}",
        table.qualified_name(),
        assignments(set.into_iter())?,
        predicate(identity)?
    ))
}

fn render_delete(txn: &Transaction) -> Result<String> {
    let table = single_table(txn)?;
    let identity = required(txn.op, &txn.identity, "identity predicate")?;

    Ok(format!(
        "DELETE FROM {} WHERE {}",
        table.qualified_name(),
        predicate(identity)?
    ))
}

fn render_truncate(txn: &Transaction) -> Result<String> {
    if txn.tables.is_empty() {
        return Err(Error::EmptyColumnList(txn.op));
    }
    let tables: Vec<String> = txn.tables.iter().map(Table::qualified_name).collect();
    Ok(format!("TRUNCATE TABLE ONLY {}", tables.join(",")))
}

/// Render a transaction without validating it first.
pub(crate) fn render(txn: &Transaction) -> Result<String> {
    match txn.op {
        Operation::Insert => render_insert(txn),
        Operation::Update => render_update(txn),
        Operation::Delete => render_delete(txn),
        Operation::Truncate => render_truncate(txn),
    }
}
