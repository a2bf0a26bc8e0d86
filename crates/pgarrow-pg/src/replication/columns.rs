//! Turns wire tuples into named column values.

use pgarrow_core::{ColumnValue, Columns, TypeCatalog};

use super::pgoutput::{TupleData, TupleValue};
use super::relation_cache::RelationInfo;
use crate::error::{PgError, PgResult};

/// Pair each tuple entry with its column's name and resolved type.
pub fn extract_columns(
    tuple: &TupleData,
    relation: &RelationInfo,
    catalog: &TypeCatalog,
) -> PgResult<Columns> {
    if tuple.columns.len() != relation.columns.len() {
        return Err(PgError::Protocol(format!(
            "tuple for {}.{} has {} columns, relation defines {}",
            relation.namespace,
            relation.name,
            tuple.columns.len(),
            relation.columns.len()
        )));
    }

    let mut columns = Columns::new();
    for (value, info) in tuple.columns.iter().zip(&relation.columns) {
        let value = match value {
            TupleValue::Null => ColumnValue::Null,
            TupleValue::Unchanged => ColumnValue::Unchanged,
            TupleValue::Text(raw) => ColumnValue::text(
                String::from_utf8_lossy(raw).into_owned(),
                catalog.resolve(info.type_oid),
            ),
            TupleValue::Binary(_) => {
                return Err(PgError::Protocol(format!(
                    "column '{}' arrived in binary format",
                    info.name
                )));
            }
        };
        columns
            .push(&info.name, value)
            .map_err(|e| PgError::Protocol(e.to_string()))?;
    }

    Ok(columns)
}

/// The replica identity subset of `columns`, used as the row predicate.
///
/// Identity columns are always sent, so a missing or unchanged one means the
/// stream is not what the relation said it would be.
pub fn identity_predicate(columns: &Columns, relation: &RelationInfo) -> PgResult<Columns> {
    let mut identity = Columns::new();
    for info in relation.identity_columns() {
        match columns.get(&info.name) {
            Some(ColumnValue::Unchanged) => {
                return Err(PgError::Protocol(format!(
                    "identity column '{}' of {}.{} was not sent",
                    info.name, relation.namespace, relation.name
                )));
            }
            Some(value) => identity
                .push(&info.name, value.clone())
                .map_err(|e| PgError::Protocol(e.to_string()))?,
            None => {
                return Err(PgError::Protocol(format!(
                    "identity column '{}' missing from tuple for {}.{}",
                    info.name, relation.namespace, relation.name
                )));
            }
        }
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::pgoutput::{ColumnInfo, ReplicaIdentity};
    use pgarrow_core::Value;

    fn accounts() -> RelationInfo {
        RelationInfo {
            relation_id: 16384,
            namespace: "public".into(),
            name: "accounts".into(),
            replica_identity: ReplicaIdentity::Default,
            columns: vec![
                ColumnInfo {
                    flags: 1,
                    name: "id".into(),
                    type_oid: 23,
                    type_modifier: -1,
                },
                ColumnInfo {
                    flags: 0,
                    name: "balance".into(),
                    type_oid: 1700,
                    type_modifier: -1,
                },
            ],
        }
    }

    fn tuple(values: Vec<TupleValue>) -> TupleData {
        TupleData { columns: values }
    }

    #[test]
    fn test_extract_columns() {
        let catalog = TypeCatalog::with_builtin_types();
        let cols = extract_columns(
            &tuple(vec![TupleValue::Text(b"1".to_vec()), TupleValue::Null]),
            &accounts(),
            &catalog,
        )
        .unwrap();

        assert_eq!(cols.names().collect::<Vec<_>>(), vec!["id", "balance"]);
        assert_eq!(cols.get("id").and_then(|v| v.decode()), Some(Value::Int(1)));
        assert_eq!(cols.get("balance"), Some(&ColumnValue::Null));
    }

    #[test]
    fn test_extract_with_empty_catalog_is_text() {
        let cols = extract_columns(
            &tuple(vec![TupleValue::Text(b"1".to_vec()), TupleValue::Unchanged]),
            &accounts(),
            &TypeCatalog::new(),
        )
        .unwrap();
        assert_eq!(
            cols.get("id").and_then(|v| v.decode()),
            Some(Value::Text("1".into()))
        );
        assert_eq!(cols.get("balance"), Some(&ColumnValue::Unchanged));
    }

    #[test]
    fn test_column_count_mismatch() {
        let err = extract_columns(
            &tuple(vec![TupleValue::Null]),
            &accounts(),
            &TypeCatalog::new(),
        )
        .unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_binary_values_are_rejected() {
        let err = extract_columns(
            &tuple(vec![TupleValue::Binary(vec![0, 0, 0, 1]), TupleValue::Null]),
            &accounts(),
            &TypeCatalog::new(),
        )
        .unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_identity_predicate() {
        let catalog = TypeCatalog::with_builtin_types();
        let cols = extract_columns(
            &tuple(vec![
                TupleValue::Text(b"1".to_vec()),
                TupleValue::Text(b"100".to_vec()),
            ]),
            &accounts(),
            &catalog,
        )
        .unwrap();

        let identity = identity_predicate(&cols, &accounts()).unwrap();
        assert_eq!(identity.names().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn test_unchanged_identity_is_protocol_error() {
        let cols = extract_columns(
            &tuple(vec![TupleValue::Unchanged, TupleValue::Null]),
            &accounts(),
            &TypeCatalog::new(),
        )
        .unwrap();
        assert!(identity_predicate(&cols, &accounts()).unwrap_err().is_protocol());
    }

    #[test]
    fn test_relation_without_identity_yields_empty_predicate() {
        let mut rel = accounts();
        rel.replica_identity = ReplicaIdentity::Nothing;
        for c in &mut rel.columns {
            c.flags = 0;
        }
        let cols = Columns::new();
        assert!(identity_predicate(&cols, &rel).unwrap().is_empty());
    }
}
