//! Queries against the system catalogs.

use pgarrow_core::{quote_literal, Table, TypeCatalog, TypeCategory};
use tracing::debug;

use crate::connection::SqlConnection;
use crate::error::{PgError, PgResult};

/// A column of a table as recorded in `pg_attribute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub type_oid: u32,
    /// Part of the primary key.
    pub is_key: bool,
}

fn parse_oid(value: &str) -> PgResult<u32> {
    value
        .parse()
        .map_err(|_| PgError::Postgres(format!("invalid oid '{}'", value)))
}

/// Build the session type catalog from `pg_type`.
pub async fn load_type_catalog<C: SqlConnection>(conn: &mut C) -> PgResult<TypeCatalog> {
    let rows = conn
        .query(
            "SELECT t.oid, n.nspname, t.typname, t.typcategory \
             FROM pg_catalog.pg_type t \
             JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace",
        )
        .await?;

    let mut catalog = TypeCatalog::new();
    for row in &rows {
        let oid = parse_oid(row.require("oid")?)?;
        let category = row
            .get("typcategory")
            .and_then(|c| c.chars().next())
            .map(TypeCategory::from)
            .unwrap_or(TypeCategory::Unknown);
        catalog.insert_qualified(oid, row.require("nspname")?, row.require("typname")?, category);
    }

    debug!(types = catalog.len(), "Loaded type catalog");
    Ok(catalog)
}

/// Resolve a relation oid to its schema-qualified name.
pub async fn lookup_relation<C: SqlConnection>(conn: &mut C, relation_id: u32) -> PgResult<Table> {
    let rows = conn
        .query(&format!(
            "SELECT n.nspname, c.relname \
             FROM pg_catalog.pg_class c \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.oid = {}",
            relation_id
        ))
        .await?;

    let row = rows
        .first()
        .ok_or(PgError::UnknownRelation(relation_id))?;
    Ok(Table::new(row.require("nspname")?, row.require("relname")?))
}

/// Columns of a table in declared order, flagging primary key columns.
pub async fn table_columns<C: SqlConnection>(
    conn: &mut C,
    table: &Table,
) -> PgResult<Vec<TableColumn>> {
    let rows = conn
        .query(&format!(
            "SELECT a.attname, a.atttypid, \
                    EXISTS (SELECT 1 FROM pg_catalog.pg_index i \
                            WHERE i.indrelid = a.attrelid AND i.indisprimary \
                              AND a.attnum = ANY(i.indkey)) AS is_key \
             FROM pg_catalog.pg_attribute a \
             WHERE a.attrelid = {}::regclass AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
            quote_literal(&table.qualified_name())
        ))
        .await?;

    rows.iter()
        .map(|row| {
            Ok(TableColumn {
                name: row.require("attname")?.to_string(),
                type_oid: parse_oid(row.require("atttypid")?)?,
                is_key: row.get("is_key") == Some("t"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{MockConnection, TextRow};

    #[tokio::test]
    async fn test_load_type_catalog() {
        let mut conn = MockConnection::new();
        conn.respond(
            "FROM pg_catalog.pg_type",
            vec![
                TextRow::from_pairs([
                    ("oid", Some("23")),
                    ("nspname", Some("pg_catalog")),
                    ("typname", Some("int4")),
                    ("typcategory", Some("N")),
                ]),
                TextRow::from_pairs([
                    ("oid", Some("16400")),
                    ("nspname", Some("app")),
                    ("typname", Some("mood")),
                    ("typcategory", Some("E")),
                ]),
            ],
        );

        let catalog = load_type_catalog(&mut conn).await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.resolve(16400).category, TypeCategory::Enum);
        assert_eq!(catalog.resolve(16400).schema.as_deref(), Some("app"));
        assert_eq!(catalog.resolve(23).name.as_deref(), Some("int4"));
        assert_eq!(catalog.resolve(23).schema, None);
    }

    #[tokio::test]
    async fn test_lookup_relation() {
        let mut conn = MockConnection::new();
        conn.respond(
            "WHERE c.oid = 16390",
            vec![TextRow::from_pairs([
                ("nspname", Some("c")),
                ("relname", Some("d")),
            ])],
        );

        assert_eq!(
            lookup_relation(&mut conn, 16390).await.unwrap(),
            Table::new("c", "d")
        );
        assert!(matches!(
            lookup_relation(&mut conn, 1).await,
            Err(PgError::UnknownRelation(1))
        ));
    }

    #[tokio::test]
    async fn test_table_columns_quotes_the_table_name() {
        let mut conn = MockConnection::new();
        conn.respond(
            "FROM pg_catalog.pg_attribute",
            vec![
                TextRow::from_pairs([
                    ("attname", Some("id")),
                    ("atttypid", Some("23")),
                    ("is_key", Some("t")),
                ]),
                TextRow::from_pairs([
                    ("attname", Some("note")),
                    ("atttypid", Some("25")),
                    ("is_key", Some("f")),
                ]),
            ],
        );

        let columns = table_columns(&mut conn, &Table::new("public", "it's"))
            .await
            .unwrap();
        assert_eq!(columns.len(), 2);
        assert!(columns[0].is_key);
        assert!(!columns[1].is_key);
        assert!(conn.queries()[0].contains(r#"'"public"."it''s"'::regclass"#));
    }
}
