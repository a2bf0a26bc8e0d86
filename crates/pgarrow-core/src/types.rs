//! Column types and text-format value decoding.
//!
//! Replicated column data arrives in Postgres text output format. A
//! [`TypeCatalog`] maps type OIDs to their name and category, and
//! [`ColumnType::decode`] turns the raw text into a typed [`Value`] that the
//! SQL renderer knows how to quote.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMPTZ_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%#z";
const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Broad classification of a Postgres type, mirroring `pg_type.typcategory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "char", into = "char")]
pub enum TypeCategory {
    Array,
    Boolean,
    Composite,
    DateTime,
    Enum,
    Geometric,
    Network,
    Numeric,
    Pseudo,
    Range,
    String,
    Timespan,
    UserDefined,
    BitString,
    Unknown,
}

impl From<char> for TypeCategory {
    fn from(code: char) -> Self {
        match code {
            'A' => TypeCategory::Array,
            'B' => TypeCategory::Boolean,
            'C' => TypeCategory::Composite,
            'D' => TypeCategory::DateTime,
            'E' => TypeCategory::Enum,
            'G' => TypeCategory::Geometric,
            'I' => TypeCategory::Network,
            'N' => TypeCategory::Numeric,
            'P' => TypeCategory::Pseudo,
            'R' => TypeCategory::Range,
            'S' => TypeCategory::String,
            'T' => TypeCategory::Timespan,
            'U' => TypeCategory::UserDefined,
            'V' => TypeCategory::BitString,
            _ => TypeCategory::Unknown,
        }
    }
}

impl From<TypeCategory> for char {
    fn from(category: TypeCategory) -> Self {
        match category {
            TypeCategory::Array => 'A',
            TypeCategory::Boolean => 'B',
            TypeCategory::Composite => 'C',
            TypeCategory::DateTime => 'D',
            TypeCategory::Enum => 'E',
            TypeCategory::Geometric => 'G',
            TypeCategory::Network => 'I',
            TypeCategory::Numeric => 'N',
            TypeCategory::Pseudo => 'P',
            TypeCategory::Range => 'R',
            TypeCategory::String => 'S',
            TypeCategory::Timespan => 'T',
            TypeCategory::UserDefined => 'U',
            TypeCategory::BitString => 'V',
            TypeCategory::Unknown => 'X',
        }
    }
}

/// The resolved type of a replicated column.
///
/// `name` is `None` when the OID was not found in the catalog; such values
/// are decoded as plain text and rendered without a cast. `schema` is set
/// for types outside `pg_catalog` so casts resolve regardless of the
/// target's `search_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    pub oid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub category: TypeCategory,
}

impl ColumnType {
    pub fn new(oid: u32, name: impl Into<String>, category: TypeCategory) -> Self {
        Self {
            oid,
            schema: None,
            name: Some(name.into()),
            category,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// A type the catalog knows nothing about.
    pub fn unknown(oid: u32) -> Self {
        Self {
            oid,
            schema: None,
            name: None,
            category: TypeCategory::Unknown,
        }
    }

    /// Decode a text-format value of this type.
    ///
    /// Decoding never fails: anything that does not parse as the type's
    /// natural representation falls back to an opaque string.
    pub fn decode(&self, raw: &str) -> Value {
        let name = self.name.as_deref();

        if matches!(name, Some("json" | "jsonb" | "xml")) {
            return Value::Opaque(raw.to_string());
        }

        match (self.category, name) {
            (TypeCategory::Boolean, _) => match raw {
                "t" | "true" => Value::Bool(true),
                "f" | "false" => Value::Bool(false),
                _ => Value::Opaque(raw.to_string()),
            },
            (TypeCategory::Numeric, Some("int2" | "int4" | "int8" | "oid")) => raw
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Opaque(raw.to_string())),
            (TypeCategory::Numeric, Some("float4" | "float8")) => raw
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Opaque(raw.to_string())),
            (TypeCategory::Numeric, _) if is_plain_number(raw) => {
                Value::Numeric(raw.to_string())
            }
            (TypeCategory::DateTime, Some("timestamp")) => {
                NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
                    .map(Value::Timestamp)
                    .unwrap_or_else(|_| Value::Opaque(raw.to_string()))
            }
            (TypeCategory::DateTime, Some("timestamptz")) => {
                DateTime::parse_from_str(raw, TIMESTAMPTZ_PARSE_FORMAT)
                    .map(Value::TimestampTz)
                    .unwrap_or_else(|_| Value::Opaque(raw.to_string()))
            }
            (TypeCategory::DateTime, Some("date")) => {
                NaiveDate::parse_from_str(raw, DATE_FORMAT)
                    .map(Value::Date)
                    .unwrap_or_else(|_| Value::Opaque(raw.to_string()))
            }
            (TypeCategory::Timespan, _) => Value::Interval(raw.to_string()),
            (TypeCategory::String, _) | (TypeCategory::Unknown, None) => {
                Value::Text(raw.to_string())
            }
            _ => Value::Opaque(raw.to_string()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.schema, &self.name) {
            (Some(schema), Some(name)) => write!(f, "{}.{}", schema, name),
            (None, Some(name)) => write!(f, "{}", name),
            (_, None) => write!(f, "oid {}", self.oid),
        }
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary precision numeric kept in its textual form.
    Numeric(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Date(NaiveDate),
    Interval(String),
    Text(String),
    /// Anything the decoder does not interpret: json, xml, arrays, composites,
    /// ranges and values that failed to parse as their declared type.
    Opaque(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text form of the value suitable for a quoted SQL literal.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Numeric(s)
            | Value::Interval(s)
            | Value::Text(s)
            | Value::Opaque(s) => Some(s.clone()),
            Value::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::TimestampTz(ts) => Some(ts.format(TIMESTAMPTZ_FORMAT).to_string()),
            Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
        }
    }
}

/// Returns true for `-?digits` or `-?digits.digits`.
pub fn is_plain_number(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    all_digits(int_part) && frac_part.map_or(true, all_digits)
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    schema: Option<String>,
    name: String,
    category: TypeCategory,
}

/// Session-scoped mapping from type OID to type name and category.
///
/// The catalog starts empty or seeded with the built-in types, is refreshed
/// from `pg_type` when a connection is available, and learns custom types
/// from pgoutput `Type` messages while streaming.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    types: HashMap<u32, CatalogEntry>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog pre-populated with the common built-in types.
    pub fn with_builtin_types() -> Self {
        let mut catalog = Self::new();
        for (oid, name, category) in BUILTIN_TYPES {
            catalog.insert(*oid, *name, TypeCategory::from(*category));
        }
        catalog
    }

    pub fn insert(&mut self, oid: u32, name: impl Into<String>, category: TypeCategory) {
        self.types.insert(
            oid,
            CatalogEntry {
                schema: None,
                name: name.into(),
                category,
            },
        );
    }

    /// Register a type that lives in `schema`. Types in `pg_catalog` are
    /// stored unqualified.
    pub fn insert_qualified(
        &mut self,
        oid: u32,
        schema: impl Into<String>,
        name: impl Into<String>,
        category: TypeCategory,
    ) {
        let schema = schema.into();
        self.types.insert(
            oid,
            CatalogEntry {
                schema: (schema != "pg_catalog").then_some(schema),
                name: name.into(),
                category,
            },
        );
    }

    /// Resolve an OID, yielding an unknown type if the catalog lacks it.
    pub fn resolve(&self, oid: u32) -> ColumnType {
        match self.types.get(&oid) {
            Some(entry) => {
                let column_type = ColumnType::new(oid, entry.name.clone(), entry.category);
                match &entry.schema {
                    Some(schema) => column_type.with_schema(schema.clone()),
                    None => column_type,
                }
            }
            None => ColumnType::unknown(oid),
        }
    }

    /// Decode raw wire bytes of the given type.
    pub fn decode(&self, oid: u32, raw: &[u8]) -> Value {
        self.resolve(oid).decode(&String::from_utf8_lossy(raw))
    }

    pub fn contains(&self, oid: u32) -> bool {
        self.types.contains_key(&oid)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

const BUILTIN_TYPES: &[(u32, &str, char)] = &[
    (16, "bool", 'B'),
    (17, "bytea", 'U'),
    (19, "name", 'S'),
    (20, "int8", 'N'),
    (21, "int2", 'N'),
    (23, "int4", 'N'),
    (25, "text", 'S'),
    (26, "oid", 'N'),
    (114, "json", 'U'),
    (142, "xml", 'U'),
    (650, "cidr", 'I'),
    (700, "float4", 'N'),
    (701, "float8", 'N'),
    (790, "money", 'N'),
    (869, "inet", 'I'),
    (1007, "_int4", 'A'),
    (1009, "_text", 'A'),
    (1042, "bpchar", 'S'),
    (1043, "varchar", 'S'),
    (1082, "date", 'D'),
    (1083, "time", 'D'),
    (1114, "timestamp", 'D'),
    (1184, "timestamptz", 'D'),
    (1186, "interval", 'T'),
    (1266, "timetz", 'D'),
    (1560, "bit", 'V'),
    (1562, "varbit", 'V'),
    (1700, "numeric", 'N'),
    (2950, "uuid", 'U'),
    (3802, "jsonb", 'U'),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_resolves_common_types() {
        let catalog = TypeCatalog::with_builtin_types();
        let int4 = catalog.resolve(23);
        assert_eq!(int4.name.as_deref(), Some("int4"));
        assert_eq!(int4.category, TypeCategory::Numeric);

        let unknown = catalog.resolve(999_999);
        assert_eq!(unknown.name, None);
        assert_eq!(unknown.category, TypeCategory::Unknown);
    }

    #[test]
    fn test_decode_scalars() {
        let catalog = TypeCatalog::with_builtin_types();
        assert_eq!(catalog.decode(23, b"42"), Value::Int(42));
        assert_eq!(catalog.decode(20, b"-7"), Value::Int(-7));
        assert_eq!(catalog.decode(16, b"t"), Value::Bool(true));
        assert_eq!(catalog.decode(16, b"f"), Value::Bool(false));
        assert_eq!(catalog.decode(701, b"1.5"), Value::Float(1.5));
        assert_eq!(
            catalog.decode(1700, b"12345.6789"),
            Value::Numeric("12345.6789".into())
        );
        assert_eq!(catalog.decode(25, b"hello"), Value::Text("hello".into()));
    }

    #[test]
    fn test_decode_timestamps() {
        let catalog = TypeCatalog::with_builtin_types();
        let ts = catalog.decode(1114, b"2024-01-02 03:04:05.123456");
        assert_eq!(
            ts.to_text().as_deref(),
            Some("2024-01-02 03:04:05.123456")
        );

        let tz = catalog.decode(1184, b"2024-01-02 03:04:05+02");
        assert!(matches!(tz, Value::TimestampTz(_)));
        assert_eq!(tz.to_text().as_deref(), Some("2024-01-02 03:04:05+02:00"));

        assert!(matches!(catalog.decode(1082, b"2024-01-02"), Value::Date(_)));
    }

    #[test]
    fn test_decode_falls_back_to_opaque() {
        let catalog = TypeCatalog::with_builtin_types();
        // Special values that chrono cannot represent
        assert_eq!(
            catalog.decode(1114, b"infinity"),
            Value::Opaque("infinity".into())
        );
        assert_eq!(
            catalog.decode(23, b"not a number"),
            Value::Opaque("not a number".into())
        );
        assert_eq!(catalog.decode(790, b"$1.00"), Value::Opaque("$1.00".into()));
        assert_eq!(
            catalog.decode(1700, b"NaN"),
            Value::Opaque("NaN".into())
        );
    }

    #[test]
    fn test_decode_json_is_opaque() {
        let catalog = TypeCatalog::with_builtin_types();
        assert_eq!(
            catalog.decode(3802, br#"{"a": 1}"#),
            Value::Opaque(r#"{"a": 1}"#.into())
        );
        assert_eq!(catalog.decode(114, b"42"), Value::Opaque("42".into()));
    }

    #[test]
    fn test_empty_catalog_decodes_as_text() {
        let catalog = TypeCatalog::new();
        assert!(catalog.is_empty());
        assert_eq!(catalog.decode(23, b"42"), Value::Text("42".into()));
    }

    #[test]
    fn test_decode_invalid_utf8_is_total() {
        let catalog = TypeCatalog::with_builtin_types();
        let value = catalog.decode(25, &[0x66, 0xff, 0x6f]);
        assert_eq!(value, Value::Text("f\u{fffd}o".into()));
    }

    #[test]
    fn test_catalog_learns_custom_types() {
        let mut catalog = TypeCatalog::new();
        catalog.insert(16_384, "mood", TypeCategory::Enum);
        assert!(catalog.contains(16_384));
        let ty = catalog.resolve(16_384);
        assert_eq!(ty.to_string(), "mood");
        assert_eq!(ty.decode("happy"), Value::Opaque("happy".into()));
    }

    #[test]
    fn test_qualified_types_keep_their_schema() {
        let mut catalog = TypeCatalog::new();
        catalog.insert_qualified(16_400, "inventory", "status", TypeCategory::Enum);
        catalog.insert_qualified(23, "pg_catalog", "int4", TypeCategory::Numeric);

        let status = catalog.resolve(16_400);
        assert_eq!(status.schema.as_deref(), Some("inventory"));
        assert_eq!(status.to_string(), "inventory.status");
        assert_eq!(catalog.resolve(23).schema, None);
    }

    #[test]
    fn test_is_plain_number() {
        assert!(is_plain_number("0"));
        assert!(is_plain_number("-12"));
        assert!(is_plain_number("3.14"));
        assert!(!is_plain_number(""));
        assert!(!is_plain_number("-"));
        assert!(!is_plain_number("1."));
        assert!(!is_plain_number(".5"));
        assert!(!is_plain_number("1e5"));
        assert!(!is_plain_number("1;DROP"));
    }

    #[test]
    fn test_category_round_trips_through_char() {
        let json = serde_json::to_string(&TypeCategory::Numeric).unwrap();
        assert_eq!(json, "\"N\"");
        let back: TypeCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TypeCategory::Numeric);
    }
}
