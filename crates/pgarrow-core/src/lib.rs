pub mod columns;
pub mod error;
pub mod sql;
pub mod transaction;
pub mod types;

pub use columns::{Column, ColumnValue, Columns};
pub use error::{Error, Result};
pub use sql::{quote_ident, quote_literal, render_value};
pub use transaction::{Operation, Table, Transaction};
pub use types::{ColumnType, TypeCatalog, TypeCategory, Value};
