//! Push-based change capture over PostgreSQL's streaming replication protocol
//! with the pgoutput plugin.

pub mod columns;
pub mod lsn;
pub mod pgoutput;
pub mod publication;
pub mod relation_cache;
pub mod slot;
pub mod stream;
pub mod transport;

pub use columns::{extract_columns, identity_predicate};
pub use lsn::{format_lsn, parse_lsn};
pub use pgoutput::{PgOutputDecoder, PgOutputMessage};
pub use publication::{ensure_publication, publication_tables, quote_table_name};
pub use relation_cache::{RelationCache, RelationInfo};
pub use slot::{drop_slot, inspect_slot, SlotCreation, SlotInfo, SlotState};
pub use stream::{ReplicationCursor, StreamDecoder, DEFAULT_STANDBY_TIMEOUT};
pub use transport::{
    MockTransport, PgwireTransport, ReplicationTransport, TransportConfig, WireMessage,
};
