pub mod catalog;
mod connect;
pub mod connection;
mod error;
pub mod replication;
pub mod resync;
pub mod shutdown;

pub use catalog::{load_type_catalog, lookup_relation, table_columns, TableColumn};
pub use connect::{connect_postgres, mask_password, ConnectionParams};
pub use connection::{MockConnection, PgConnection, SqlConnection, TextRow};
pub use error::{PgError, PgResult};
pub use replication::{
    ensure_publication, format_lsn, inspect_slot, parse_lsn, publication_tables, MockTransport,
    PgwireTransport, ReplicationTransport, SlotInfo, SlotState, StreamDecoder, TransportConfig,
    WireMessage,
};
pub use resync::{ResyncProgress, ResyncScanner};
pub use shutdown::{create_shutdown_channel, ShutdownRx, ShutdownTx};
