use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("database error {code}: {message}")]
    Database { code: String, message: String },

    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("replication error: {0}")]
    Replication(String),

    #[error("pgoutput protocol error: {0}")]
    Protocol(String),

    #[error("change references unknown relation {0}")]
    UnknownRelation(u32),

    #[error("replication slot '{0}' does not exist")]
    SlotNotFound(String),

    #[error("replication slot '{0}' is already in use by another consumer")]
    SlotActive(String),

    #[error("failed to create replication slot: {0}")]
    SlotCreationFailed(String),

    #[error("publication '{0}' does not exist")]
    PublicationNotFound(String),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),

    #[error(transparent)]
    Transaction(#[from] pgarrow_core::Error),
}

impl PgError {
    /// SQLSTATE of a database error, if this is one.
    pub fn db_code(&self) -> Option<&str> {
        match self {
            PgError::Database { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The connection went away underneath us; a reconnect may help.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, PgError::ConnectionClosed | PgError::Connection(_))
    }

    /// Malformed or out-of-order replication data. Fatal for the session.
    pub fn is_protocol(&self) -> bool {
        matches!(self, PgError::Protocol(_) | PgError::UnknownRelation(_))
    }
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(db_err) = e.as_db_error() {
            PgError::Database {
                code: db_err.code().code().to_string(),
                message: db_err.message().to_string(),
            }
        } else if e.is_closed() {
            PgError::ConnectionClosed
        } else if caused_by_io(&e) {
            PgError::Connection(e.to_string())
        } else {
            PgError::Postgres(e.to_string())
        }
    }
}

/// A socket failure somewhere below a driver error, such as a reset in the
/// middle of a statement.
fn caused_by_io(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}

impl From<std::io::Error> for PgError {
    fn from(e: std::io::Error) -> Self {
        PgError::Protocol(format!("truncated message: {}", e))
    }
}

pub type PgResult<T> = Result<T, PgError>;
