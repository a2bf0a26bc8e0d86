//! The delivery bridge between the replication stream, the channel and the
//! target database.

mod publish;
mod replay;

pub use publish::Publisher;
pub use replay::{ErrorRules, ReplayStats, Replayer};

use pgarrow_core::Transaction;
use pgarrow_pg::PgError;

/// Short description of a transaction for logs and error messages.
pub(crate) fn describe(transaction: &Transaction) -> String {
    let tables: Vec<String> = transaction.tables.iter().map(ToString::to_string).collect();
    format!(
        "{} on {} at lsn {}",
        transaction.op,
        tables.join(","),
        pgarrow_pg::format_lsn(transaction.lsn)
    )
}

/// Whether a replication session failed in a way that reconnecting and
/// resuming from the slot can fix.
pub fn is_session_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<PgError>())
        .any(|e| e.is_protocol() || e.is_connection_lost() || matches!(e, PgError::Replication(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use pgarrow_core::Table;

    #[test]
    fn test_describe() {
        let txn = Transaction::truncate(0x1_0000_0010, vec![Table::new("a", "b"), Table::new("c", "d")]);
        assert_eq!(describe(&txn), "TRUNCATE on a.b,c.d at lsn 1/10");
    }

    #[test]
    fn test_session_errors() {
        let lost: anyhow::Result<()> = Err(PgError::ConnectionClosed).context("streaming");
        assert!(is_session_error(&lost.unwrap_err()));

        let unknown = anyhow::Error::new(PgError::UnknownRelation(16384));
        assert!(is_session_error(&unknown));

        let active = anyhow::Error::new(PgError::SlotActive("pgarrow".into()));
        assert!(!is_session_error(&active));

        assert!(!is_session_error(&anyhow::anyhow!("something else")));
    }
}
