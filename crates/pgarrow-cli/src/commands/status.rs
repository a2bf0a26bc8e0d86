use anyhow::{Context, Result};
use colored::Colorize;

use pgarrow_config::{ChannelKind, Config};
use pgarrow_core::Table;
use pgarrow_pg::replication::publication::publication_exists;
use pgarrow_pg::{
    format_lsn, inspect_slot, mask_password, publication_tables, PgConnection, SlotInfo, SqlConnection,
};

/// What the source database knows about our slot and publication.
#[derive(Debug)]
pub struct SourceStatus {
    pub slot: Option<SlotInfo>,
    /// `None` when the publication does not exist.
    pub tables: Option<Vec<Table>>,
}

pub async fn collect_status<C: SqlConnection>(conn: &mut C, config: &Config) -> Result<SourceStatus> {
    let slot = inspect_slot(conn, &config.postgres.slot_name).await?;
    let tables = if publication_exists(conn, &config.postgres.publication).await? {
        Some(publication_tables(conn, &config.postgres.publication).await?)
    } else {
        None
    };
    Ok(SourceStatus { slot, tables })
}

pub async fn cmd_status(config: &Config) -> Result<()> {
    let mut conn = PgConnection::connect(config.postgres.connection_string())
        .await
        .context("Failed to connect to Postgres")?;
    let status = collect_status(&mut conn, config).await?;

    println!("\n{}", "Replication slot:".bold());
    match &status.slot {
        Some(slot) => {
            let state = if slot.active {
                "active".yellow()
            } else {
                "idle".green()
            };
            println!("  {:<20} {}", "name", slot.name);
            println!("  {:<20} {}", "plugin", slot.plugin.as_deref().unwrap_or("-"));
            println!("  {:<20} {}", "state", state);
            println!(
                "  {:<20} {}",
                "restart lsn",
                slot.restart_lsn.map(format_lsn).unwrap_or_else(|| "-".into())
            );
        }
        None => println!(
            "  {} ({} creates it)",
            format!("'{}' does not exist", config.postgres.slot_name).yellow(),
            "pgarrow publish".cyan()
        ),
    }

    println!("\n{}", format!("Publication '{}':", config.postgres.publication).bold());
    match &status.tables {
        Some(tables) if tables.is_empty() => println!("  (no tables)"),
        Some(tables) => {
            for table in tables {
                println!("  {}", table);
            }
        }
        None => println!("  {}", "does not exist".yellow()),
    }

    let channel = &config.channel;
    println!("\n{}", "Channel:".bold());
    match channel.kind {
        ChannelKind::Kafka => {
            println!("  {:<20} kafka", "kind");
            println!("  {:<20} {}", "brokers", channel.brokers().join(","));
            println!("  {:<20} {}_{}", "topic", channel.topic_prefix, channel.topic);
            println!("  {:<20} {}", "consumer group", channel.consumer_group);
        }
        ChannelKind::Rabbitmq => {
            println!("  {:<20} rabbitmq", "kind");
            println!("  {:<20} {}", "url", mask_password(&channel.amqp_url()));
            println!("  {:<20} {}_{}", "queue", channel.topic_prefix, channel.topic);
        }
        ChannelKind::Memory => println!("  {:<20} memory (in process)", "kind"),
    }

    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgarrow_pg::{MockConnection, TextRow};

    fn config() -> Config {
        Config::parse("[postgres]\ndsn = \"postgres://localhost/app\"\n").unwrap()
    }

    #[tokio::test]
    async fn test_collect_status() {
        let mut conn = MockConnection::new();
        conn.respond(
            "FROM pg_replication_slots",
            vec![TextRow::from_pairs([
                ("slot_name", Some("pgarrow")),
                ("plugin", Some("pgoutput")),
                ("active", Some("f")),
                ("restart_lsn", Some("0/16B3748")),
            ])],
        );
        conn.respond("FROM pg_publication WHERE", vec![TextRow::from_pairs([("?column?", Some("1"))])]);
        conn.respond(
            "FROM pg_publication_tables",
            vec![TextRow::from_pairs([
                ("schemaname", Some("public")),
                ("tablename", Some("accounts")),
            ])],
        );

        let status = collect_status(&mut conn, &config()).await.unwrap();
        let slot = status.slot.unwrap();
        assert!(!slot.active);
        assert_eq!(slot.restart_lsn, Some(0x16B3748));
        assert_eq!(status.tables.unwrap(), vec![Table::new("public", "accounts")]);
    }

    #[tokio::test]
    async fn test_collect_status_missing_objects() {
        let mut conn = MockConnection::new();
        let status = collect_status(&mut conn, &config()).await.unwrap();
        assert!(status.slot.is_none());
        assert!(status.tables.is_none());
    }
}
