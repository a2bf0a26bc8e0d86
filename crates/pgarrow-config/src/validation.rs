use crate::config::{ChannelKind, Config};
use crate::error::{ConfigError, ConfigResult};

/// Replication slot names are limited to NAMEDATALEN - 1 bytes.
const MAX_SLOT_NAME_LEN: usize = 63;

/// Validate a parsed configuration.
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    validate_postgres(config)?;
    validate_error_codes(config)?;
    validate_channel(config)?;
    Ok(())
}

fn validate_postgres(config: &Config) -> ConfigResult<()> {
    let pg = &config.postgres;
    if pg.dsn.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "postgres.dsn".to_string(),
        });
    }
    if !is_valid_slot_name(&pg.slot_name) {
        return Err(ConfigError::InvalidSlotName {
            value: pg.slot_name.clone(),
        });
    }
    if pg.publication.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "postgres.publication".to_string(),
        });
    }
    Ok(())
}

fn is_valid_slot_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SLOT_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn validate_error_codes(config: &Config) -> ConfigResult<()> {
    let pg = &config.postgres;
    for code in pg.reconnect_errors.iter().chain(pg.skip_errors.keys()) {
        if !is_sqlstate(code) {
            return Err(ConfigError::InvalidErrorCode {
                value: code.clone(),
            });
        }
    }
    Ok(())
}

fn is_sqlstate(code: &str) -> bool {
    code.len() == 5
        && code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

fn validate_channel(config: &Config) -> ConfigResult<()> {
    let channel = &config.channel;
    match channel.kind {
        ChannelKind::Memory => return Ok(()),
        ChannelKind::Rabbitmq if channel.url.trim().is_empty() => {
            return Err(ConfigError::MissingField {
                field: "channel.url".to_string(),
            });
        }
        ChannelKind::Kafka if channel.brokers.iter().all(|b| b.trim().is_empty()) => {
            return Err(ConfigError::MissingField {
                field: "channel.brokers".to_string(),
            });
        }
        _ => {}
    }
    if channel.topic.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "channel.topic".to_string(),
            message: "topic must not be empty".to_string(),
        });
    }
    if channel.kind == ChannelKind::Kafka && channel.consumer_group.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "channel.consumer_group".to_string(),
            message: "consumer group must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> ConfigResult<Config> {
        Config::parse(toml_str)
    }

    #[test]
    fn test_empty_dsn() {
        let err = parse("[postgres]\ndsn = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "postgres.dsn"));
    }

    #[test]
    fn test_slot_names() {
        assert!(is_valid_slot_name("pgarrow"));
        assert!(is_valid_slot_name("orders_2"));
        assert!(!is_valid_slot_name(""));
        assert!(!is_valid_slot_name("Orders"));
        assert!(!is_valid_slot_name("orders-slot"));
        assert!(!is_valid_slot_name(&"a".repeat(64)));

        let err = parse("[postgres]\ndsn = \"x\"\nslot_name = \"My Slot\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSlotName { .. }));
    }

    #[test]
    fn test_error_codes() {
        assert!(is_sqlstate("23505"));
        assert!(is_sqlstate("57P01"));
        assert!(!is_sqlstate("2350"));
        assert!(!is_sqlstate("unique_violation"));

        let err = parse(
            r#"
[postgres]
dsn = "x"

[postgres.skip_errors]
"duplicate" = "unique_violation"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidErrorCode { value } if value == "duplicate"));

        let err = parse("[postgres]\ndsn = \"x\"\nreconnect_errors = [\"57p01\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidErrorCode { .. }));
    }

    #[test]
    fn test_kafka_requires_brokers() {
        let err = parse("[postgres]\ndsn = \"x\"\n\n[channel]\nbrokers = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "channel.brokers"));

        // The in-memory channel ignores broker settings.
        parse("[postgres]\ndsn = \"x\"\n\n[channel]\nkind = \"memory\"\nbrokers = []\n").unwrap();
    }

    #[test]
    fn test_rabbitmq_requires_url() {
        let err = parse("[postgres]\ndsn = \"x\"\n\n[channel]\nkind = \"rabbitmq\"\nurl = \"\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "channel.url"));

        // Broker and consumer group settings only apply to Kafka.
        parse("[postgres]\ndsn = \"x\"\n\n[channel]\nkind = \"rabbitmq\"\nbrokers = []\nconsumer_group = \"\"\n")
            .unwrap();
    }

    #[test]
    fn test_empty_topic() {
        let err = parse("[postgres]\ndsn = \"x\"\n\n[channel]\ntopic = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
