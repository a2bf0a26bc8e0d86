use thiserror::Error;

/// Errors from a message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The broker cannot be reached right now.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("invalid channel configuration: {0}")]
    Config(String),
}

impl ChannelError {
    /// Whether closing and reopening the channel and trying again can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_))
    }
}

pub type ChannelResult<T> = Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(ChannelError::Unavailable("all brokers down".into()).is_transient());
        assert!(!ChannelError::Publish("message too large".into()).is_transient());
        assert!(!ChannelError::Config("no brokers".into()).is_transient());
    }
}
