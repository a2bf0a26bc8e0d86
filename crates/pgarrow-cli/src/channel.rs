use std::future::Future;

use anyhow::Result;
use pgarrow_channel::{AckToken, Channel, ChannelResult, Delivery, MemoryChannel};
#[cfg(feature = "kafka")]
use pgarrow_channel::{KafkaChannel, KafkaChannelConfig};
#[cfg(feature = "rabbitmq")]
use pgarrow_channel::{RabbitChannel, RabbitChannelConfig};
use pgarrow_config::{ChannelConfig, ChannelKind};

/// The channel selected in the configuration.
pub enum ConfiguredChannel {
    Memory(MemoryChannel),
    #[cfg(feature = "kafka")]
    Kafka(KafkaChannel),
    #[cfg(feature = "rabbitmq")]
    Rabbitmq(RabbitChannel),
}

impl ConfiguredChannel {
    pub fn open(config: &ChannelConfig) -> Result<Self> {
        match config.kind {
            ChannelKind::Memory => Ok(Self::Memory(MemoryChannel::with_deadline(config.deadline()))),
            #[cfg(feature = "kafka")]
            ChannelKind::Kafka => Ok(Self::Kafka(KafkaChannel::new(KafkaChannelConfig {
                brokers: config.brokers(),
                topic_prefix: config.topic_prefix.clone(),
                topic: config.topic.clone(),
                consumer_group: config.consumer_group.clone(),
                deadline: config.deadline(),
            })?)),
            #[cfg(not(feature = "kafka"))]
            ChannelKind::Kafka => {
                anyhow::bail!("this build of pgarrow has no Kafka support; rebuild with --features kafka")
            }
            #[cfg(feature = "rabbitmq")]
            ChannelKind::Rabbitmq => Ok(Self::Rabbitmq(RabbitChannel::new(RabbitChannelConfig {
                url: config.amqp_url(),
                topic_prefix: config.topic_prefix.clone(),
                topic: config.topic.clone(),
                transient: config.transient,
                auto_delete: config.auto_delete,
                deadline: config.deadline(),
            })?)),
            #[cfg(not(feature = "rabbitmq"))]
            ChannelKind::Rabbitmq => {
                anyhow::bail!(
                    "this build of pgarrow has no RabbitMQ support; rebuild with --features rabbitmq"
                )
            }
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// A second handle onto the same channel, for running the publishing and
    /// the replaying side in one process.
    pub fn pair(config: &ChannelConfig) -> Result<(Self, Self)> {
        let first = Self::open(config)?;
        let second = match &first {
            Self::Memory(memory) => Self::Memory(memory.clone()),
            #[cfg(feature = "kafka")]
            Self::Kafka(_) => Self::open(config)?,
            #[cfg(feature = "rabbitmq")]
            Self::Rabbitmq(_) => Self::open(config)?,
        };
        Ok((first, second))
    }
}

impl Channel for ConfiguredChannel {
    fn publish(&mut self, payload: Vec<u8>) -> impl Future<Output = ChannelResult<()>> + Send {
        async move {
            match self {
                Self::Memory(c) => c.publish(payload).await,
                #[cfg(feature = "kafka")]
                Self::Kafka(c) => c.publish(payload).await,
                #[cfg(feature = "rabbitmq")]
                Self::Rabbitmq(c) => c.publish(payload).await,
            }
        }
    }

    fn consume(&mut self) -> impl Future<Output = ChannelResult<Option<Delivery>>> + Send {
        async move {
            match self {
                Self::Memory(c) => c.consume().await,
                #[cfg(feature = "kafka")]
                Self::Kafka(c) => c.consume().await,
                #[cfg(feature = "rabbitmq")]
                Self::Rabbitmq(c) => c.consume().await,
            }
        }
    }

    fn commit(&mut self, token: AckToken) -> impl Future<Output = ChannelResult<()>> + Send {
        async move {
            match self {
                Self::Memory(c) => c.commit(token).await,
                #[cfg(feature = "kafka")]
                Self::Kafka(c) => c.commit(token).await,
                #[cfg(feature = "rabbitmq")]
                Self::Rabbitmq(c) => c.commit(token).await,
            }
        }
    }

    fn reopen(&mut self) -> impl Future<Output = ChannelResult<()>> + Send {
        async move {
            match self {
                Self::Memory(c) => c.reopen().await,
                #[cfg(feature = "kafka")]
                Self::Kafka(c) => c.reopen().await,
                #[cfg(feature = "rabbitmq")]
                Self::Rabbitmq(c) => c.reopen().await,
            }
        }
    }
}
