mod channel;
mod error;
#[cfg(feature = "kafka")]
mod kafka;
mod memory;
#[cfg(feature = "rabbitmq")]
mod rabbitmq;

pub use channel::{AckToken, Channel, Delivery};
pub use error::{ChannelError, ChannelResult};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaChannel, KafkaChannelConfig};
pub use memory::MemoryChannel;
#[cfg(feature = "rabbitmq")]
pub use rabbitmq::{RabbitChannel, RabbitChannelConfig};
