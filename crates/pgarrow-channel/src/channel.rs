use std::future::Future;

use crate::error::ChannelResult;

/// Identifies a consumed record for acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckToken {
    pub partition: i32,
    pub offset: i64,
}

/// A consumed record that has not been acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub token: AckToken,
}

/// Transport for serialized transactions between the capturing and the
/// applying side.
///
/// Delivery is at least once: a record that was consumed but never
/// committed is delivered again after the channel is reopened.
pub trait Channel: Send {
    /// Publish one record. Safe to retry.
    fn publish(&mut self, payload: Vec<u8>) -> impl Future<Output = ChannelResult<()>> + Send;

    /// Wait up to the channel's deadline for the next record. `None` when
    /// nothing arrived in time.
    fn consume(&mut self) -> impl Future<Output = ChannelResult<Option<Delivery>>> + Send;

    /// Acknowledge a record and everything consumed before it.
    fn commit(&mut self, token: AckToken) -> impl Future<Output = ChannelResult<()>> + Send;

    /// Close the underlying connections and open new ones.
    fn reopen(&mut self) -> impl Future<Output = ChannelResult<()>> + Send;
}
