use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::{AckToken, Channel, Delivery};
use crate::error::{ChannelError, ChannelResult};

/// An in-process channel with a single partition.
///
/// Clones share the same log, so one clone can publish while another
/// consumes. Failures can be queued to exercise retry paths, and reopening
/// rewinds consumption to the last committed record the way a consumer
/// group does.
#[derive(Clone)]
pub struct MemoryChannel {
    state: Arc<Mutex<MemoryState>>,
    deadline: Duration,
}

#[derive(Default)]
struct MemoryState {
    log: Vec<Vec<u8>>,
    /// Next offset to hand out.
    read: usize,
    /// Offset after the last committed record.
    committed: usize,
    publish_failures: VecDeque<ChannelError>,
    consume_failures: VecDeque<ChannelError>,
    publish_attempts: usize,
    reopens: usize,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::with_deadline(Duration::from_millis(1000))
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            state: Arc::default(),
            deadline,
        }
    }

    /// Fail the next `publish` call with `error`.
    pub fn fail_next_publish(&self, error: ChannelError) {
        self.state.lock().unwrap().publish_failures.push_back(error);
    }

    /// Fail the next `consume` call with `error`.
    pub fn fail_next_consume(&self, error: ChannelError) {
        self.state.lock().unwrap().consume_failures.push_back(error);
    }

    /// Records successfully published, in order.
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().log.clone()
    }

    /// Publish calls made, including failed ones.
    pub fn publish_attempts(&self) -> usize {
        self.state.lock().unwrap().publish_attempts
    }

    /// Number of records acknowledged.
    pub fn committed(&self) -> usize {
        self.state.lock().unwrap().committed
    }

    pub fn reopens(&self) -> usize {
        self.state.lock().unwrap().reopens
    }
}

impl Channel for MemoryChannel {
    fn publish(&mut self, payload: Vec<u8>) -> impl Future<Output = ChannelResult<()>> + Send {
        let state = self.state.clone();
        async move {
            let mut state = state.lock().unwrap();
            state.publish_attempts += 1;
            if let Some(error) = state.publish_failures.pop_front() {
                return Err(error);
            }
            state.log.push(payload);
            Ok(())
        }
    }

    fn consume(&mut self) -> impl Future<Output = ChannelResult<Option<Delivery>>> + Send {
        let state = self.state.clone();
        let deadline = self.deadline;
        async move {
            let next = {
                let mut state = state.lock().unwrap();
                if let Some(error) = state.consume_failures.pop_front() {
                    return Err(error);
                }
                let offset = state.read;
                let payload = state.log.get(offset).cloned();
                if payload.is_some() {
                    state.read += 1;
                }
                payload.map(|payload| Delivery {
                    payload,
                    token: AckToken {
                        partition: 0,
                        offset: offset as i64,
                    },
                })
            };

            if next.is_none() {
                tokio::time::sleep(deadline).await;
            }
            Ok(next)
        }
    }

    fn commit(&mut self, token: AckToken) -> impl Future<Output = ChannelResult<()>> + Send {
        let state = self.state.clone();
        async move {
            let mut state = state.lock().unwrap();
            let next = usize::try_from(token.offset + 1)
                .map_err(|_| ChannelError::Commit(format!("invalid offset {}", token.offset)))?;
            if next > state.read {
                return Err(ChannelError::Commit(format!(
                    "offset {} was never consumed",
                    token.offset
                )));
            }
            state.committed = state.committed.max(next);
            Ok(())
        }
    }

    fn reopen(&mut self) -> impl Future<Output = ChannelResult<()>> + Send {
        let state = self.state.clone();
        async move {
            let mut state = state.lock().unwrap();
            state.read = state.committed;
            state.reopens += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_consume_in_order() {
        let mut producer = MemoryChannel::new();
        let mut consumer = producer.clone();

        producer.publish(b"one".to_vec()).await.unwrap();
        producer.publish(b"two".to_vec()).await.unwrap();

        let first = consumer.consume().await.unwrap().unwrap();
        let second = consumer.consume().await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(second.payload, b"two");
        assert_eq!(second.token.offset, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_times_out_when_empty() {
        let mut channel = MemoryChannel::with_deadline(Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        assert!(channel.consume().await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_uncommitted_records_are_redelivered_after_reopen() {
        let mut channel = MemoryChannel::new();
        channel.publish(b"a".to_vec()).await.unwrap();
        channel.publish(b"b".to_vec()).await.unwrap();

        let a = channel.consume().await.unwrap().unwrap();
        channel.commit(a.token).await.unwrap();
        let b = channel.consume().await.unwrap().unwrap();
        assert_eq!(b.payload, b"b");

        channel.reopen().await.unwrap();
        let again = channel.consume().await.unwrap().unwrap();
        assert_eq!(again.payload, b"b");
        assert_eq!(channel.committed(), 1);
        assert_eq!(channel.reopens(), 1);
    }

    #[tokio::test]
    async fn test_queued_failures() {
        let mut channel = MemoryChannel::new();
        channel.fail_next_publish(ChannelError::Unavailable("down".into()));

        assert!(channel.publish(b"x".to_vec()).await.unwrap_err().is_transient());
        channel.publish(b"x".to_vec()).await.unwrap();
        assert_eq!(channel.publish_attempts(), 2);
        assert_eq!(channel.published().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_of_unconsumed_offset_fails() {
        let mut channel = MemoryChannel::new();
        let token = AckToken {
            partition: 0,
            offset: 3,
        };
        assert!(matches!(
            channel.commit(token).await,
            Err(ChannelError::Commit(_))
        ));
    }
}
