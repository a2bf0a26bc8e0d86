//! Process-wide shutdown signal.

use tokio::sync::watch;

/// Sending side, held by whoever owns the process lifetime.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side, polled at every suspension point of a long-running loop.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown is requested. Also resolves if every sender is
    /// gone, since nobody is left to keep the process running.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
