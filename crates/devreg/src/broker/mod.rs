//! Publishing config changes to devices through the message broker.
//!
//! A publish returns a [`PendingConfirm`] that belongs to that publish alone,
//! so many requests can share one broker connection while each still waits
//! on its own confirmation.

mod mqtt;
#[cfg(test)]
pub(crate) mod scripted;

pub use mqtt::MqttPublisher;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::device::MacId;

/// Broker verdict on one published message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Ack,
    Nack,
}

/// What a caller observed while waiting for a confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Ack,
    Nack,
    /// Nothing arrived inside the window, or the broker link went away
    Silent,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Broker client not connected")]
    NotConnected,

    #[error("Broker client error: {0}")]
    Client(String),
}

/// Broker side of one confirmation; consumed by delivering the verdict
#[derive(Debug)]
pub struct ConfirmSender(oneshot::Sender<Confirmation>);

impl ConfirmSender {
    pub fn ack(self) {
        // The waiter may already have given up
        let _ = self.0.send(Confirmation::Ack);
    }

    pub fn nack(self) {
        let _ = self.0.send(Confirmation::Nack);
    }
}

/// Caller side of one confirmation
#[derive(Debug)]
pub struct PendingConfirm(oneshot::Receiver<Confirmation>);

impl PendingConfirm {
    pub fn channel() -> (ConfirmSender, PendingConfirm) {
        let (tx, rx) = oneshot::channel();
        (ConfirmSender(tx), PendingConfirm(rx))
    }

    /// Wait at most `window` for the broker's verdict
    ///
    /// The receive handle is dropped on every path out of here. A sender that
    /// disappears without answering counts as silence.
    pub async fn wait(self, window: Duration) -> ConfirmOutcome {
        match tokio::time::timeout(window, self.0).await {
            Ok(Ok(Confirmation::Ack)) => ConfirmOutcome::Ack,
            Ok(Ok(Confirmation::Nack)) => ConfirmOutcome::Nack,
            Ok(Err(_)) | Err(_) => ConfirmOutcome::Silent,
        }
    }
}

/// Publishes device configs keyed by MAC
#[async_trait]
pub trait ConfigPublisher: Send + Sync {
    /// Publish `body` so that only the device bound to `routing_key` gets it
    ///
    /// An `Err` means the message never left this process.
    async fn publish(&self, routing_key: &MacId, body: Vec<u8>)
        -> Result<PendingConfirm, PublishError>;
}
