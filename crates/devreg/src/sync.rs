//! Config synchronization: replacing a device's schedule in the store and on
//! the physical device.
//!
//! The store is written first and the broker second, so the record returned
//! on success already carries the new schedule. When a later step fails the
//! store is ahead of the device; whether it is rolled back depends on the
//! [`RollbackPolicy`].
//!
//! ```text
//! Validating -> Persisted -> Publishing -> AwaitingConfirm -> Confirmed
//!                                 |                        -> Rejected
//!                                 |                        -> TimedOut
//!                                 +-> PublishFailed
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::broker::ConfigPublisher;
use crate::broker::ConfirmOutcome;
use crate::device::Device;
use crate::device::MacId;
use crate::device::Schedule;
use crate::error::RegistryError;
use crate::error::RegistryResult;
use crate::store::DeviceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SyncPhase {
    Validating,
    Persisted,
    Publishing,
    AwaitingConfirm,
    Confirmed,
    Rejected,
    TimedOut,
    PublishFailed,
}

impl SyncPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncPhase::Confirmed
                | SyncPhase::Rejected
                | SyncPhase::TimedOut
                | SyncPhase::PublishFailed
        )
    }

    pub fn can_advance_to(self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (self, next),
            (Validating, Persisted)
                | (Persisted, Publishing)
                | (Publishing, AwaitingConfirm)
                | (Publishing, PublishFailed)
                | (AwaitingConfirm, Confirmed)
                | (AwaitingConfirm, Rejected)
                | (AwaitingConfirm, TimedOut)
        )
    }
}

/// Which failures after the store write trigger a compensating write
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Restore the previous schedule only when the publish call itself fails
    #[default]
    PublishFailure,
    /// Also restore it on a broker rejection or a confirmation timeout
    AllFailures,
}

impl RollbackPolicy {
    fn rolls_back(self, terminal: SyncPhase) -> bool {
        match terminal {
            SyncPhase::PublishFailed => true,
            SyncPhase::Rejected | SyncPhase::TimedOut => self == RollbackPolicy::AllFailures,
            _ => false,
        }
    }
}

/// In-flight state of one replace request; never outlives it
#[derive(Debug)]
struct PendingSync {
    mac: MacId,
    previous: Option<Schedule>,
    next: Schedule,
    phase: SyncPhase,
}

impl PendingSync {
    fn new(mac: MacId, next: Schedule) -> Self {
        Self {
            mac,
            previous: None,
            next,
            phase: SyncPhase::Validating,
        }
    }

    fn advance(&mut self, next: SyncPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal sync transition {} -> {}",
            self.phase,
            next
        );
        debug!(mac = %self.mac, from = %self.phase, to = %next, "Config sync transition");
        self.phase = next;
    }
}

/// Coordinates the store write, the broker publish and the confirmation wait
pub struct ConfigSync {
    store: Arc<dyn DeviceStore>,
    publisher: Arc<dyn ConfigPublisher>,
    confirm_timeout: Duration,
    rollback: RollbackPolicy,
}

impl ConfigSync {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        publisher: Arc<dyn ConfigPublisher>,
        confirm_timeout: Duration,
        rollback: RollbackPolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            confirm_timeout,
            rollback,
        }
    }

    /// Replace the schedule of the device with `mac` and push it to the device
    ///
    /// Returns the re-read device once the broker confirms the message.
    #[tracing::instrument(skip_all, fields(mac = %mac))]
    pub async fn replace(&self, mac: &MacId, schedule: Schedule) -> RegistryResult<Device> {
        let mut sync = PendingSync::new(mac.clone(), schedule);

        if !sync.next.is_valid() {
            return Err(RegistryError::InvalidConfig(
                "schedule fields violate the schedule rules".to_string(),
            ));
        }
        let body = serde_json::to_vec(&sync.next)?;

        sync.previous = self.store.get_by_mac(mac).await?.cfg;
        if let Err(e) = self.store.patch_schedule(mac, &sync.next).await {
            warn!(kind = %e.kind(), "Failed to persist new schedule: {}", e);
            return Err(e);
        }
        sync.advance(SyncPhase::Persisted);

        sync.advance(SyncPhase::Publishing);
        let pending = match self.publisher.publish(mac, body).await {
            Ok(pending) => pending,
            Err(e) => {
                sync.advance(SyncPhase::PublishFailed);
                warn!("Publish failed: {}", e);
                self.settle(&sync).await;
                return Err(RegistryError::GatewayConnect(format!(
                    "failed to send config to broker: {}",
                    e
                )));
            }
        };

        sync.advance(SyncPhase::AwaitingConfirm);
        match pending.wait(self.confirm_timeout).await {
            ConfirmOutcome::Ack => {
                sync.advance(SyncPhase::Confirmed);
                info!("Config confirmed by broker");
                self.store.get_by_mac(mac).await
            }
            ConfirmOutcome::Nack => {
                sync.advance(SyncPhase::Rejected);
                warn!("Config rejected by broker");
                self.settle(&sync).await;
                Err(RegistryError::GatewayRejected(mac.to_string()))
            }
            ConfirmOutcome::Silent => {
                sync.advance(SyncPhase::TimedOut);
                warn!(
                    waited_ms = self.confirm_timeout.as_millis() as u64,
                    "No broker confirmation"
                );
                self.settle(&sync).await;
                Err(RegistryError::GatewayTimeout {
                    mac: mac.to_string(),
                    waited_ms: self.confirm_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Issue the compensating write for a failed sync if the policy asks for one
    ///
    /// Best effort: a failure here leaves the store and the device diverged and
    /// is only logged.
    async fn settle(&self, sync: &PendingSync) {
        if !self.rollback.rolls_back(sync.phase) {
            debug!(phase = %sync.phase, "Keeping new schedule in store");
            return;
        }

        let Some(previous) = &sync.previous else {
            error!(
                mac = %sync.mac,
                "No previous schedule to restore; store and device have diverged"
            );
            return;
        };

        match self.store.patch_schedule(&sync.mac, previous).await {
            Ok(()) => info!(mac = %sync.mac, "Restored previous schedule"),
            Err(e) => error!(
                mac = %sync.mac,
                "Compensating write failed, store and device have diverged: {}", e
            ),
        }
    }
}
