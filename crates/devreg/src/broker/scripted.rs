use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::ConfigPublisher;
use super::ConfirmSender;
use super::PendingConfirm;
use super::PublishError;
use crate::device::MacId;

/// How the scripted broker answers one publish
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Ack,
    Nack,
    /// Accept the publish but never confirm it
    Silent,
    /// Fail the publish call itself
    FailPublish,
    AckAfter(Duration),
}

/// Test publisher that answers publishes from a script
///
/// Once the script runs out every publish is acked.
#[derive(Debug, Default)]
pub struct ScriptedPublisher {
    script: Mutex<VecDeque<Script>>,
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    /// Senders for silent publishes, kept alive so waiters see no signal
    parked: Mutex<Vec<ConfirmSender>>,
}

impl ScriptedPublisher {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl ConfigPublisher for ScriptedPublisher {
    async fn publish(
        &self,
        routing_key: &MacId,
        body: Vec<u8>,
    ) -> Result<PendingConfirm, PublishError> {
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Ack);
        if let Script::FailPublish = step {
            return Err(PublishError::Client("channel closed".to_string()));
        }

        self.published
            .lock()
            .unwrap()
            .push((routing_key.to_string(), body));

        let (sender, pending) = PendingConfirm::channel();
        match step {
            Script::Ack => sender.ack(),
            Script::Nack => sender.nack(),
            Script::Silent => self.parked.lock().unwrap().push(sender),
            Script::AckAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    sender.ack();
                });
            }
            Script::FailPublish => unreachable!(),
        }
        Ok(pending)
    }
}
