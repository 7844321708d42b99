use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Outgoing;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ConfigPublisher;
use super::ConfirmSender;
use super::PendingConfirm;
use super::PublishError;
use crate::config::BrokerConfig;
use crate::device::MacId;

/// Capacity of the request channel between the client and its event loop
const REQUEST_CHANNEL_SIZE: usize = 64;

/// Matches broker PUBACKs to the publish calls that caused them
///
/// rumqttc assigns packet ids inside its event loop, in the order publish
/// requests were queued. Senders therefore wait in `queued` until the
/// outgoing publish reveals their packet id, then move to `in_flight`.
#[derive(Debug, Default)]
struct ConfirmTracker {
    queued: VecDeque<ConfirmSender>,
    in_flight: HashMap<u16, ConfirmSender>,
    /// Packet ids the client will resend after a reconnect; their
    /// confirmations were already abandoned
    replaying: HashSet<u16>,
}

impl ConfirmTracker {
    fn on_outgoing_publish(&mut self, pkid: u16) {
        if self.replaying.remove(&pkid) {
            return;
        }
        match self.queued.pop_front() {
            Some(sender) => {
                self.in_flight.insert(pkid, sender);
            }
            None => debug!(pkid, "Outgoing publish with no waiting confirmation"),
        }
    }

    fn on_puback(&mut self, pkid: u16) {
        if let Some(sender) = self.in_flight.remove(&pkid) {
            sender.ack();
        }
    }

    /// Drop every confirmation already handed to the network
    ///
    /// Their waiters observe silence. Queued publishes have not been written
    /// yet, so they keep their place.
    fn on_connection_lost(&mut self) -> usize {
        let dropped = self.in_flight.len();
        self.replaying.extend(self.in_flight.drain().map(|(pkid, _)| pkid));
        dropped
    }
}

fn lock(tracker: &Mutex<ConfirmTracker>) -> std::sync::MutexGuard<'_, ConfirmTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// MQTT-backed config publisher
///
/// The exchange is a topic root: a config for `mac` goes to
/// `<exchange>/<mac>`, and each device subscribes only to its own topic.
/// Messages are sent at QoS 1 so every publish earns exactly one PUBACK,
/// and retained by default so a device that is offline picks up its latest
/// config when it reconnects.
///
/// Publishing never waits on the broker: while the connection is down, or
/// the request channel is full, `publish` fails straight away.
pub struct MqttPublisher {
    client: AsyncClient,
    exchange: String,
    retain: bool,
    tracker: Arc<Mutex<ConfirmTracker>>,

    /// Set on CONNACK, cleared on any event loop error
    connected: Arc<AtomicBool>,

    event_loop_task: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create the client and start its event loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &BrokerConfig) -> Result<Self, PublishError> {
        if config.exchange.is_empty() || config.exchange.contains(['+', '#']) {
            return Err(PublishError::Client(format!(
                "invalid exchange name {:?}",
                config.exchange
            )));
        }

        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(false);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_SIZE);
        let tracker = Arc::new(Mutex::new(ConfirmTracker::default()));
        let connected = Arc::new(AtomicBool::new(false));

        let loop_tracker = tracker.clone();
        let loop_connected = connected.clone();
        let event_loop_task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        lock(&loop_tracker).on_outgoing_publish(pkid);
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        lock(&loop_tracker).on_puback(ack.pkid);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                        loop_connected.store(true, Ordering::Release);
                        info!(
                            session_present = connack.session_present,
                            "Connected to MQTT broker"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        loop_connected.store(false, Ordering::Release);
                        let dropped = lock(&loop_tracker).on_connection_lost();
                        warn!(dropped, "MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(
            "MQTT publisher for {}:{} using exchange '{}'",
            config.host, config.port, config.exchange
        );

        Ok(Self {
            client,
            exchange: config.exchange.clone(),
            retain: config.retain,
            tracker,
            connected,
            event_loop_task,
        })
    }

    fn topic(&self, routing_key: &MacId) -> String {
        format!("{}/{}", self.exchange, routing_key)
    }
}

#[async_trait]
impl ConfigPublisher for MqttPublisher {
    async fn publish(
        &self,
        routing_key: &MacId,
        body: Vec<u8>,
    ) -> Result<PendingConfirm, PublishError> {
        if self.event_loop_task.is_finished() || !self.connected.load(Ordering::Acquire) {
            return Err(PublishError::NotConnected);
        }

        let topic = self.topic(routing_key);
        let (sender, pending) = PendingConfirm::channel();

        // The tracker lock orders sender and request the same way
        let mut tracker = lock(&self.tracker);
        tracker.queued.push_back(sender);

        if let Err(e) = self
            .client
            .try_publish(&topic, QoS::AtLeastOnce, self.retain, body)
        {
            tracker.queued.pop_back();
            return Err(PublishError::Client(e.to_string()));
        }
        drop(tracker);

        debug!(topic = %topic, "Queued config publish");
        Ok(pending)
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_loop_task.abort();
    }
}
