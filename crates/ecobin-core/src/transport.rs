//! Broker Links
//!
//! A link is split in two halves, mirroring how MQTT clients are built:
//! - [`LinkSender`] enqueues outgoing messages without blocking.
//! - [`LinkDriver`] owns the connection and is polled by the publisher's
//!   maintenance task; each poll yields the next connection-level event.
//!
//! Two links are provided: [`MqttLink`] over `rumqttc`, and [`LoopbackLink`],
//! an in-process link whose connection events are scripted through a
//! [`LoopbackController`].

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Connection-level events surfaced by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The broker accepted the session
    Connected,
    /// The session was refused or the transport dropped
    Dropped(String),
    /// Protocol traffic with no effect on connection state
    Activity,
}

/// Non-blocking outgoing half of a link
pub trait LinkSender: Send + Sync {
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), String>;
    fn disconnect(&self) -> Result<(), String>;
}

/// Connection-owning half of a link
#[async_trait]
pub trait LinkDriver: Send {
    async fn poll(&mut self) -> LinkEvent;
}

pub type SplitLink = (Box<dyn LinkSender>, Box<dyn LinkDriver>);

// ============================================================================
// MQTT
// ============================================================================

/// Broker connection parameters
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub request_capacity: usize,
}

pub struct MqttLink;

impl MqttLink {
    pub fn split(settings: &MqttSettings) -> SplitLink {
        let mut options =
            MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(settings.keep_alive);

        let (client, eventloop) = AsyncClient::new(options, settings.request_capacity);
        let sender: Box<dyn LinkSender> = Box::new(MqttSender { client });
        let driver: Box<dyn LinkDriver> = Box::new(MqttDriver { eventloop });
        (sender, driver)
    }
}

struct MqttSender {
    client: AsyncClient,
}

impl LinkSender for MqttSender {
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), String> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| e.to_string())
    }

    fn disconnect(&self) -> Result<(), String> {
        self.client.try_disconnect().map_err(|e| e.to_string())
    }
}

struct MqttDriver {
    eventloop: EventLoop,
}

#[async_trait]
impl LinkDriver for MqttDriver {
    async fn poll(&mut self) -> LinkEvent {
        // rumqttc reconnects on the poll following an error
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    LinkEvent::Connected
                } else {
                    LinkEvent::Dropped(format!("connection refused: {:?}", ack.code))
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                LinkEvent::Dropped("broker sent disconnect".to_string())
            }
            Ok(_) => LinkEvent::Activity,
            Err(e) => LinkEvent::Dropped(e.to_string()),
        }
    }
}

// ============================================================================
// Loopback
// ============================================================================

/// A message accepted by the loopback link
#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Handle for scripting a loopback link's connection and inspecting traffic
#[derive(Clone)]
pub struct LoopbackController {
    events: mpsc::UnboundedSender<LinkEvent>,
    messages: Arc<Mutex<Vec<LoopbackMessage>>>,
    disconnected: Arc<AtomicBool>,
}

impl LoopbackController {
    pub fn connect(&self) {
        let _ = self.events.send(LinkEvent::Connected);
    }

    pub fn drop_connection(&self, reason: &str) {
        let _ = self.events.send(LinkEvent::Dropped(reason.to_string()));
    }

    /// Messages accepted so far, in send order
    pub fn messages(&self) -> Vec<LoopbackMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether a graceful disconnect was requested
    pub fn disconnect_requested(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

pub struct LoopbackLink;

impl LoopbackLink {
    /// Create a link that stays silent until the controller scripts events
    pub fn pair() -> (SplitLink, LoopbackController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(AtomicBool::new(false));

        let controller = LoopbackController {
            events: tx.clone(),
            messages: messages.clone(),
            disconnected: disconnected.clone(),
        };
        let sender: Box<dyn LinkSender> = Box::new(LoopbackSender {
            messages,
            disconnected,
            events: tx,
        });
        let driver: Box<dyn LinkDriver> = Box::new(LoopbackDriver { rx });

        ((sender, driver), controller)
    }

    /// A link that is immediately accepted, for broker-less runs
    pub fn connected() -> (SplitLink, LoopbackController) {
        let (link, controller) = Self::pair();
        controller.connect();
        (link, controller)
    }
}

struct LoopbackSender {
    messages: Arc<Mutex<Vec<LoopbackMessage>>>,
    disconnected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkSender for LoopbackSender {
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), String> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| "loopback message log poisoned".to_string())?;
        messages.push(LoopbackMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn disconnect(&self) -> Result<(), String> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.events
            .send(LinkEvent::Dropped("client disconnect".to_string()))
            .map_err(|e| e.to_string())
    }
}

struct LoopbackDriver {
    rx: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
impl LinkDriver for LoopbackDriver {
    async fn poll(&mut self) -> LinkEvent {
        match self.rx.recv().await {
            Some(event) => event,
            // Every controller and the sender are gone; nothing will ever arrive
            None => std::future::pending().await,
        }
    }
}
