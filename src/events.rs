use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const EMAIL_SENT: &str = "email.sent";
pub const EMAIL_TEMPLATE_SENT: &str = "email.template.sent";

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_BUFFER: usize = 256;

/// Emitted once per delivered and counted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEvent {
    pub id: Uuid,
    pub name: String,
    pub to: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub attempt: u32,
    pub sent_at: DateTime<Utc>,
}

impl SendEvent {
    pub fn new(to: &str, subject: &str, template: Option<&str>, attempt: u32) -> Self {
        let name = if template.is_some() {
            EMAIL_TEMPLATE_SENT
        } else {
            EMAIL_SENT
        };

        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            template: template.map(str::to_string),
            attempt,
            sent_at: Utc::now(),
        }
    }
}

/// Fan-out channel for send events. Emitting never blocks and never fails.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SendEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SendEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SendEvent) {
        // Err only means nobody is listening
        if self.sender.send(event).is_err() {
            tracing::trace!("Send event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Log every event published on `bus` until the bus is dropped
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!(
                    event = %event.name,
                    id = %event.id,
                    to = %event.to,
                    subject = %event.subject,
                    template = event.template.as_deref().unwrap_or("-"),
                    attempt = event.attempt,
                    "Mail event"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
