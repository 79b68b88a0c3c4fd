//! Event bus for qrgate using tokio::broadcast
//!
//! Announces admission outcomes and cache activity to whoever listens
//! (status pages, audit logging).

use crate::cache::CacheNamespace;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Events emitted by the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// Token passed the pre-checks for a generation
    Admitted { token_id: String },
    /// Request turned away; `kind` is the error's stable name
    Rejected { token_id: String, kind: &'static str },
    /// A cached value was reused
    CacheHit { namespace: CacheNamespace },
    /// A generation was recorded against the token
    Committed {
        token_id: String,
        usage_count: u32,
        max_usage_count: u32,
    },
    /// New tokens were added to the store
    Provisioned { count: usize },
}

impl GateEvent {
    /// Token the event concerns, if it is about a single token
    pub fn token_id(&self) -> Option<&str> {
        match self {
            GateEvent::Admitted { token_id }
            | GateEvent::Rejected { token_id, .. }
            | GateEvent::Committed { token_id, .. } => Some(token_id),
            GateEvent::CacheHit { .. } | GateEvent::Provisioned { .. } => None,
        }
    }
}

/// Events kept for slow subscribers before they start lagging
const EVENT_BUFFER: usize = 256;

/// Fan-out of gate events; cloning shares the channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GateEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_buffer(EVENT_BUFFER)
    }
}

impl EventBus {
    pub fn with_buffer(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Dropped silently when nobody listens
    pub fn publish(&self, event: GateEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.sender.subscribe()
    }

    /// Only the events about `token_id`, e.g. for a holder's status page
    pub fn watch_token(&self, token_id: impl Into<String>) -> TokenEvents {
        TokenEvents {
            token_id: token_id.into(),
            receiver: self.sender.subscribe(),
        }
    }
}

/// Per-token view over the bus
pub struct TokenEvents {
    token_id: String,
    receiver: broadcast::Receiver<GateEvent>,
}

impl TokenEvents {
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    /// Next event for this token; `None` once the bus is gone
    ///
    /// Events lost to lagging are skipped with a warning.
    pub async fn next(&mut self) -> Option<GateEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.token_id() == Some(self.token_id.as_str()) => {
                    return Some(event)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(token_id = %self.token_id, missed, "Token watcher lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
