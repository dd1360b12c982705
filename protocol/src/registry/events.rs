//! Status-change events.
//!
//! The registry pushes a [`NodeEvent`] to every registered observer when a
//! drone is created, changes liveness state or reports new discovery data.
//! Delivery is synchronous and fire-and-forget: observers cannot fail the
//! transition that produced the event.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::drone::NodeStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Up,
    Down,
    Warn,
    Unwarn,
    Update,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Up => "up",
            Self::Down => "down",
            Self::Warn => "warn",
            Self::Unwarn => "unwarn",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub kind: EventKind,
    pub designation: String,
    pub status: NodeStatus,
    pub reason: String,
    /// Extra context, e.g. the discovery type of an update.
    pub detail: Option<String>,
    pub time_ms: i64,
}

impl NodeEvent {
    pub fn new(kind: EventKind, designation: &str, status: NodeStatus, reason: &str) -> Self {
        Self {
            kind,
            designation: designation.to_string(),
            status,
            reason: reason.to_string(),
            detail: None,
            time_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Receives node events.
pub trait EventObserver: Send + Sync {
    fn notify(&self, event: &NodeEvent);
}

/// The set of registered observers.
pub struct EventBus {
    observers: Vec<Arc<dyn EventObserver>>,
    enabled: bool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
            enabled: true,
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer`. Registering the same observer twice is a no-op
    /// and returns `false`.
    pub fn register(&mut self, observer: Arc<dyn EventObserver>) -> bool {
        if self.is_registered(&observer) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Returns `true` if `observer` was registered.
    pub fn unregister(&mut self, observer: &Arc<dyn EventObserver>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !Arc::ptr_eq(o, observer));
        self.observers.len() != before
    }

    pub fn is_registered(&self, observer: &Arc<dyn EventObserver>) -> bool {
        self.observers.iter().any(|o| Arc::ptr_eq(o, observer))
    }

    /// Suspends or resumes delivery to every observer.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn emit(&self, event: NodeEvent) {
        trace!(kind = %event.kind, designation = %event.designation, "node event");
        if !self.enabled {
            return;
        }
        for observer in &self.observers {
            observer.notify(&event);
        }
    }
}

/// Forwards events into a tokio broadcast channel.
pub struct ChannelObserver {
    tx: broadcast::Sender<NodeEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Arc<Self>, broadcast::Receiver<NodeEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Arc::new(Self { tx }), rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }
}

impl EventObserver for ChannelObserver {
    fn notify(&self, event: &NodeEvent) {
        // No receivers is fine: nobody is listening right now.
        let _ = self.tx.send(event.clone());
    }
}
