//! Typed protocol events
//!
//! Every state transition publishes one [`OracleEvent`] on a broadcast
//! channel. Subscribers that fall behind lose the oldest events; nothing in
//! the core waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::registry::Identity;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OracleEvent {
    RequestCreated {
        request_id: u64,
        creator: Identity,
        query: String,
    },
    ObserversSelected {
        request_id: u64,
        observers: Vec<Identity>,
    },
    CommitAccepted {
        request_id: u64,
        observer: Identity,
    },
    RevealOpened {
        request_id: u64,
        opened_by: Identity,
    },
    RevealAccepted {
        request_id: u64,
        observer: Identity,
        value: u64,
    },
    AnomalyStats {
        request_id: u64,
        anomalies: usize,
        total: usize,
        ratio_x10000: u64,
    },
    AuditInitiated {
        request_id: u64,
        disputed_value: u64,
        auditors: Vec<Identity>,
    },
    AuditVoteCast {
        request_id: u64,
        auditor: Identity,
        support_original: bool,
    },
    AuditClosed {
        request_id: u64,
        unanimous: bool,
        support_original: bool,
        deadlock: bool,
    },
    Settled {
        request_id: u64,
        payees: Vec<Identity>,
        total_paid: u128,
    },
    Deposited {
        identity: Identity,
        amount: u128,
    },
    Claimed {
        identity: Identity,
        amount: u128,
    },
}

impl OracleEvent {
    pub fn request_id(&self) -> Option<u64> {
        match self {
            OracleEvent::RequestCreated { request_id, .. }
            | OracleEvent::ObserversSelected { request_id, .. }
            | OracleEvent::CommitAccepted { request_id, .. }
            | OracleEvent::RevealOpened { request_id, .. }
            | OracleEvent::RevealAccepted { request_id, .. }
            | OracleEvent::AnomalyStats { request_id, .. }
            | OracleEvent::AuditInitiated { request_id, .. }
            | OracleEvent::AuditVoteCast { request_id, .. }
            | OracleEvent::AuditClosed { request_id, .. }
            | OracleEvent::Settled { request_id, .. } => Some(*request_id),
            OracleEvent::Deposited { .. } | OracleEvent::Claimed { .. } => None,
        }
    }
}

/// Event plus the time it was published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: OracleEvent,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn publish(&self, at: DateTime<Utc>, event: OracleEvent) {
        trace!(?event, "Publishing event");
        // No subscribers is not an error
        let _ = self.sender.send(EventRecord { at, event });
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
