//! Liveness events
//!
//! Two audiences receive events: an optional external [`EventSink`] (an
//! event bus), and in-process subscribers of the [`StatusEvent`] broadcast
//! channel such as the API's live stream.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, trace};

use crate::ReporterKind;

/// Subject of a published lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: ReporterKind,
    pub reporter_id: String,
    pub source_ip: Option<String>,
    pub partition: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// External event bus. Failures are logged by the caller and never abort
/// ingestion or evaluation.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_offline(&self, event: &LifecycleEvent) -> anyhow::Result<()>;

    async fn publish_recovery(&self, event: &LifecycleEvent) -> anyhow::Result<()>;

    async fn publish_first_seen(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

/// Event broadcast to in-process subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Offline {
        reporter_id: String,
        timestamp: DateTime<Utc>,
    },
    Recovered {
        reporter_id: String,
        timestamp: DateTime<Utc>,
    },
    FirstSeen {
        reporter_id: String,
        timestamp: DateTime<Utc>,
    },
    Reported {
        reporter_id: String,
        healthy: bool,
        timestamp: DateTime<Utc>,
    },
}

impl StatusEvent {
    pub fn reporter_id(&self) -> &str {
        match self {
            StatusEvent::Offline { reporter_id, .. }
            | StatusEvent::Recovered { reporter_id, .. }
            | StatusEvent::FirstSeen { reporter_id, .. }
            | StatusEvent::Reported { reporter_id, .. } => reporter_id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Offline,
    Recovery,
    FirstSeen,
}

/// Fan-out of liveness events to the optional sink and the broadcast channel.
#[derive(Clone)]
pub struct EventPublisher {
    sink: Option<Arc<dyn EventSink>>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl EventPublisher {
    pub fn new(sink: Option<Arc<dyn EventSink>>, status_tx: broadcast::Sender<StatusEvent>) -> Self {
        Self { sink, status_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<StatusEvent> {
        self.status_tx.clone()
    }

    pub async fn offline(&self, event: LifecycleEvent) {
        self.broadcast(StatusEvent::Offline {
            reporter_id: event.reporter_id.clone(),
            timestamp: event.timestamp,
        });
        self.publish(Lifecycle::Offline, &event).await;
    }

    pub async fn recovery(&self, event: LifecycleEvent) {
        self.broadcast(StatusEvent::Recovered {
            reporter_id: event.reporter_id.clone(),
            timestamp: event.timestamp,
        });
        self.publish(Lifecycle::Recovery, &event).await;
    }

    pub async fn first_seen(&self, event: LifecycleEvent) {
        self.broadcast(StatusEvent::FirstSeen {
            reporter_id: event.reporter_id.clone(),
            timestamp: event.timestamp,
        });
        self.publish(Lifecycle::FirstSeen, &event).await;
    }

    pub fn reported(&self, reporter_id: &str, healthy: bool, timestamp: DateTime<Utc>) {
        self.broadcast(StatusEvent::Reported {
            reporter_id: reporter_id.to_string(),
            healthy,
            timestamp,
        });
    }

    fn broadcast(&self, event: StatusEvent) {
        // no subscribers is fine
        if self.status_tx.send(event).is_err() {
            trace!("no status subscribers");
        }
    }

    async fn publish(&self, lifecycle: Lifecycle, event: &LifecycleEvent) {
        let Some(sink) = &self.sink else {
            return;
        };

        let result = match lifecycle {
            Lifecycle::Offline => sink.publish_offline(event).await,
            Lifecycle::Recovery => sink.publish_recovery(event).await,
            Lifecycle::FirstSeen => sink.publish_first_seen(event).await,
        };

        if let Err(e) = result {
            error!(
                "{}: failed to publish {:?} event: {e}",
                event.reporter_id, lifecycle
            );
        }
    }
}
