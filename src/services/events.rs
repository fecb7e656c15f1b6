//! Lifecycle event sink
//!
//! After a successful mutation the pipeline emits one event per written
//! object to the notification collaborator. Emission is best-effort:
//! failures are logged and never surfaced to the caller, because the
//! mutation has already succeeded from the caller's view.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::model::{Caller, Id, ObjectType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LifecycleAction::Created => "created",
            LifecycleAction::Updated => "updated",
            LifecycleAction::Deleted => "deleted",
        })
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub action: LifecycleAction,
    pub object_type: ObjectType,
    pub object_id: Id,
    pub caller_id: Option<Id>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        action: LifecycleAction,
        object_type: ObjectType,
        object_id: Id,
        caller: &Caller,
    ) -> Self {
        Self {
            action,
            object_type,
            object_id,
            caller_id: caller.id,
            occurred_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn object_created(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()>;

    async fn object_updated(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()>;

    async fn object_deleted(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()>;
}

/// Sink fanning events out over a broadcast channel, for in-process
/// subscribers (notification workers, websocket feeds).
pub struct BroadcastSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<LifecycleEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: LifecycleEvent) -> anyhow::Result<()> {
        // No live receivers is a normal state, not a delivery failure.
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn object_created(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        self.send(LifecycleEvent::new(
            LifecycleAction::Created,
            object_type,
            id,
            caller,
        ))
    }

    async fn object_updated(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        self.send(LifecycleEvent::new(
            LifecycleAction::Updated,
            object_type,
            id,
            caller,
        ))
    }

    async fn object_deleted(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        self.send(LifecycleEvent::new(
            LifecycleAction::Deleted,
            object_type,
            id,
            caller,
        ))
    }
}

/// Sink that only logs, for environments without a notification worker.
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn object_created(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        tracing::debug!(caller_id = ?caller.id, object_type = %object_type, object_id = %id, "object created");
        Ok(())
    }

    async fn object_updated(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        tracing::debug!(caller_id = ?caller.id, object_type = %object_type, object_id = %id, "object updated");
        Ok(())
    }

    async fn object_deleted(
        &self,
        caller: &Caller,
        object_type: ObjectType,
        id: Id,
    ) -> anyhow::Result<()> {
        tracing::debug!(caller_id = ?caller.id, object_type = %object_type, object_id = %id, "object deleted");
        Ok(())
    }
}
