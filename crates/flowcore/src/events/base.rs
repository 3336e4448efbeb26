use crate::{IterationId, Link, LinkId, NotifyError, PortId, Position, RunId, RunMetadata, StepId, TemplateIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Everything observable about the active graph, on one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    StepAdded {
        step_id: StepId,
        template: TemplateIdentity,
        position: Position,
        timestamp: DateTime<Utc>,
    },
    StepRemoved {
        step_id: StepId,
        links: Vec<LinkId>,
        timestamp: DateTime<Utc>,
    },
    StepChanged {
        step_id: StepId,
        position: Position,
        timestamp: DateTime<Utc>,
    },
    LinkAdded {
        link: Link,
        timestamp: DateTime<Utc>,
    },
    LinkRemoved {
        link_id: LinkId,
        timestamp: DateTime<Utc>,
    },
    PortChanged {
        step_id: StepId,
        port_id: PortId,
        timestamp: DateTime<Utc>,
    },
    RunStatusChanged {
        status: RunMetadata,
    },
    IterationFinished {
        notice: IterationNotice,
    },
    StepLog {
        step_id: StepId,
        iteration_id: IterationId,
        event: StepEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events a step body reports while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StepEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Lightweight notice sent after every completed iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationNotice {
    pub run_id: RunId,
    pub iteration_id: IterationId,
    pub index: u64,
    pub timestamp: DateTime<Utc>,
}

/// Message published outward on run state changes and iteration completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunNotice {
    Status { status: RunMetadata },
    IterationFinished { notice: IterationNotice },
}

/// Outward notification collaborator.
///
/// Failures are reported to the caller, which logs them; they never roll back
/// the local change that triggered the notice.
#[async_trait]
pub trait RunNotifier: Send + Sync {
    async fn publish(&self, notice: &RunNotice) -> Result<(), NotifyError>;
}

/// Event emitter for steps to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    iteration_id: IterationId,
    step_id: StepId,
    sender: broadcast::Sender<FlowEvent>,
}

impl EventEmitter {
    pub fn new(iteration_id: IterationId, step_id: StepId, sender: broadcast::Sender<FlowEvent>) -> Self {
        Self {
            iteration_id,
            step_id,
            sender,
        }
    }

    /// Emit a step-specific event
    pub fn emit(&self, event: StepEvent) {
        let _ = self.sender.send(FlowEvent::StepLog {
            step_id: self.step_id,
            iteration_id: self.iteration_id,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(StepEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(StepEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(StepEvent::Progress { percent, message });
    }
}

/// Host-wide event bus
pub struct EventBus {
    sender: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, iteration_id: IterationId, step_id: StepId) -> EventEmitter {
        EventEmitter::new(iteration_id, step_id, self.sender.clone())
    }
}

#[async_trait]
impl RunNotifier for EventBus {
    async fn publish(&self, notice: &RunNotice) -> Result<(), NotifyError> {
        let event = match notice.clone() {
            RunNotice::Status { status } => FlowEvent::RunStatusChanged { status },
            RunNotice::IterationFinished { notice } => FlowEvent::IterationFinished { notice },
        };
        self.emit(event);
        Ok(())
    }
}
