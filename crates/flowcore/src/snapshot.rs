//! Frozen per-iteration views of steps and ports.

use crate::{Brand, Direction, ImageBuffer, IterationId, Port, PortId, Position, Step, StepId};
use parking_lot::Mutex;
use serde::Serialize;

/// Explicit release of resources held by a cached value.
///
/// The iteration cache calls this exactly once, when the entry is evicted.
pub trait Release {
    fn release(&self);
}

#[derive(Debug, Serialize)]
pub struct StepSnapshot {
    pub iteration_id: IterationId,
    pub step_id: StepId,
    pub name: String,
    pub position: Position,
    pub last_duration_ms: Option<u64>,
    /// Ports whose values are frozen alongside this step
    pub cached_ports: Vec<PortId>,
}

impl StepSnapshot {
    pub fn capture(iteration_id: IterationId, step: &Step) -> Self {
        Self {
            iteration_id,
            step_id: step.id(),
            name: step.name().to_string(),
            position: step.position(),
            last_duration_ms: step.last_duration().map(|d| d.as_millis() as u64),
            cached_ports: step
                .ports()
                .iter()
                .filter(|p| p.is_cacheable())
                .map(|p| p.id())
                .collect(),
        }
    }
}

impl Release for StepSnapshot {
    fn release(&self) {}
}

#[derive(Debug, Serialize)]
pub struct PortSnapshot {
    pub iteration_id: Option<IterationId>,
    pub step_id: StepId,
    pub port_id: PortId,
    pub name: String,
    pub direction: Direction,
    pub brand: Brand,
    pub connected: bool,
    /// Display rendition of the value
    pub value: serde_json::Value,
    #[serde(skip)]
    image: Mutex<Option<ImageBuffer>>,
}

impl PortSnapshot {
    /// Materializes the port's display value. Image pixels are copied so the
    /// snapshot does not pin the live port buffer.
    pub fn capture(iteration_id: Option<IterationId>, step_id: StepId, port: &Port) -> Self {
        Self {
            iteration_id,
            step_id,
            port_id: port.id(),
            name: port.name().to_string(),
            direction: port.direction(),
            brand: port.brand(),
            connected: port.is_connected(),
            value: port.value().to_raw(),
            image: Mutex::new(port.value().as_image().map(ImageBuffer::detached)),
        }
    }

    pub fn image(&self) -> Option<ImageBuffer> {
        self.image.lock().clone()
    }

    pub fn holds_payload(&self) -> bool {
        self.image.lock().is_some()
    }
}

impl Release for PortSnapshot {
    fn release(&self) {
        if let Some(image) = self.image.lock().take() {
            tracing::debug!(port_id = %self.port_id, bytes = image.len(), "Released snapshot image");
        }
    }
}
