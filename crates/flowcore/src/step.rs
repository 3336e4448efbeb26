use crate::{events::EventEmitter, Direction, IterationId, LinkId, Port, PortId, PortSpec, PortValue, StepError};
use async_trait::async_trait;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type StepId = Uuid;
pub type TemplateId = Uuid;

/// Core trait that every pluggable step implementation provides
#[async_trait]
pub trait StepBody: Send + Sync {
    /// Ports this body exposes, with their default values
    fn ports(&self) -> Vec<PortSpec>;

    /// Optional: called once right after the step is constructed
    fn on_created(&self) -> Result<(), StepError> {
        Ok(())
    }

    /// Optional: called once per run before the first iteration
    async fn prepare(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Execute one iteration of the step
    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError>;

    /// Optional: release native resources when the step is removed
    async fn shutdown(&self) -> Result<(), StepError> {
        Ok(())
    }
}

/// Structural identity of a step implementation.
///
/// Persisted graphs refer to templates by this pair, so references survive
/// template id churn between host restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateIdentity {
    pub type_name: String,
    pub origin: String,
}

impl TemplateIdentity {
    pub fn new(type_name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            origin: origin.into(),
        }
    }
}

impl fmt::Display for TemplateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.type_name, self.origin)
    }
}

/// Template a step was instantiated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub id: TemplateId,
    pub identity: TemplateIdentity,
}

/// Step position in the visual editor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Execution context passed to a step body
#[derive(Clone)]
pub struct StepContext {
    pub step_id: StepId,

    pub iteration_id: IterationId,

    /// Current values of the step's input ports, by port name
    pub inputs: HashMap<String, PortValue>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancellation token observed at the step's own checkpoints
    pub cancellation: CancellationToken,
}

impl StepContext {
    pub fn require_input(&self, name: &str) -> Result<&PortValue, StepError> {
        self.inputs
            .get(name)
            .ok_or_else(|| StepError::MissingInput(name.to_string()))
    }

    pub fn input_f64(&self, name: &str) -> Result<f64, StepError> {
        let value = self.require_input(name)?;
        value.as_f64().ok_or_else(|| StepError::InvalidInputType {
            field: name.to_string(),
            expected: crate::Brand::Numeric,
            actual: value.brand(),
        })
    }

    /// An image input; an empty image port counts as missing
    pub fn input_image(&self, name: &str) -> Result<crate::ImageBuffer, StepError> {
        match self.require_input(name)? {
            PortValue::Image(Some(image)) => Ok(image.clone()),
            PortValue::Image(None) => Err(StepError::MissingInput(name.to_string())),
            other => Err(StepError::InvalidInputType {
                field: name.to_string(),
                expected: crate::Brand::Image,
                actual: other.brand(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Output from a step iteration
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// Output port values by port name
    pub outputs: HashMap<String, PortValue>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<PortValue>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }
}

/// Graph node wrapping a step body and the ports it owns.
pub struct Step {
    id: StepId,
    name: String,
    template: TemplateRef,
    position: Position,
    last_duration: Option<Duration>,
    ports: Vec<Port>,
    body: Arc<dyn StepBody>,
}

impl Step {
    pub fn new(id: StepId, template: TemplateRef, body: Arc<dyn StepBody>) -> Self {
        let ports = body.ports().into_iter().map(Port::new).collect();
        Self {
            id,
            name: template.identity.type_name.clone(),
            template,
            position: Position::default(),
            last_duration: None,
            ports,
            body,
        }
    }

    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn template(&self) -> &TemplateRef {
        &self.template
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration
    }

    pub fn set_last_duration(&mut self, duration: Duration) {
        self.last_duration = Some(duration);
    }

    pub fn body(&self) -> Arc<dyn StepBody> {
        self.body.clone()
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.iter().find(|p| p.id() == id)
    }

    pub fn port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.id() == id)
    }

    pub fn port_named(&self, name: &str, direction: Direction) -> Option<&Port> {
        self.ports
            .iter()
            .find(|p| p.name() == name && p.direction() == direction)
    }

    pub fn port_named_mut(&mut self, name: &str, direction: Direction) -> Option<&mut Port> {
        self.ports
            .iter_mut()
            .find(|p| p.name() == name && p.direction() == direction)
    }

    /// Links touching any of this step's ports, in port order.
    pub fn incident_links(&self) -> IndexSet<LinkId> {
        self.ports.iter().flat_map(|p| p.links()).collect()
    }

    /// Current input values keyed by port name.
    pub fn input_values(&self) -> HashMap<String, PortValue> {
        self.ports
            .iter()
            .filter(|p| p.direction() == Direction::Input)
            .map(|p| (p.name().to_string(), p.value().clone()))
            .collect()
    }

    /// Gives an unlinked port a previously persisted id.
    pub fn adopt_port_id(&mut self, current: PortId, persisted: PortId) -> bool {
        if self.ports.iter().any(|p| p.id() == persisted) {
            return current == persisted;
        }
        match self.ports.iter_mut().find(|p| p.id() == current) {
            Some(port) if !port.is_connected() => {
                *port = Port::with_id(
                    persisted,
                    PortSpec {
                        name: port.name().to_string(),
                        direction: port.direction(),
                        default: port.value().clone(),
                    },
                );
                true
            }
            _ => false,
        }
    }

    pub(crate) fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.ports
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("template", &self.template.identity)
            .field("position", &self.position)
            .field("ports", &self.ports)
            .finish()
    }
}
