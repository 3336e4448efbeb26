use crate::{Brand, Direction, EngineState, LinkId, PortId, StepId};
use thiserror::Error;

/// Coarse classification used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conversion,
    Lifecycle,
    Notification,
    Internal,
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("No active project")]
    NoActiveProject,

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Port {0} holds no image")]
    NoImage(PortId),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Graph(e) => e.kind(),
            FlowError::Conversion(_) => ErrorKind::Conversion,
            FlowError::Lifecycle(_) => ErrorKind::Lifecycle,
            FlowError::Notify(_) => ErrorKind::Notification,
            FlowError::NoActiveProject => ErrorKind::Lifecycle,
            FlowError::TemplateNotFound(_) | FlowError::NoImage(_) => ErrorKind::NotFound,
            FlowError::Serialization(_) => ErrorKind::Validation,
            FlowError::Step(_) | FlowError::Execution(_) | FlowError::Io(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: Brand,
        actual: Brand,
    },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Service not available: {0}")]
    MissingService(&'static str),

    #[error("Cancelled")]
    Cancelled,
}

/// Structural failures on the live graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    #[error("Port not found: {0}")]
    PortNotFound(PortId),

    #[error("Link not found: {0}")]
    LinkNotFound(LinkId),

    #[error("Link must go from an output to an input, got {from} -> {to}")]
    DirectionMismatch { from: Direction, to: Direction },

    #[error("Brand {from} cannot feed brand {to}")]
    IncompatibleBrands { from: Brand, to: Brand },

    #[error("Source and target belong to the same step {0}")]
    SameStep(StepId),

    #[error("Ports {from} and {to} are already linked")]
    DuplicateLink { from: PortId, to: PortId },

    #[error("Duplicate id in graph: {0}")]
    DuplicateId(uuid::Uuid),

    #[error("Cyclic dependency detected")]
    CyclicDependency,
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::StepNotFound(_) | GraphError::PortNotFound(_) | GraphError::LinkNotFound(_) => {
                ErrorKind::NotFound
            }
            _ => ErrorKind::Validation,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Cannot convert {raw} into a {brand} value")]
    Incompatible { brand: Brand, raw: String },

    #[error("'{value}' is not one of the allowed options {options:?}")]
    UnknownOption { value: String, options: Vec<String> },

    #[error("Image ports only accept values produced by steps")]
    ImageFromRaw,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("Cannot {action} while engine is {state}")]
    InvalidTransition {
        action: &'static str,
        state: EngineState,
    },

    #[error("No run has been started")]
    NoEngine,

    #[error("Project in state {0:?} cannot be run")]
    ProjectNotRunnable(crate::ProjectState),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to serialize notice: {0}")]
    Serialization(String),

    #[error("Failed to publish notice: {0}")]
    PublishFailed(String),
}
