//! Core abstractions for the flow engine
//!
//! Typed ports and links, steps wrapping pluggable bodies, the live flow
//! graph with its structural invariants, persisted project records, run
//! metadata, per-iteration snapshots and events. Nothing here spawns tasks.

mod error;
pub mod events;
mod graph;
mod image;
mod port;
mod project;
mod run;
mod snapshot;
mod step;
mod value;

pub use error::{
    ConversionError, ErrorKind, FlowError, GraphError, LifecycleError, NotifyError, StepError,
};
pub use events::*;
pub use graph::{Endpoint, FlowGraph, Link, LinkId};
pub use image::{ExportResolution, ImageBuffer, ImageChunk, ImageError};
pub use port::{Direction, Port, PortId, PortSpec};
pub use project::{
    LinkRecord, PortRecord, ProjectId, ProjectRecord, ProjectSettings, ProjectState, StepRecord,
};
pub use run::{EngineState, IterationId, RunId, RunMetadata, RunMode};
pub use snapshot::{PortSnapshot, Release, StepSnapshot};
pub use step::{
    Position, Step, StepBody, StepContext, StepId, StepOutput, TemplateId, TemplateIdentity,
    TemplateRef,
};
pub use value::{Brand, PortValue, Rect};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
