//! Flow runtime
//!
//! This crate hosts the active flow graph: the plugin registry, the
//! materializer that rebuilds persisted projects, the editor and inspector
//! used by remote clients, the iteration cache, and the engine that runs
//! the graph under the host's lifecycle.

mod cache;
mod editor;
mod engine;
mod host;
mod inspector;
mod materializer;
mod registry;

use flowcore::FlowGraph;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The active graph, shared between the editor, inspector, engine and cache
pub type SharedGraph = Arc<RwLock<FlowGraph>>;

pub use cache::{EntityId, IterationCache};
pub use editor::FlowEditor;
pub use engine::{Engine, EngineEvent};
pub use host::{FlowHost, HostConfig, ProjectSummary};
pub use inspector::{FlowInspector, ImageExport, StepView};
pub use materializer::{MaterializeReport, Materializer};
pub use registry::{
    DeviceInfo, DeviceProvider, DeviceProviderTemplate, PluginRegistry, ServiceProvider, StepTemplate,
    TemplateInfo, TemplateMetadata,
};
