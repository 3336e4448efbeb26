use crate::cache::IterationCache;
use crate::SharedGraph;
use flowcore::{
    ExportResolution, FlowError, GraphError, ImageChunk, IterationId, Link, PortId, PortSnapshot, Position, Step,
    StepId, TemplateIdentity,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::sync::Arc;

/// Read model of a step, either live or pinned to an iteration
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub id: StepId,
    pub name: String,
    pub template: TemplateIdentity,
    pub position: Position,
    pub last_duration_ms: Option<u64>,
    pub iteration_id: Option<IterationId>,
    pub ports: Vec<Arc<PortSnapshot>>,
}

impl StepView {
    pub fn live(step: &Step) -> Self {
        Self {
            id: step.id(),
            name: step.name().to_string(),
            template: step.template().identity.clone(),
            position: step.position(),
            last_duration_ms: step.last_duration().map(|d| d.as_millis() as u64),
            iteration_id: None,
            ports: step
                .ports()
                .iter()
                .map(|p| Arc::new(PortSnapshot::capture(None, step.id(), p)))
                .collect(),
        }
    }
}

/// Streamed image payload
pub struct ImageExport {
    pub total_len: usize,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub chunks: BoxStream<'static, ImageChunk>,
}

/// Read side of the remote API.
///
/// Reads pinned to an iteration go through the iteration cache for cacheable
/// ports; everything else is read from the live graph.
#[derive(Clone)]
pub struct FlowInspector {
    graph: SharedGraph,
    cache: Arc<IterationCache>,
    chunk_size: usize,
    thumbnail_edge: u32,
}

impl FlowInspector {
    pub fn new(graph: SharedGraph, cache: Arc<IterationCache>, chunk_size: usize, thumbnail_edge: u32) -> Self {
        Self {
            graph,
            cache,
            chunk_size,
            thumbnail_edge,
        }
    }

    pub async fn list_steps(&self) -> Vec<StepView> {
        self.graph.read().await.steps().map(StepView::live).collect()
    }

    pub async fn list_links(&self) -> Vec<Link> {
        self.graph.read().await.links().cloned().collect()
    }

    pub async fn get_step(&self, step_id: StepId, iteration: Option<IterationId>) -> Result<StepView, FlowError> {
        let graph = self.graph.read().await;
        let step = graph.step(step_id).ok_or(GraphError::StepNotFound(step_id))?;

        let Some(iteration_id) = iteration else {
            return Ok(StepView::live(step));
        };

        let snapshot = self.cache.get_or_create_step_entry(iteration_id, step);
        Ok(StepView {
            id: snapshot.step_id,
            name: snapshot.name.clone(),
            template: step.template().identity.clone(),
            position: snapshot.position,
            last_duration_ms: snapshot.last_duration_ms,
            iteration_id: Some(iteration_id),
            ports: self.port_views(step, Some(iteration_id)),
        })
    }

    pub async fn get_ports(
        &self,
        step_id: StepId,
        iteration: Option<IterationId>,
    ) -> Result<Vec<Arc<PortSnapshot>>, FlowError> {
        let graph = self.graph.read().await;
        let step = graph.step(step_id).ok_or(GraphError::StepNotFound(step_id))?;
        Ok(self.port_views(step, iteration))
    }

    pub async fn get_port(&self, port_id: PortId, iteration: Option<IterationId>) -> Result<Arc<PortSnapshot>, FlowError> {
        let graph = self.graph.read().await;
        let (step, port) = graph.port(port_id).ok_or(GraphError::PortNotFound(port_id))?;

        Ok(match iteration {
            Some(iteration_id) if port.is_cacheable() => {
                self.cache.get_or_create_port_entry(iteration_id, step.id(), port)
            }
            _ => Arc::new(PortSnapshot::capture(None, step.id(), port)),
        })
    }

    /// Streams an image port's payload in chunks of bounded size.
    pub async fn export_image(
        &self,
        port_id: PortId,
        iteration: Option<IterationId>,
        resolution: ExportResolution,
    ) -> Result<ImageExport, FlowError> {
        let snapshot = self.get_port(port_id, iteration).await?;
        let image = snapshot.image().ok_or(FlowError::NoImage(port_id))?;

        let image = match resolution {
            ExportResolution::Full => image,
            ExportResolution::Thumbnail => image.thumbnail(self.thumbnail_edge),
        };

        tracing::debug!(
            "Exporting port {} as {}x{}x{} ({} bytes)",
            port_id,
            image.width(),
            image.height(),
            image.channels(),
            image.len()
        );

        Ok(ImageExport {
            total_len: image.len(),
            width: image.width(),
            height: image.height(),
            channels: image.channels(),
            chunks: stream::iter(image.chunks(self.chunk_size)).boxed(),
        })
    }

    fn port_views(&self, step: &Step, iteration: Option<IterationId>) -> Vec<Arc<PortSnapshot>> {
        step.ports()
            .iter()
            .map(|port| match iteration {
                Some(iteration_id) if port.is_cacheable() => {
                    self.cache.get_or_create_port_entry(iteration_id, step.id(), port)
                }
                _ => Arc::new(PortSnapshot::capture(None, step.id(), port)),
            })
            .collect()
    }
}
