use crate::inspector::StepView;
use crate::registry::PluginRegistry;
use crate::SharedGraph;
use chrono::Utc;
use flowcore::{
    EventBus, FlowError, FlowEvent, FlowGraph, GraphError, Link, LinkId, PortId, Position, StepId, TemplateId,
};
use std::sync::Arc;
use tokio::sync::RwLockWriteGuard;

/// Structural editing of the active graph.
///
/// Every mutation takes the graph write lock, so operations touching the same
/// ports or links are serialized and the duplicate-link check cannot race.
///
/// An editor is bound to one activation. Once its project is deactivated or
/// replaced, every call fails with [`FlowError::NoActiveProject`].
#[derive(Clone)]
pub struct FlowEditor {
    graph: SharedGraph,
    registry: Arc<PluginRegistry>,
    bus: Arc<EventBus>,
}

impl FlowEditor {
    pub fn new(graph: SharedGraph, registry: Arc<PluginRegistry>, bus: Arc<EventBus>) -> Self {
        Self { graph, registry, bus }
    }

    async fn live_graph(&self) -> Result<RwLockWriteGuard<'_, FlowGraph>, FlowError> {
        let graph = self.graph.write().await;
        if graph.is_retired() {
            return Err(FlowError::NoActiveProject);
        }
        Ok(graph)
    }

    pub async fn add_step(&self, template_id: TemplateId, x: f32, y: f32) -> Result<StepView, FlowError> {
        let mut step = self.registry.instantiate(template_id)?;
        let position = Position::new(x, y);
        step.set_position(position);

        let view = StepView::live(&step);
        let template = step.template().identity.clone();
        let step_id = self.live_graph().await?.add_step(step)?;

        tracing::info!("Added step {} from template {}", step_id, template);
        self.bus.emit(FlowEvent::StepAdded {
            step_id,
            template,
            position,
            timestamp: Utc::now(),
        });
        Ok(view)
    }

    /// Removes a step and every link touching it. Returns the removed links.
    pub async fn remove_step(&self, step_id: StepId) -> Result<Vec<Link>, FlowError> {
        let (step, links) = self.live_graph().await?.remove_step(step_id)?;

        tracing::info!("Removed step {} with {} links", step_id, links.len());
        self.bus.emit(FlowEvent::StepRemoved {
            step_id,
            links: links.iter().map(|l| l.id).collect(),
            timestamp: Utc::now(),
        });

        if let Err(e) = step.body().shutdown().await {
            tracing::error!("Failed to shut down step {}: {}", step_id, e);
        }
        Ok(links)
    }

    pub async fn move_step(&self, step_id: StepId, x: f32, y: f32) -> Result<(), FlowError> {
        let position = Position::new(x, y);
        {
            let mut graph = self.live_graph().await?;
            let step = graph.step_mut(step_id).ok_or(GraphError::StepNotFound(step_id))?;
            step.set_position(position);
        }

        self.bus.emit(FlowEvent::StepChanged {
            step_id,
            position,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn link_ports(&self, source: PortId, target: PortId) -> Result<Link, FlowError> {
        let link = self.live_graph().await?.link_ports(source, target)?;

        tracing::debug!("Linked {} -> {} as {}", source, target, link.id);
        self.bus.emit(FlowEvent::LinkAdded {
            link: link.clone(),
            timestamp: Utc::now(),
        });
        Ok(link)
    }

    /// Removes a link. Unlinking an id that is already gone succeeds with `None`.
    pub async fn unlink_ports(&self, link_id: LinkId) -> Result<Option<Link>, FlowError> {
        let removed = self.live_graph().await?.unlink(link_id);

        if removed.is_some() {
            self.bus.emit(FlowEvent::LinkRemoved {
                link_id,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Applies a raw value to a port through its brand conversion.
    ///
    /// The change event is emitted before the conversion outcome is known.
    pub async fn update_port_value(&self, port_id: PortId, raw: serde_json::Value) -> Result<(), FlowError> {
        let mut graph = self.live_graph().await?;
        let step_id = graph.port_owner(port_id).ok_or(GraphError::PortNotFound(port_id))?;
        let port = graph.port_mut(port_id).ok_or(GraphError::PortNotFound(port_id))?;

        self.bus.emit(FlowEvent::PortChanged {
            step_id,
            port_id,
            timestamp: Utc::now(),
        });

        port.set_raw(&raw).map_err(|e| {
            tracing::debug!("Rejected value {} for port {}: {}", raw, port_id, e);
            FlowError::from(e)
        })
    }
}
