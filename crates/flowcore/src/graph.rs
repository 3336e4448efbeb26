//! Live flow graph.
//!
//! Steps own their ports. Links are owned by the graph and referenced from
//! both endpoint ports by id, so there are no ownership cycles. A port is
//! connected exactly when at least one link references it.

use crate::{Direction, GraphError, Port, PortId, ProjectSettings, Step, StepId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type LinkId = Uuid;

/// One side of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub step_id: StepId,
    pub port_id: PortId,
}

/// Directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub source: Endpoint,
    pub target: Endpoint,
}

#[derive(Debug, Default)]
pub struct FlowGraph {
    steps: IndexMap<StepId, Step>,
    links: IndexMap<LinkId, Link>,
    port_owners: HashMap<PortId, StepId>,
    settings: ProjectSettings,
    retired: bool,
}

impl FlowGraph {
    pub fn new(settings: ProjectSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn add_step(&mut self, step: Step) -> Result<StepId, GraphError> {
        let id = step.id();
        if self.steps.contains_key(&id) {
            return Err(GraphError::DuplicateId(id));
        }
        if let Some(port) = step.ports().iter().find(|p| self.port_owners.contains_key(&p.id())) {
            return Err(GraphError::DuplicateId(port.id()));
        }

        for port in step.ports() {
            self.port_owners.insert(port.id(), id);
        }
        self.steps.insert(id, step);
        Ok(id)
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.get_mut(&id)
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn port_owner(&self, port_id: PortId) -> Option<StepId> {
        self.port_owners.get(&port_id).copied()
    }

    pub fn port(&self, port_id: PortId) -> Option<(&Step, &Port)> {
        let step = self.steps.get(&self.port_owner(port_id)?)?;
        step.port(port_id).map(|port| (step, port))
    }

    pub fn port_mut(&mut self, port_id: PortId) -> Option<&mut Port> {
        let owner = self.port_owner(port_id)?;
        self.steps.get_mut(&owner)?.port_mut(port_id)
    }

    /// Links whose target is one of `step_id`'s input ports.
    pub fn incoming_links(&self, step_id: StepId) -> impl Iterator<Item = &Link> {
        self.links.values().filter(move |l| l.target.step_id == step_id)
    }

    /// Validates a prospective link and returns its endpoints.
    ///
    /// Checks run in a fixed order: resolvability, direction, brand
    /// compatibility, distinct steps, then duplicates.
    pub fn validate_link(&self, source: PortId, target: PortId) -> Result<(Endpoint, Endpoint), GraphError> {
        let (source_step, source_port) = self.port(source).ok_or(GraphError::PortNotFound(source))?;
        let (target_step, target_port) = self.port(target).ok_or(GraphError::PortNotFound(target))?;

        if source_port.direction() != Direction::Output || target_port.direction() != Direction::Input {
            return Err(GraphError::DirectionMismatch {
                from: source_port.direction(),
                to: target_port.direction(),
            });
        }

        if !source_port.brand().converts_to(target_port.brand()) {
            return Err(GraphError::IncompatibleBrands {
                from: source_port.brand(),
                to: target_port.brand(),
            });
        }

        if source_step.id() == target_step.id() {
            return Err(GraphError::SameStep(source_step.id()));
        }

        let duplicate = source_port
            .links()
            .filter_map(|id| self.links.get(&id))
            .any(|l| l.target.port_id == target);
        if duplicate {
            return Err(GraphError::DuplicateLink { from: source, to: target });
        }

        Ok((
            Endpoint {
                step_id: source_step.id(),
                port_id: source,
            },
            Endpoint {
                step_id: target_step.id(),
                port_id: target,
            },
        ))
    }

    /// Validates and creates a link between two ports.
    pub fn link_ports(&mut self, source: PortId, target: PortId) -> Result<Link, GraphError> {
        let (source, target) = self.validate_link(source, target)?;
        Ok(self.wire(Uuid::new_v4(), source, target))
    }

    /// Wires a link without compatibility checks. Both ports must exist.
    pub fn connect(&mut self, id: LinkId, source: PortId, target: PortId) -> Result<Link, GraphError> {
        if self.links.contains_key(&id) {
            return Err(GraphError::DuplicateId(id));
        }
        let source = Endpoint {
            step_id: self.port_owner(source).ok_or(GraphError::PortNotFound(source))?,
            port_id: source,
        };
        let target = Endpoint {
            step_id: self.port_owner(target).ok_or(GraphError::PortNotFound(target))?,
            port_id: target,
        };
        Ok(self.wire(id, source, target))
    }

    fn wire(&mut self, id: LinkId, source: Endpoint, target: Endpoint) -> Link {
        let link = Link { id, source, target };
        if let Some(port) = self.port_mut(source.port_id) {
            port.attach(id);
        }
        if let Some(port) = self.port_mut(target.port_id) {
            port.attach(id);
        }
        self.links.insert(id, link.clone());
        link
    }

    /// Removes a link. Returns `None` when the link is already gone.
    pub fn unlink(&mut self, id: LinkId) -> Option<Link> {
        let link = self.links.shift_remove(&id)?;
        if let Some(port) = self.port_mut(link.source.port_id) {
            port.detach(id);
        }
        if let Some(port) = self.port_mut(link.target.port_id) {
            port.detach(id);
        }
        Some(link)
    }

    /// Removes a step together with every link touching its ports.
    pub fn remove_step(&mut self, id: StepId) -> Result<(Step, Vec<Link>), GraphError> {
        let incident = self.steps.get(&id).ok_or(GraphError::StepNotFound(id))?.incident_links();
        let removed: Vec<Link> = incident.into_iter().filter_map(|l| self.unlink(l)).collect();

        let step = self.steps.shift_remove(&id).ok_or(GraphError::StepNotFound(id))?;
        for port in step.ports() {
            self.port_owners.remove(&port.id());
        }
        Ok((step, removed))
    }

    /// True once the graph has been drained for disposal
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Empties the graph, handing back every step for disposal. The graph
    /// stays retired afterwards.
    pub fn drain_steps(&mut self) -> Vec<Step> {
        self.retired = true;
        self.links.clear();
        self.port_owners.clear();
        let mut steps: Vec<Step> = self.steps.drain(..).map(|(_, s)| s).collect();
        for step in &mut steps {
            for port in step.ports_mut() {
                let ids: Vec<LinkId> = port.links().collect();
                for id in ids {
                    port.detach(id);
                }
            }
        }
        steps
    }
}
