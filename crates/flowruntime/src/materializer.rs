//! Turns a stored project into a live graph.
//!
//! Best effort: steps whose template cannot be resolved and links with a
//! dangling endpoint are skipped and logged, the rest of the graph loads.

use crate::registry::PluginRegistry;
use flowcore::{FlowGraph, LinkId, LinkRecord, PortId, ProjectRecord, Step, StepId, StepRecord};
use serde::Serialize;
use std::collections::HashSet;

/// What was left out while materializing, and why
#[derive(Debug, Default, Clone, Serialize)]
pub struct MaterializeReport {
    pub skipped_steps: Vec<(StepId, String)>,
    pub skipped_links: Vec<(LinkId, String)>,
    pub rejected_values: Vec<(PortId, String)>,
}

impl MaterializeReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_steps.is_empty() && self.skipped_links.is_empty() && self.rejected_values.is_empty()
    }
}

pub struct Materializer<'a> {
    registry: &'a PluginRegistry,
}

impl<'a> Materializer<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    pub fn materialize(&self, record: &ProjectRecord) -> (FlowGraph, MaterializeReport) {
        let mut graph = FlowGraph::new(record.settings.clone());
        let mut report = MaterializeReport::default();

        for step_record in &record.steps {
            let step = match self.convert_step(step_record, &mut report) {
                Ok(step) => step,
                Err(reason) => {
                    tracing::error!("Skipping step {} ({}): {}", step_record.id, step_record.template, reason);
                    report.skipped_steps.push((step_record.id, reason));
                    continue;
                }
            };
            if let Err(e) = graph.add_step(step) {
                tracing::error!("Skipping step {}: {}", step_record.id, e);
                report.skipped_steps.push((step_record.id, e.to_string()));
            }
        }

        let mut seen = HashSet::new();
        let links: Vec<&LinkRecord> = record.links.iter().filter(|l| seen.insert(l.id)).collect();
        for link in links {
            // Persisted links were valid when saved; only resolvability is checked
            if let Err(e) = graph.connect(link.id, link.source_port, link.target_port) {
                tracing::error!("Skipping link {}: {}", link.id, e);
                report.skipped_links.push((link.id, e.to_string()));
            }
        }

        tracing::info!(
            "Materialized project {} with {} steps and {} links ({} steps, {} links skipped)",
            record.name,
            graph.step_count(),
            graph.link_count(),
            report.skipped_steps.len(),
            report.skipped_links.len()
        );
        (graph, report)
    }

    fn convert_step(&self, record: &StepRecord, report: &mut MaterializeReport) -> Result<Step, String> {
        let template = self
            .registry
            .resolve_identity(&record.template)
            .or_else(|| record.template_id.and_then(|id| self.registry.resolve(id)))
            .ok_or_else(|| format!("unknown template {}", record.template))?;

        let mut step = self
            .registry
            .instantiate_as(template.id, record.id)
            .map_err(|e| e.to_string())?;
        if let Some(name) = &record.name {
            step.set_name(name.clone());
        }
        step.set_position(record.position);

        let live_ports: Vec<(PortId, String, flowcore::Direction)> = step
            .ports()
            .iter()
            .map(|p| (p.id(), p.name().to_string(), p.direction()))
            .collect();

        for (port_id, name, direction) in live_ports {
            let Some(stored) = record.port(&name, direction) else {
                continue;
            };
            if !step.adopt_port_id(port_id, stored.id) {
                report
                    .rejected_values
                    .push((stored.id, format!("port id {} already used on step {}", stored.id, record.id)));
                continue;
            }
            if stored.value.is_null() {
                continue;
            }
            if let Some(port) = step.port_mut(stored.id) {
                if let Err(e) = port.set_raw(&stored.value) {
                    tracing::warn!("Keeping default for port {} on step {}: {}", name, record.id, e);
                    report.rejected_values.push((stored.id, e.to_string()));
                }
            }
        }

        Ok(step)
    }
}
