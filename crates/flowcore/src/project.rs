use crate::{Brand, Direction, LinkId, PortId, Position, StepId, TemplateId, TemplateIdentity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProjectId = Uuid;

/// Persisted project definition, as supplied by the storage collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: ProjectState,
    #[serde(default)]
    pub settings: ProjectSettings,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}

impl ProjectRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            state: ProjectState::default(),
            settings: ProjectSettings::default(),
            steps: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: StepRecord) -> StepId {
        let id = step.id;
        self.steps.push(step);
        id
    }

    pub fn link(&mut self, source_port: PortId, target_port: PortId) -> LinkId {
        let id = Uuid::new_v4();
        self.links.push(LinkRecord {
            id,
            source_port,
            target_port,
        });
        id
    }
}

/// Lifecycle of a stored project. Only gates whether a run may start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    #[default]
    Draft,
    Ready,
    Archived,
}

impl ProjectState {
    pub fn is_runnable(self) -> bool {
        matches!(self, ProjectState::Draft | ProjectState::Ready)
    }
}

/// Graph-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Send iteration notices to outward notifiers too, not only to local subscribers
    #[serde(default)]
    pub force_external_communication: bool,
    /// Overrides the host's parallel step limit for this project
    #[serde(default)]
    pub max_parallel_steps: Option<usize>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            force_external_communication: false,
            max_parallel_steps: None,
        }
    }
}

/// Stored form of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: StepId,
    pub name: Option<String>,
    pub template: TemplateIdentity,
    /// Template id at save time; only a hint, ids change between hosts
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub ports: Vec<PortRecord>,
}

impl StepRecord {
    pub fn new(template: TemplateIdentity) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            template,
            template_id: None,
            position: Position::default(),
            ports: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn with_port(mut self, port: PortRecord) -> Self {
        self.ports.push(port);
        self
    }

    pub fn port(&self, name: &str, direction: Direction) -> Option<&PortRecord> {
        self.ports
            .iter()
            .find(|p| p.name == name && p.direction == direction)
    }
}

/// Stored port value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRecord {
    pub id: PortId,
    pub name: String,
    pub direction: Direction,
    pub brand: Brand,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl PortRecord {
    pub fn input(name: impl Into<String>, brand: Brand, value: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            direction: Direction::Input,
            brand,
            value,
        }
    }

    pub fn output(name: impl Into<String>, brand: Brand) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            direction: Direction::Output,
            brand,
            value: serde_json::Value::Null,
        }
    }
}

/// Stored link between two port records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: LinkId,
    pub source_port: PortId,
    pub target_port: PortId,
}
