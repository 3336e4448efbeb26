use crate::{Brand, ConversionError, LinkId, PortValue};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type PortId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Port declaration exposed by a step body.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: String,
    pub direction: Direction,
    pub default: PortValue,
}

impl PortSpec {
    pub fn input(name: impl Into<String>, default: impl Into<PortValue>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Input,
            default: default.into(),
        }
    }

    pub fn output(name: impl Into<String>, default: impl Into<PortValue>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Output,
            default: default.into(),
        }
    }

    pub fn brand(&self) -> Brand {
        self.default.brand()
    }
}

/// Typed value cell owned by a step.
///
/// The port only remembers which links reference it; the graph owns the links.
#[derive(Debug, Clone)]
pub struct Port {
    id: PortId,
    name: String,
    direction: Direction,
    brand: Brand,
    value: PortValue,
    links: IndexSet<LinkId>,
}

impl Port {
    pub fn new(spec: PortSpec) -> Self {
        Self::with_id(Uuid::new_v4(), spec)
    }

    pub fn with_id(id: PortId, spec: PortSpec) -> Self {
        Self {
            id,
            name: spec.name,
            direction: spec.direction,
            brand: spec.default.brand(),
            value: spec.default,
            links: IndexSet::new(),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn brand(&self) -> Brand {
        self.brand
    }

    pub fn value(&self) -> &PortValue {
        &self.value
    }

    pub fn is_connected(&self) -> bool {
        !self.links.is_empty()
    }

    pub fn links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.links.iter().copied()
    }

    /// Only connected inputs change mid-iteration, so only they are snapshotted.
    pub fn is_cacheable(&self) -> bool {
        self.direction == Direction::Input && self.is_connected()
    }

    /// Applies a raw value through this port's brand conversion.
    pub fn set_raw(&mut self, raw: &serde_json::Value) -> Result<(), ConversionError> {
        self.value = self.value.convert_from(raw)?;
        Ok(())
    }

    /// Stores a value produced by a step or received over a link.
    pub fn set_value(&mut self, value: &PortValue) -> Result<(), ConversionError> {
        self.value = self.value.assign_from(value)?;
        Ok(())
    }

    pub(crate) fn attach(&mut self, link: LinkId) {
        self.links.insert(link);
    }

    pub(crate) fn detach(&mut self, link: LinkId) {
        self.links.shift_remove(&link);
    }
}
