//! Standard step library
//!
//! Built-in steps for numbers, images, logging and timing, plus a simulated
//! camera device provider.

mod debug;
mod device;
mod image;
mod math;
mod time;

pub use debug::DebugStep;
pub use device::{SimulatedCameraConfig, SimulatedCameraProvider};
pub use image::{AcquireStep, CropStep, ThresholdStep};
pub use math::{AddStep, ConstantStep};
pub use time::DelayStep;

use flowcore::TemplateIdentity;
use flowruntime::PluginRegistry;
use std::sync::Arc;

/// Origin recorded in the identity of every template in this crate
pub const ORIGIN: &str = "flownodes";

pub(crate) fn identity(type_name: &str) -> TemplateIdentity {
    TemplateIdentity::new(type_name, ORIGIN)
}

/// Register all standard templates with a registry
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register(Arc::new(math::ConstantTemplate));
    registry.register(Arc::new(math::AddTemplate));
    registry.register(Arc::new(debug::DebugTemplate));
    registry.register(Arc::new(time::DelayTemplate));
    registry.register(Arc::new(image::AcquireTemplate));
    registry.register(Arc::new(image::ThresholdTemplate));
    registry.register(Arc::new(image::CropTemplate));
    registry.register_device_provider(Arc::new(device::SimulatedCameraTemplate));
}
