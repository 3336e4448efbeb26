use crate::identity;
use flowcore::{StepError, TemplateIdentity};
use flowruntime::{DeviceInfo, DeviceProvider, DeviceProviderTemplate, ServiceProvider, TemplateMetadata};
use std::sync::Arc;

/// Settings for the simulated camera, injected through the service provider
#[derive(Debug, Clone)]
pub struct SimulatedCameraConfig {
    pub cameras: usize,
    pub width: u32,
    pub height: u32,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            cameras: 1,
            width: 64,
            height: 48,
        }
    }
}

pub struct SimulatedCameraProvider {
    config: SimulatedCameraConfig,
}

impl DeviceProvider for SimulatedCameraProvider {
    fn devices(&self) -> Vec<DeviceInfo> {
        (0..self.config.cameras)
            .map(|i| DeviceInfo {
                id: format!("sim-cam-{}", i),
                name: format!("Simulated camera {} ({}x{})", i, self.config.width, self.config.height),
                kind: "camera".to_string(),
            })
            .collect()
    }
}

pub struct SimulatedCameraTemplate;

impl DeviceProviderTemplate for SimulatedCameraTemplate {
    fn identity(&self) -> TemplateIdentity {
        identity("device.simulated_camera")
    }

    fn create(&self, services: &ServiceProvider) -> Result<Arc<dyn DeviceProvider>, StepError> {
        let config = services
            .get::<SimulatedCameraConfig>()
            .map(|c| (*c).clone())
            .unwrap_or_default();
        Ok(Arc::new(SimulatedCameraProvider { config }))
    }

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata {
            description: "Lists simulated cameras".to_string(),
            category: "device".to_string(),
        }
    }
}
