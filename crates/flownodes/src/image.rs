use crate::device::SimulatedCameraConfig;
use crate::identity;
use async_trait::async_trait;
use flowcore::{
    ImageBuffer, PortSpec, PortValue, Rect, StepBody, StepContext, StepError, StepOutput, TemplateIdentity,
};
use flowruntime::{ServiceProvider, StepTemplate, TemplateMetadata};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Produces a synthetic grayscale gradient that shifts with every frame
pub struct AcquireStep {
    frame: AtomicU64,
    width: u32,
    height: u32,
}

#[async_trait]
impl StepBody for AcquireStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input("width", self.width as f64),
            PortSpec::input("height", self.height as f64),
            PortSpec::output("image", PortValue::Image(None)),
            PortSpec::output("frame", 0.0),
        ]
    }

    async fn prepare(&self, _ctx: &StepContext) -> Result<(), StepError> {
        self.frame.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let width = ctx.input_f64("width")?.max(1.0) as u32;
        let height = ctx.input_f64("height")?.max(1.0) as u32;
        let frame = self.frame.fetch_add(1, Ordering::SeqCst) + 1;

        let image = ImageBuffer::from_fn(width, height, |x, y| {
            ((x as u64 + y as u64) * 4 + frame) as u8
        });
        ctx.events.progress(100.0, Some(format!("Acquired frame {}", frame)));

        Ok(StepOutput::new()
            .with_output("image", image)
            .with_output("frame", frame as f64))
    }
}

/// Binarizes an image at `level`
pub struct ThresholdStep;

#[async_trait]
impl StepBody for ThresholdStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input("image", PortValue::Image(None)),
            PortSpec::input("level", 128.0),
            PortSpec::output("image", PortValue::Image(None)),
        ]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let image = ctx.input_image("image")?;
        let requested = ctx.input_f64("level")?;
        let level = requested.clamp(0.0, 255.0);
        if level != requested {
            ctx.events.warn(format!("Level {} clamped to {}", requested, level));
        }
        let level = level as u8;

        let binary = image.map_pixels(|p| if p >= level { 255 } else { 0 });
        Ok(StepOutput::new().with_output("image", binary))
    }
}

pub struct CropStep;

#[async_trait]
impl StepBody for CropStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input("image", PortValue::Image(None)),
            PortSpec::input(
                "region",
                Rect {
                    x: 0.0,
                    y: 0.0,
                    width: 16.0,
                    height: 16.0,
                },
            ),
            PortSpec::output("image", PortValue::Image(None)),
        ]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let image = ctx.input_image("image")?;
        let region = ctx
            .require_input("region")?
            .as_rect()
            .ok_or_else(|| StepError::MissingInput("region".to_string()))?;

        let cropped = image
            .crop(region)
            .map_err(|e| StepError::ExecutionFailed(e.to_string()))?;
        Ok(StepOutput::new().with_output("image", cropped))
    }
}

pub struct AcquireTemplate;

impl StepTemplate for AcquireTemplate {
    fn identity(&self) -> TemplateIdentity {
        identity("image.acquire")
    }

    fn create(&self, services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError> {
        let config = services
            .get::<SimulatedCameraConfig>()
            .map(|c| (*c).clone())
            .unwrap_or_default();

        Ok(Arc::new(AcquireStep {
            frame: AtomicU64::new(0),
            width: config.width,
            height: config.height,
        }))
    }

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata {
            description: "Acquires a frame from the simulated camera".to_string(),
            category: "image".to_string(),
        }
    }
}

pub struct ThresholdTemplate;

impl StepTemplate for ThresholdTemplate {
    fn identity(&self) -> TemplateIdentity {
        identity("image.threshold")
    }

    fn create(&self, _services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError> {
        Ok(Arc::new(ThresholdStep))
    }

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata {
            description: "Binarizes an image".to_string(),
            category: "image".to_string(),
        }
    }
}

pub struct CropTemplate;

impl StepTemplate for CropTemplate {
    fn identity(&self) -> TemplateIdentity {
        identity("image.crop")
    }

    fn create(&self, _services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError> {
        Ok(Arc::new(CropStep))
    }

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata {
            description: "Crops an image to a rectangle".to_string(),
            category: "image".to_string(),
        }
    }
}
