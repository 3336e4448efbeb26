use crate::identity;
use async_trait::async_trait;
use flowcore::{PortSpec, StepBody, StepContext, StepError, StepOutput, TemplateIdentity};
use flowruntime::{ServiceProvider, StepTemplate, TemplateMetadata};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Delays for `delay_ms`, then passes `value` through.
///
/// The wait ends early with [`StepError::Cancelled`] when the run is aborted.
pub struct DelayStep;

#[async_trait]
impl StepBody for DelayStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input("delay_ms", 1000.0),
            PortSpec::input("value", 0.0),
            PortSpec::output("value", 0.0),
        ]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let delay_ms = ctx.input_f64("delay_ms")?.max(0.0) as u64;
        let value = ctx.input_f64("value")?;

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(StepError::Cancelled),
        }

        Ok(StepOutput::new().with_output("value", value))
    }
}

pub struct DelayTemplate;

impl StepTemplate for DelayTemplate {
    fn identity(&self) -> TemplateIdentity {
        identity("time.delay")
    }

    fn create(&self, _services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError> {
        Ok(Arc::new(DelayStep))
    }

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
