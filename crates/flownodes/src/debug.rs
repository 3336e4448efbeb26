use crate::identity;
use async_trait::async_trait;
use flowcore::{PortSpec, StepBody, StepContext, StepError, StepOutput, TemplateIdentity};
use flowruntime::{ServiceProvider, StepTemplate, TemplateMetadata};
use std::sync::Arc;

/// Simple debug step that logs its input
pub struct DebugStep;

#[async_trait]
impl StepBody for DebugStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input("message", ""), PortSpec::output("message", "")]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let message = ctx
            .inputs
            .get("message")
            .and_then(|v| v.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(step_id = %ctx.step_id, "DEBUG: {}", message);
        ctx.events.info(format!("DEBUG: {}", message));

        Ok(StepOutput::new().with_output("message", message))
    }
}

pub struct DebugTemplate;

impl StepTemplate for DebugTemplate {
    fn identity(&self) -> TemplateIdentity {
        identity("debug.log")
    }

    fn create(&self, _services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError> {
        Ok(Arc::new(DebugStep))
    }

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata {
            description: "Logs its input message".to_string(),
            category: "debug".to_string(),
        }
    }
}
