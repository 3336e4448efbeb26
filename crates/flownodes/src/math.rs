use crate::identity;
use async_trait::async_trait;
use flowcore::{PortSpec, StepBody, StepContext, StepError, StepOutput, TemplateIdentity};
use flowruntime::{ServiceProvider, StepTemplate, TemplateMetadata};
use std::sync::Arc;

/// Emits the value set on its `value` input
pub struct ConstantStep;

#[async_trait]
impl StepBody for ConstantStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input("value", 0.0), PortSpec::output("value", 0.0)]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::new().with_output("value", ctx.input_f64("value")?))
    }
}

pub struct AddStep;

#[async_trait]
impl StepBody for AddStep {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input("a", 0.0),
            PortSpec::input("b", 0.0),
            PortSpec::output("sum", 0.0),
        ]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let sum = ctx.input_f64("a")? + ctx.input_f64("b")?;
        Ok(StepOutput::new().with_output("sum", sum))
    }
}

pub struct ConstantTemplate;

impl StepTemplate for ConstantTemplate {
    fn identity(&self) -> TemplateIdentity {
        identity("math.constant")
    }

    fn create(&self, _services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError> {
        Ok(Arc::new(ConstantStep))
    }

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata {
            description: "Outputs a fixed number".to_string(),
            category: "math".to_string(),
        }
    }
}

pub struct AddTemplate;

impl StepTemplate for AddTemplate {
    fn identity(&self) -> TemplateIdentity {
        identity("math.add")
    }

    fn create(&self, _services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError> {
        Ok(Arc::new(AddStep))
    }

    fn metadata(&self) -> TemplateMetadata {
        TemplateMetadata {
            description: "Adds two numbers".to_string(),
            category: "math".to_string(),
        }
    }
}
