use flowcore::{EventBus, FlowEvent, ImageBuffer, PortValue, Rect, StepBody, StepContext, StepError, StepEvent};
use flownodes::{
    register_all, AddStep, ConstantStep, CropStep, DebugStep, DelayStep, SimulatedCameraConfig, ThresholdStep,
};
use flowruntime::PluginRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Helper function to create a test context
fn create_test_context(inputs: Vec<(&str, PortValue)>) -> StepContext {
    context_from_map(inputs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn context_from_map(inputs: HashMap<String, PortValue>) -> StepContext {
    let event_bus = Arc::new(EventBus::new(100));
    let iteration_id = Uuid::new_v4();
    let step_id = Uuid::new_v4();

    StepContext {
        step_id,
        iteration_id,
        inputs,
        events: event_bus.create_emitter(iteration_id, step_id),
        cancellation: CancellationToken::new(),
    }
}

#[tokio::test]
async fn test_add_step_sums_inputs() {
    let ctx = create_test_context(vec![("a", PortValue::Numeric(2.0)), ("b", PortValue::Numeric(40.0))]);

    let output = AddStep.run(ctx).await.unwrap();
    let sum = output.outputs.get("sum").and_then(|v| v.as_f64()).unwrap();
    assert_eq!(sum, 42.0);
}

#[tokio::test]
async fn test_add_step_rejects_wrong_brand() {
    let ctx = create_test_context(vec![("a", PortValue::from("two")), ("b", PortValue::Numeric(1.0))]);

    let result = AddStep.run(ctx).await;
    assert!(matches!(result, Err(StepError::InvalidInputType { .. })));
}

#[tokio::test]
async fn test_constant_step_echoes_value() {
    let ctx = create_test_context(vec![("value", PortValue::Numeric(7.5))]);

    let output = ConstantStep.run(ctx).await.unwrap();
    assert_eq!(output.outputs.get("value").and_then(|v| v.as_f64()), Some(7.5));
}

#[tokio::test]
async fn test_debug_step_defaults_empty_message() {
    let ctx = create_test_context(vec![("message", PortValue::from(""))]);

    let output = DebugStep.run(ctx).await.unwrap();
    assert_eq!(output.outputs.get("message").and_then(|v| v.as_str()), Some("(no message)"));
}

#[tokio::test]
async fn test_delay_step_cancelled_by_abort() {
    let ctx = create_test_context(vec![
        ("delay_ms", PortValue::Numeric(10_000.0)),
        ("value", PortValue::Numeric(1.0)),
    ]);
    let token = ctx.cancellation.clone();

    let handle = tokio::spawn(async move { DelayStep.run(ctx).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(StepError::Cancelled)));
}

#[tokio::test]
async fn test_threshold_binarizes() {
    let image = ImageBuffer::from_fn(4, 1, |x, _| (x * 80) as u8);
    let ctx = create_test_context(vec![("image", PortValue::from(image)), ("level", PortValue::Numeric(100.0))]);

    let output = ThresholdStep.run(ctx).await.unwrap();
    let result = output.outputs.get("image").and_then(|v| v.as_image()).unwrap();
    assert_eq!(result.pixels(), &[0, 0, 255, 255]);
}

#[tokio::test]
async fn test_threshold_warns_when_level_clamped() {
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let (iteration_id, step_id) = (Uuid::new_v4(), Uuid::new_v4());
    let image = ImageBuffer::from_fn(2, 1, |x, _| (x * 255) as u8);
    let ctx = StepContext {
        step_id,
        iteration_id,
        inputs: HashMap::from([
            ("image".to_string(), PortValue::from(image)),
            ("level".to_string(), PortValue::Numeric(300.0)),
        ]),
        events: bus.create_emitter(iteration_id, step_id),
        cancellation: CancellationToken::new(),
    };

    let output = ThresholdStep.run(ctx).await.unwrap();
    let result = output.outputs.get("image").and_then(|v| v.as_image()).unwrap();
    assert_eq!(result.pixels(), &[0, 255]);

    match events.try_recv().unwrap() {
        FlowEvent::StepLog { event: StepEvent::Warning { message }, step_id: from, .. } => {
            assert_eq!(from, step_id);
            assert!(message.contains("300"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_threshold_without_image_is_missing_input() {
    let ctx = create_test_context(vec![("image", PortValue::Image(None)), ("level", PortValue::Numeric(1.0))]);

    let result = ThresholdStep.run(ctx).await;
    assert!(matches!(result, Err(StepError::MissingInput(field)) if field == "image"));
}

#[tokio::test]
async fn test_crop_out_of_bounds_fails() {
    let image = ImageBuffer::from_fn(8, 8, |_, _| 1);
    let region = Rect {
        x: 4.0,
        y: 4.0,
        width: 8.0,
        height: 8.0,
    };
    let ctx = create_test_context(vec![("image", PortValue::from(image)), ("region", PortValue::from(region))]);

    let result = CropStep.run(ctx).await;
    assert!(matches!(result, Err(StepError::ExecutionFailed(_))));
}

#[tokio::test]
async fn test_crop_extracts_region() {
    let image = ImageBuffer::from_fn(8, 8, |x, y| (y * 8 + x) as u8);
    let region = Rect {
        x: 2.0,
        y: 1.0,
        width: 2.0,
        height: 2.0,
    };
    let ctx = create_test_context(vec![("image", PortValue::from(image)), ("region", PortValue::from(region))]);

    let output = CropStep.run(ctx).await.unwrap();
    let cropped = output.outputs.get("image").and_then(|v| v.as_image()).unwrap();
    assert_eq!((cropped.width(), cropped.height()), (2, 2));
    assert_eq!(cropped.pixels(), &[10, 11, 18, 19]);
}

#[tokio::test]
async fn test_register_all_lists_templates_and_devices() {
    let mut registry = PluginRegistry::new();
    registry.services_mut().insert(Arc::new(SimulatedCameraConfig {
        cameras: 3,
        width: 32,
        height: 24,
    }));
    register_all(&mut registry);

    let names: Vec<String> = registry
        .list_templates()
        .into_iter()
        .map(|t| t.identity.type_name)
        .collect();
    assert!(names.contains(&"math.add".to_string()));
    assert!(names.contains(&"image.acquire".to_string()));

    let providers = registry.list_device_providers();
    assert_eq!(providers.len(), 1);
    let cameras = registry.create_device_provider(providers[0].id).unwrap();
    assert_eq!(cameras.devices().len(), 3);
}

#[tokio::test]
async fn test_acquire_uses_injected_camera_size() {
    let mut registry = PluginRegistry::new();
    registry.services_mut().insert(Arc::new(SimulatedCameraConfig {
        cameras: 1,
        width: 10,
        height: 6,
    }));
    register_all(&mut registry);

    let template = registry
        .list_templates()
        .into_iter()
        .find(|t| t.identity.type_name == "image.acquire")
        .unwrap();
    let step = registry.instantiate(template.id).unwrap();
    let width = step
        .port_named("width", flowcore::Direction::Input)
        .and_then(|p| p.value().as_f64());
    assert_eq!(width, Some(10.0));

    let ctx = context_from_map(step.input_values());
    let output = step.body().run(ctx).await.unwrap();
    let image = output.outputs.get("image").and_then(|v| v.as_image()).unwrap();
    assert_eq!((image.width(), image.height()), (10, 6));
    assert_eq!(output.outputs.get("frame").and_then(|v| v.as_f64()), Some(1.0));
}
