#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{
    Direction, EngineState, FlowEvent, ImageBuffer, PortId, PortSpec, PortValue, ProjectRecord, RunMetadata,
    StepBody, StepContext, StepError, StepOutput, TemplateId, TemplateIdentity,
};
use flowruntime::{FlowHost, HostConfig, PluginRegistry, ServiceProvider, StepTemplate, StepView};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const ORIGIN: &str = "tests";

/// Counts lifecycle calls across every step body of a test
#[derive(Default)]
pub struct Recorder {
    pub prepared: AtomicUsize,
    pub runs: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl Recorder {
    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// Emits its `value` input on `out`
pub struct SourceBody {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl StepBody for SourceBody {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input("value", 0.0), PortSpec::output("out", 0.0)]
    }

    async fn prepare(&self, _ctx: &StepContext) -> Result<(), StepError> {
        self.recorder.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        self.recorder.runs.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutput::new().with_output("out", ctx.input_f64("value")?))
    }

    async fn shutdown(&self) -> Result<(), StepError> {
        self.recorder.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Copies `in` to `seen`
pub struct SinkBody {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl StepBody for SinkBody {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input("in", 0.0), PortSpec::output("seen", 0.0)]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        self.recorder.runs.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutput::new().with_output("seen", ctx.input_f64("in")?))
    }

    async fn shutdown(&self) -> Result<(), StepError> {
        self.recorder.shutdowns.fetch_add(1, Ordering::SeqCst);
        Err(StepError::ExecutionFailed("sink refuses to shut down".to_string()))
    }
}

pub struct AddBody;

#[async_trait]
impl StepBody for AddBody {
    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input("a", 0.0),
            PortSpec::input("b", 0.0),
            PortSpec::output("sum", 0.0),
        ]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::new().with_output("sum", ctx.input_f64("a")? + ctx.input_f64("b")?))
    }
}

pub struct FailingBody;

#[async_trait]
impl StepBody for FailingBody {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input("in", 0.0)]
    }

    async fn run(&self, _ctx: StepContext) -> Result<StepOutput, StepError> {
        Err(StepError::ExecutionFailed("boom".to_string()))
    }
}

/// Waits `delay_ms`, giving up when the run is aborted
pub struct SlowBody;

#[async_trait]
impl StepBody for SlowBody {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input("delay_ms", 50.0)]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let delay = Duration::from_millis(ctx.input_f64("delay_ms")? as u64);
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(StepOutput::new()),
            _ = ctx.cancellation.cancelled() => Err(StepError::Cancelled),
        }
    }
}

pub struct ImageSourceBody;

#[async_trait]
impl StepBody for ImageSourceBody {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output("image", PortValue::Image(None))]
    }

    async fn run(&self, _ctx: StepContext) -> Result<StepOutput, StepError> {
        let image = ImageBuffer::from_fn(64, 32, |x, y| (x ^ y) as u8);
        Ok(StepOutput::new().with_output("image", image))
    }
}

pub struct ImageSinkBody;

#[async_trait]
impl StepBody for ImageSinkBody {
    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input("image", PortValue::Image(None))]
    }

    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        ctx.input_image("image")?;
        Ok(StepOutput::new())
    }
}

fn source(recorder: Arc<Recorder>) -> Arc<dyn StepBody> {
    Arc::new(SourceBody { recorder })
}

fn sink(recorder: Arc<Recorder>) -> Arc<dyn StepBody> {
    Arc::new(SinkBody { recorder })
}

fn adder(_: Arc<Recorder>) -> Arc<dyn StepBody> {
    Arc::new(AddBody)
}

fn failing(_: Arc<Recorder>) -> Arc<dyn StepBody> {
    Arc::new(FailingBody)
}

fn slow(_: Arc<Recorder>) -> Arc<dyn StepBody> {
    Arc::new(SlowBody)
}

fn image_source(_: Arc<Recorder>) -> Arc<dyn StepBody> {
    Arc::new(ImageSourceBody)
}

fn image_sink(_: Arc<Recorder>) -> Arc<dyn StepBody> {
    Arc::new(ImageSinkBody)
}

/// Template whose bodies receive the [`Recorder`] service
pub struct TestTemplate {
    pub name: &'static str,
    make: fn(Arc<Recorder>) -> Arc<dyn StepBody>,
}

impl TestTemplate {
    pub fn source() -> Self {
        Self {
            name: "test.source",
            make: source,
        }
    }
}

impl StepTemplate for TestTemplate {
    fn identity(&self) -> TemplateIdentity {
        TemplateIdentity::new(self.name, ORIGIN)
    }

    fn create(&self, services: &ServiceProvider) -> Result<Arc<dyn StepBody>, StepError> {
        Ok((self.make)(services.require::<Recorder>()?))
    }
}

pub struct Templates {
    pub source: TemplateId,
    pub sink: TemplateId,
    pub adder: TemplateId,
    pub failing: TemplateId,
    pub slow: TemplateId,
    pub image_source: TemplateId,
    pub image_sink: TemplateId,
}

pub fn registry(recorder: Arc<Recorder>) -> (PluginRegistry, Templates) {
    let mut registry = PluginRegistry::new();
    registry.services_mut().insert(recorder);

    let mut register = |name: &'static str, make: fn(Arc<Recorder>) -> Arc<dyn StepBody>| {
        registry.register(Arc::new(TestTemplate { name, make }))
    };
    let templates = Templates {
        source: register("test.source", source),
        sink: register("test.sink", sink),
        adder: register("test.add", adder),
        failing: register("test.failing", failing),
        slow: register("test.slow", slow),
        image_source: register("test.image_source", image_source),
        image_sink: register("test.image_sink", image_sink),
    };
    (registry, templates)
}

/// Routes engine logs to the test harness; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("flowruntime=debug")
        .try_init();
}

pub fn fast_config() -> HostConfig {
    HostConfig {
        cache_ttl_ms: 200,
        sweep_interval_ms: 20,
        export_chunk_size: 512,
        thumbnail_edge: 16,
        ..HostConfig::default()
    }
}

pub struct Fixture {
    pub host: FlowHost,
    pub templates: Templates,
    pub recorder: Arc<Recorder>,
}

/// Host with an empty draft project already active
pub async fn fixture() -> Fixture {
    fixture_with(fast_config()).await
}

pub async fn fixture_with(config: HostConfig) -> Fixture {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let (registry, templates) = registry(recorder.clone());
    let host = FlowHost::new(Arc::new(registry), config);
    host.activate_project(&ProjectRecord::new("test project"))
        .await
        .expect("activate empty project");
    Fixture { host, templates, recorder }
}

pub fn port_id(view: &StepView, name: &str, direction: Direction) -> PortId {
    view.ports
        .iter()
        .find(|p| p.name == name && p.direction == direction)
        .map(|p| p.port_id)
        .expect("port exists")
}

pub async fn wait_for_status(host: &FlowHost, predicate: impl Fn(&RunMetadata) -> bool) -> RunMetadata {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(status) = host.get_status().await {
                if predicate(&status) {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for run status")
}

pub async fn wait_for_state(host: &FlowHost, state: EngineState) -> RunMetadata {
    wait_for_status(host, |s| s.state == state).await
}

pub async fn wait_for_event(
    events: &mut broadcast::Receiver<FlowEvent>,
    predicate: impl Fn(&FlowEvent) -> bool,
) -> FlowEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
