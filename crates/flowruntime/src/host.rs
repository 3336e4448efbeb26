use crate::cache::IterationCache;
use crate::editor::FlowEditor;
use crate::engine::{Engine, EngineEvent};
use crate::inspector::FlowInspector;
use crate::materializer::{MaterializeReport, Materializer};
use crate::registry::PluginRegistry;
use crate::SharedGraph;
use flowcore::{
    EventBus, FlowError, FlowEvent, LifecycleError, ProjectId, ProjectRecord, ProjectState, RunMetadata, RunMode,
    RunNotice, RunNotifier,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Configuration for the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Lifetime of an iteration cache entry, from creation
    pub cache_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    pub event_buffer_size: usize,
    /// Upper bound on steps executing at once within an iteration
    pub max_parallel_steps: usize,
    /// Largest chunk emitted by an image export, in bytes
    pub export_chunk_size: usize,
    pub thumbnail_edge: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
            sweep_interval_ms: 1_000,
            event_buffer_size: 1000,
            max_parallel_steps: 10,
            export_chunk_size: 64 * 1024,
            thumbnail_edge: 160,
        }
    }
}

impl HostConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Identity of the active project
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    pub state: ProjectState,
    pub steps: usize,
    pub links: usize,
}

struct ActiveProject {
    id: ProjectId,
    name: String,
    state: ProjectState,
    max_parallel: Option<usize>,
    force_external: bool,
    graph: SharedGraph,
}

#[derive(Default)]
struct HostState {
    project: Option<ActiveProject>,
    run: Option<Arc<Engine>>,
}

/// Fan-out of run notices: the local bus inline, outward notifiers through
/// per-notifier queues drained by their own tasks.
#[derive(Clone)]
struct NoticeFanout {
    bus: Arc<EventBus>,
    outward: Vec<mpsc::UnboundedSender<RunNotice>>,
}

impl NoticeFanout {
    async fn publish(&self, notice: RunNotice, outward: bool) {
        if let Err(e) = self.bus.publish(&notice).await {
            tracing::error!("Failed to publish run notice locally: {}", e);
        }
        if !outward {
            return;
        }
        for queue in &self.outward {
            if queue.send(notice.clone()).is_err() {
                tracing::warn!("Outward notifier queue closed, dropping run notice");
            }
        }
    }
}

/// Drains one notifier's queue in order. Ends once every sender is gone.
fn spawn_forwarder(notifier: Arc<dyn RunNotifier>) -> mpsc::UnboundedSender<RunNotice> {
    let (queue, mut pending) = mpsc::unbounded_channel::<RunNotice>();
    tokio::spawn(async move {
        while let Some(notice) = pending.recv().await {
            if let Err(e) = notifier.publish(&notice).await {
                tracing::error!("Failed to publish run notice: {}", e);
            }
        }
    });
    queue
}

/// Owns the single active graph and its run lifecycle.
///
/// Lifecycle calls (activate, deactivate, start, stop, abort) are serialized
/// through one lock. Editing and reading go through [`FlowEditor`] and
/// [`FlowInspector`] handles that share the graph but not that lock.
///
/// Must be created inside a tokio runtime: the cache sweeper and notifier
/// forwarders are spawned as tasks.
pub struct FlowHost {
    registry: Arc<PluginRegistry>,
    config: HostConfig,
    bus: Arc<EventBus>,
    outward: Vec<mpsc::UnboundedSender<RunNotice>>,
    cache: Arc<IterationCache>,
    sweeper: JoinHandle<()>,
    state: Mutex<HostState>,
}

impl FlowHost {
    pub fn new(registry: Arc<PluginRegistry>, config: HostConfig) -> Self {
        let bus = Arc::new(EventBus::new(config.event_buffer_size));
        let cache = Arc::new(IterationCache::new(config.cache_ttl()));
        let sweeper = cache.spawn_sweeper(config.sweep_interval());

        Self {
            registry,
            outward: Vec::new(),
            bus,
            cache,
            sweeper,
            config,
            state: Mutex::new(HostState::default()),
        }
    }

    /// Adds an outward notifier receiving run status and iteration notices.
    ///
    /// A slow or failing notifier only delays its own queue; cache fills
    /// and the local bus do not wait on it.
    pub fn with_notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
        self.outward.push(spawn_forwarder(notifier));
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<IterationCache> {
        &self.cache
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FlowEvent> {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Materializes `record` and makes it the active graph, replacing any
    /// previously active project.
    pub async fn activate_project(&self, record: &ProjectRecord) -> Result<MaterializeReport, FlowError> {
        let (graph, report) = Materializer::new(&self.registry).materialize(record);

        let mut state = self.state.lock().await;
        self.teardown(&mut state).await;

        tracing::info!(
            "Activated project {} ({}) with {} steps and {} links",
            record.name,
            record.id,
            graph.step_count(),
            graph.link_count()
        );
        if !report.is_clean() {
            tracing::warn!(
                "Project {} materialized partially: {} steps, {} links, {} values skipped",
                record.id,
                report.skipped_steps.len(),
                report.skipped_links.len(),
                report.rejected_values.len()
            );
        }

        state.project = Some(ActiveProject {
            id: record.id,
            name: record.name.clone(),
            state: record.state,
            max_parallel: record.settings.max_parallel_steps,
            force_external: record.settings.force_external_communication,
            graph: Arc::new(RwLock::new(graph)),
        });
        Ok(report)
    }

    /// Disposes the current engine and every step of the active graph.
    pub async fn deactivate_project(&self) -> Result<(), FlowError> {
        let mut state = self.state.lock().await;
        if state.project.is_none() {
            return Err(FlowError::NoActiveProject);
        }
        self.teardown(&mut state).await;
        Ok(())
    }

    async fn teardown(&self, state: &mut HostState) {
        if let Some(engine) = state.run.take() {
            engine.dispose();
        }

        let Some(project) = state.project.take() else {
            return;
        };
        let steps = project.graph.write().await.drain_steps();
        for step in steps {
            if let Err(e) = step.body().shutdown().await {
                tracing::error!("Failed to dispose step {}: {}", step.id(), e);
            }
        }
        self.cache.clear();
        tracing::info!("Deactivated project {} ({})", project.name, project.id);
    }

    pub async fn project(&self) -> Option<ProjectSummary> {
        let state = self.state.lock().await;
        let project = state.project.as_ref()?;
        let graph = project.graph.read().await;
        Some(ProjectSummary {
            id: project.id,
            name: project.name.clone(),
            state: project.state,
            steps: graph.step_count(),
            links: graph.link_count(),
        })
    }

    pub async fn editor(&self) -> Result<FlowEditor, FlowError> {
        let graph = self.active_graph().await?;
        Ok(FlowEditor::new(graph, self.registry.clone(), self.bus.clone()))
    }

    pub async fn inspector(&self) -> Result<FlowInspector, FlowError> {
        let graph = self.active_graph().await?;
        Ok(FlowInspector::new(
            graph,
            self.cache.clone(),
            self.config.export_chunk_size,
            self.config.thumbnail_edge,
        ))
    }

    async fn active_graph(&self) -> Result<SharedGraph, FlowError> {
        let state = self.state.lock().await;
        state
            .project
            .as_ref()
            .map(|p| p.graph.clone())
            .ok_or(FlowError::NoActiveProject)
    }

    /// Starts a new run on the active graph, disposing the previous engine.
    pub async fn start_run(&self, mode: RunMode) -> Result<RunMetadata, FlowError> {
        let mut state = self.state.lock().await;

        let project = state.project.as_ref().ok_or(FlowError::NoActiveProject)?;
        if !project.state.is_runnable() {
            return Err(LifecycleError::ProjectNotRunnable(project.state).into());
        }
        let graph = project.graph.clone();
        let max_parallel = project.max_parallel.unwrap_or(self.config.max_parallel_steps);
        let force_external = project.force_external;

        if let Some(engine) = &state.run {
            let current = engine.state();
            if current.is_busy() {
                return Err(LifecycleError::InvalidTransition {
                    action: "start",
                    state: current,
                }
                .into());
            }
        }
        if let Some(previous) = state.run.take() {
            previous.dispose();
        }

        let (engine, events) = Engine::new(graph.clone(), self.bus.clone(), mode, max_parallel);
        let engine = Arc::new(engine);
        let fanout = NoticeFanout {
            bus: self.bus.clone(),
            outward: self.outward.clone(),
        };
        // Detached: it ends on the run's terminal state, so a replaced run
        // still gets its last cache fills and notices
        tokio::spawn(relay_engine_events(events, fanout, self.cache.clone(), graph, force_external));
        engine.request_start()?;

        let status = engine.status();
        tracing::info!("Started run {} in {:?} mode", status.run_id, mode);
        state.run = Some(engine);
        Ok(status)
    }

    pub async fn stop_run(&self) -> Result<(), FlowError> {
        let state = self.state.lock().await;
        let engine = state.run.as_ref().ok_or(LifecycleError::NoEngine)?;
        engine.request_stop()?;
        Ok(())
    }

    pub async fn abort_run(&self) -> Result<(), FlowError> {
        let state = self.state.lock().await;
        let engine = state.run.as_ref().ok_or(LifecycleError::NoEngine)?;
        engine.request_abort()?;
        Ok(())
    }

    /// Current run metadata, or `None` before the first run
    pub async fn get_status(&self) -> Option<RunMetadata> {
        let state = self.state.lock().await;
        state.run.as_ref().map(|engine| engine.status())
    }

    /// Waits until the current run loop exits
    pub async fn wait_for_run(&self) {
        let engine = {
            let state = self.state.lock().await;
            state.run.clone()
        };
        if let Some(engine) = engine {
            engine.join().await;
        }
    }
}

impl Drop for FlowHost {
    fn drop(&mut self) {
        self.cache.shutdown();
        self.sweeper.abort();
    }
}

/// Forwards engine events: status changes go to every notifier, completed
/// iterations fill the cache before the notice goes out.
///
/// Iteration notices reach outward notifiers only when the project forces
/// external communication; the local bus always gets them.
async fn relay_engine_events(
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    fanout: NoticeFanout,
    cache: Arc<IterationCache>,
    graph: SharedGraph,
    force_external: bool,
) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::StateChanged(status) => {
                let terminal = status.state.is_terminal();
                fanout.publish(RunNotice::Status { status }, true).await;
                if terminal {
                    break;
                }
            }
            EngineEvent::IterationCompleted(notice) => {
                cache.create_cache(notice.iteration_id, &graph).await;
                fanout
                    .publish(RunNotice::IterationFinished { notice }, force_external)
                    .await;
            }
        }
    }
}
