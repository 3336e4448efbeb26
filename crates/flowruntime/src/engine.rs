use crate::SharedGraph;
use chrono::Utc;
use flowcore::{
    Direction, EngineState, EventBus, FlowError, GraphError, IterationId, IterationNotice, LifecycleError, PortId,
    RunMetadata, RunMode, StepBody, StepContext, StepError, StepId, StepOutput,
};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Notifications raised by an engine while it runs
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged(RunMetadata),
    IterationCompleted(IterationNotice),
}

/// State shared between the engine handle and its run loop
struct EngineCore {
    status: Mutex<RunMetadata>,
    events: mpsc::UnboundedSender<EngineEvent>,
    stop: CancellationToken,
    abort: CancellationToken,
}

impl EngineCore {
    /// Applies `next` if the state machine allows it. The event is sent while
    /// the status lock is held so subscribers see transitions in order.
    fn transition(&self, next: EngineState) -> bool {
        let mut status = self.status.lock();
        self.transition_locked(&mut status, next)
    }

    fn transition_locked(&self, status: &mut RunMetadata, next: EngineState) -> bool {
        if !status.state.can_transition_to(next) {
            return false;
        }
        tracing::info!(run_id = %status.run_id, "Engine {} -> {}", status.state, next);
        status.apply_state(next);
        let _ = self.events.send(EngineEvent::StateChanged(status.clone()));
        true
    }

    /// Drives the state machine to a terminal state once the loop has ended.
    fn settle(&self, mode: RunMode) {
        let mut status = self.status.lock();
        loop {
            let next = match status.state {
                EngineState::Starting => EngineState::Aborting,
                EngineState::Running => {
                    let interrupted = self.abort.is_cancelled() || self.stop.is_cancelled();
                    if mode == RunMode::SinglePass && !interrupted {
                        EngineState::Finished
                    } else {
                        EngineState::Aborting
                    }
                }
                EngineState::Stopping => EngineState::Stopped,
                EngineState::Aborting => EngineState::Aborted,
                _ => break,
            };
            if !self.transition_locked(&mut status, next) {
                break;
            }
        }
    }

    fn fail(&self, error: &FlowError) {
        let mut status = self.status.lock();
        tracing::error!(run_id = %status.run_id, "Run failed: {}", error);
        status.last_error = Some(error.to_string());
        self.transition_locked(&mut status, EngineState::Aborting);
    }

    fn complete_iteration(&self, iteration_id: IterationId) {
        let notice = {
            let mut status = self.status.lock();
            status.iterations += 1;
            status.last_iteration = Some(iteration_id);
            IterationNotice {
                run_id: status.run_id,
                iteration_id,
                index: status.iterations,
                timestamp: Utc::now(),
            }
        };
        let _ = self.events.send(EngineEvent::IterationCompleted(notice));
    }
}

/// Execution plan for one iteration
struct IterationPlan {
    graph: DiGraph<StepId, ()>,
    index: HashMap<StepId, NodeIndex>,
    order: Vec<StepId>,
    bodies: HashMap<StepId, Arc<dyn StepBody>>,
}

/// Runs the active graph, one iteration at a time.
///
/// Stop and abort are cooperative: stop is observed between iterations,
/// abort between steps and through the token handed to step bodies. A step
/// body that never returns cannot be terminated from here.
pub struct Engine {
    core: Arc<EngineCore>,
    graph: SharedGraph,
    bus: Arc<EventBus>,
    mode: RunMode,
    max_parallel: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Creates an idle engine and the receiving end of its event queue.
    ///
    /// The queue is unbounded so a slow consumer delays events but never
    /// loses them.
    pub fn new(
        graph: SharedGraph,
        bus: Arc<EventBus>,
        mode: RunMode,
        max_parallel: usize,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let engine = Self {
            core: Arc::new(EngineCore {
                status: Mutex::new(RunMetadata::new(mode)),
                events,
                stop: CancellationToken::new(),
                abort: CancellationToken::new(),
            }),
            graph,
            bus,
            mode,
            max_parallel: max_parallel.max(1),
            task: Mutex::new(None),
        };
        (engine, receiver)
    }

    pub fn status(&self) -> RunMetadata {
        self.core.status.lock().clone()
    }

    pub fn state(&self) -> EngineState {
        self.core.status.lock().state
    }

    pub fn request_start(&self) -> Result<(), LifecycleError> {
        if !self.core.transition(EngineState::Starting) {
            return Err(LifecycleError::InvalidTransition {
                action: "start",
                state: self.state(),
            });
        }

        let handle = tokio::spawn(run_loop(
            self.core.clone(),
            self.graph.clone(),
            self.bus.clone(),
            self.mode,
            self.max_parallel,
        ));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    pub fn request_stop(&self) -> Result<(), LifecycleError> {
        if !self.core.transition(EngineState::Stopping) {
            return Err(LifecycleError::InvalidTransition {
                action: "stop",
                state: self.state(),
            });
        }
        self.core.stop.cancel();
        Ok(())
    }

    pub fn request_abort(&self) -> Result<(), LifecycleError> {
        if !self.core.transition(EngineState::Aborting) {
            return Err(LifecycleError::InvalidTransition {
                action: "abort",
                state: self.state(),
            });
        }
        self.core.abort.cancel();
        Ok(())
    }

    /// Waits for the run loop to exit. Returns immediately if it never started.
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Engine task ended abnormally: {}", e);
            }
        }
    }

    /// Signals the run loop to wind down and detaches from it.
    pub fn dispose(&self) {
        self.core.stop.cancel();
        self.core.abort.cancel();
        self.task.lock().take();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_loop(core: Arc<EngineCore>, graph: SharedGraph, bus: Arc<EventBus>, mode: RunMode, max_parallel: usize) {
    if core.transition(EngineState::Running) {
        let mut prepared = HashSet::new();
        loop {
            if core.stop.is_cancelled() || core.abort.is_cancelled() {
                break;
            }

            let iteration_id = Uuid::new_v4();
            match execute_iteration(&core, &graph, &bus, iteration_id, max_parallel, &mut prepared).await {
                Ok(true) => core.complete_iteration(iteration_id),
                Ok(false) => break,
                Err(e) => {
                    core.fail(&e);
                    break;
                }
            }

            if mode == RunMode::SinglePass {
                break;
            }
            tokio::task::yield_now().await;
        }
    }
    core.settle(mode);
}

/// Runs every step once in dependency order. Returns `false` when the
/// iteration was interrupted by an abort.
async fn execute_iteration(
    core: &EngineCore,
    graph: &SharedGraph,
    bus: &EventBus,
    iteration_id: IterationId,
    max_parallel: usize,
    prepared: &mut HashSet<StepId>,
) -> Result<bool, FlowError> {
    let plan = build_plan(graph).await?;
    let mut completed: HashSet<StepId> = HashSet::new();
    let mut in_flight: HashSet<StepId> = HashSet::new();
    let mut running = FuturesUnordered::new();

    loop {
        if core.abort.is_cancelled() {
            return Ok(false);
        }

        for step_id in find_ready_steps(&plan, &completed, &in_flight) {
            if running.len() >= max_parallel {
                break;
            }

            // Steps removed by the editor since planning are skipped
            let Some(inputs) = collect_inputs(graph, step_id).await else {
                completed.insert(step_id);
                continue;
            };
            let Some(body) = plan.bodies.get(&step_id).cloned() else {
                completed.insert(step_id);
                continue;
            };

            let ctx = StepContext {
                step_id,
                iteration_id,
                inputs,
                events: bus.create_emitter(iteration_id, step_id),
                cancellation: core.abort.clone(),
            };
            let needs_prepare = prepared.insert(step_id);

            in_flight.insert(step_id);
            running.push(tokio::spawn(async move {
                let start = Instant::now();
                let result = run_step(body, ctx, needs_prepare).await;
                (step_id, result, start.elapsed())
            }));
        }

        if running.is_empty() {
            break;
        }

        if let Some(joined) = running.next().await {
            let (step_id, result, elapsed) =
                joined.map_err(|e| FlowError::Execution(format!("Task join error: {}", e)))?;
            in_flight.remove(&step_id);

            match result {
                Ok(output) => {
                    tracing::debug!("Step {} completed in {}ms", step_id, elapsed.as_millis());
                    store_outputs(graph, step_id, output, elapsed).await;
                    completed.insert(step_id);
                }
                Err(StepError::Cancelled) => return Ok(false),
                Err(e) => {
                    return Err(FlowError::Execution(format!("Step {} failed: {}", step_id, e)));
                }
            }
        }
    }

    Ok(true)
}

async fn run_step(body: Arc<dyn StepBody>, ctx: StepContext, needs_prepare: bool) -> Result<StepOutput, StepError> {
    if needs_prepare {
        body.prepare(&ctx).await?;
    }
    body.run(ctx).await
}

async fn build_plan(graph: &SharedGraph) -> Result<IterationPlan, FlowError> {
    let graph = graph.read().await;
    let mut dag = DiGraph::new();
    let mut index = HashMap::new();
    let mut bodies = HashMap::new();

    for step in graph.steps() {
        index.insert(step.id(), dag.add_node(step.id()));
        bodies.insert(step.id(), step.body());
    }

    for link in graph.links() {
        if let (Some(from), Some(to)) = (index.get(&link.source.step_id), index.get(&link.target.step_id)) {
            dag.add_edge(*from, *to, ());
        }
    }

    let order = toposort(&dag, None)
        .map_err(|_| GraphError::CyclicDependency)?
        .into_iter()
        .map(|idx| dag[idx])
        .collect();

    Ok(IterationPlan {
        graph: dag,
        index,
        order,
        bodies,
    })
}

/// Steps whose predecessors have all completed, in topological order
fn find_ready_steps(plan: &IterationPlan, completed: &HashSet<StepId>, in_flight: &HashSet<StepId>) -> Vec<StepId> {
    plan.order
        .iter()
        .filter(|id| !completed.contains(*id) && !in_flight.contains(*id))
        .filter(|id| {
            plan.graph
                .neighbors_directed(plan.index[*id], petgraph::Direction::Incoming)
                .all(|dep| completed.contains(&plan.graph[dep]))
        })
        .copied()
        .collect()
}

/// Copies linked output values into the step's inputs and returns the inputs.
///
/// When several links feed one input, the last link in table order wins.
async fn collect_inputs(graph: &SharedGraph, step_id: StepId) -> Option<HashMap<String, flowcore::PortValue>> {
    let mut graph = graph.write().await;
    graph.step(step_id)?;

    let incoming: Vec<(PortId, PortId)> = graph
        .incoming_links(step_id)
        .map(|l| (l.source.port_id, l.target.port_id))
        .collect();

    for (source, target) in incoming {
        let Some(value) = graph.port(source).map(|(_, p)| p.value().clone()) else {
            continue;
        };
        if let Some(port) = graph.port_mut(target) {
            if let Err(e) = port.set_value(&value) {
                tracing::warn!("Dropping value on link {} -> {}: {}", source, target, e);
            }
        }
    }

    graph.step(step_id).map(|s| s.input_values())
}

async fn store_outputs(graph: &SharedGraph, step_id: StepId, output: StepOutput, elapsed: Duration) {
    let mut graph = graph.write().await;
    let Some(step) = graph.step_mut(step_id) else {
        return;
    };
    step.set_last_duration(elapsed);

    for (name, value) in output.outputs {
        match step.port_named_mut(&name, Direction::Output) {
            Some(port) => {
                if let Err(e) = port.set_value(&value) {
                    tracing::warn!("Step {} produced an unusable value for {}: {}", step_id, name, e);
                }
            }
            None => tracing::warn!("Step {} produced a value for unknown output {}", step_id, name),
        }
    }
}
