use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type RunId = Uuid;
pub type IterationId = Uuid;

/// Engine lifecycle.
///
/// ```text
/// Idle -> Starting -> Running -> Stopping -> Stopped
///                        |  \--> Aborting -> Aborted
///                        \-----> Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Aborting,
    Aborted,
    Finished,
}

impl EngineState {
    pub fn can_transition_to(self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Aborting)
                | (Running, Stopping)
                | (Running, Aborting)
                | (Running, Finished)
                | (Stopping, Stopped)
                | (Stopping, Aborting)
                | (Aborting, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Aborted | EngineState::Finished)
    }

    /// States in which a new run must not be started.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            EngineState::Starting | EngineState::Running | EngineState::Stopping | EngineState::Aborting
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
            EngineState::Aborting => "aborting",
            EngineState::Aborted => "aborted",
            EngineState::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One iteration, then the engine finishes by itself
    #[default]
    SinglePass,
    /// Iterate until stopped or aborted
    Continuous,
}

/// Identity, state and timestamps of one engine run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub state: EngineState,
    pub mode: RunMode,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub iterations: u64,
    pub last_iteration: Option<IterationId>,
    pub last_error: Option<String>,
}

impl RunMetadata {
    pub fn new(mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: EngineState::Idle,
            mode,
            started_at: None,
            stopped_at: None,
            iterations: 0,
            last_iteration: None,
            last_error: None,
        }
    }

    /// Records a state change and the timestamps that go with it.
    pub fn apply_state(&mut self, state: EngineState) {
        self.state = state;
        match state {
            EngineState::Starting => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.stopped_at = Some(Utc::now()),
            _ => {}
        }
    }
}
