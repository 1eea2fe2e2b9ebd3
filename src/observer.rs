//! Observability sink for feasibility checks.
//!
//! Each check reports its state transitions to an injected observer instead
//! of a process-wide logger. [`TracingObserver`] forwards them to `tracing`;
//! [`RecordingObserver`] keeps them in memory for callers that want to show
//! progress or assert on it.

use crate::error::Failure;
use crate::xenapi::{Host, OpaqueRef, Vm};
use crate::{log_info, log_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Pending,
    Negotiating,
    Mapping,
    Asserting,
    Succeeded,
    Failed,
}

impl CheckState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckState::Succeeded | CheckState::Failed)
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckState::Pending => "pending",
            CheckState::Negotiating => "negotiating",
            CheckState::Mapping => "mapping",
            CheckState::Asserting => "asserting",
            CheckState::Succeeded => "succeeded",
            CheckState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One state transition of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckEvent {
    pub check_id: Uuid,
    pub vm: OpaqueRef<Vm>,
    pub host: OpaqueRef<Host>,
    pub state: CheckState,
    /// Set on the transition into [`CheckState::Failed`].
    pub failure: Option<Failure>,
    pub at: DateTime<Utc>,
}

impl CheckEvent {
    /// One-line description of the transition, naming the failure if any.
    pub fn summary(&self) -> String {
        match &self.failure {
            Some(failure) => format!("Migration check failed: {}", failure),
            None => format!("Migration check {}", self.state),
        }
    }
}

pub trait CheckObserver: Send + Sync {
    fn on_transition(&self, event: &CheckEvent);
}

/// Writes every transition as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CheckObserver for TracingObserver {
    fn on_transition(&self, event: &CheckEvent) {
        match &event.failure {
            Some(failure) => log_warn!(
                check_id = %event.check_id,
                vm = %event.vm,
                host = %event.host,
                state = %event.state,
                code = %failure.code,
                "{}",
                event.summary()
            ),
            None => log_info!(
                check_id = %event.check_id,
                vm = %event.vm,
                host = %event.host,
                state = %event.state,
                "{}",
                event.summary()
            ),
        }
    }
}

/// Keeps every event it sees, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<CheckEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CheckEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// States seen for one check, in order.
    pub fn states_for(&self, check_id: Uuid) -> Vec<CheckState> {
        self.events()
            .into_iter()
            .filter(|event| event.check_id == check_id)
            .map(|event| event.state)
            .collect()
    }
}

impl CheckObserver for RecordingObserver {
    fn on_transition(&self, event: &CheckEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
