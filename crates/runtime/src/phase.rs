//! Agent loop phases and the allowed-transition table.
//!
//! Transitions are validated against an explicit table; an invalid attempt
//! is logged and coerced rather than silently accepted, so a broken
//! sequence shows up in traces instead of corrupting a run.

use std::sync::Arc;

use serde::Serialize;

use talon_domain::trace::{EventSink, TraceEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Planning,
    Executing,
    Evaluating,
    Compressing,
    Responding,
    Done,
    Error,
}

impl LoopPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Evaluating => "evaluating",
            Self::Compressing => "compressing",
            Self::Responding => "responding",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// The explicit transition table. Any phase may fail into `Error`.
    pub fn allows(self, to: LoopPhase) -> bool {
        use LoopPhase::*;
        if to == Error {
            return self != Done && self != Error;
        }
        matches!(
            (self, to),
            (Planning, Executing)
                | (Planning, Compressing)
                | (Compressing, Executing)
                | (Compressing, Responding)
                | (Executing, Evaluating)
                | (Evaluating, Executing)
                | (Evaluating, Compressing)
                | (Evaluating, Responding)
                | (Evaluating, Done)
                | (Responding, Done)
                | (Error, Done)
        )
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current phase for one in-flight run.
pub struct PhaseTracker {
    session_id: String,
    phase: LoopPhase,
    sink: Arc<dyn EventSink>,
}

impl PhaseTracker {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            session_id: session_id.into(),
            phase: LoopPhase::Planning,
            sink,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Move to `to`, coercing if the table forbids it.
    pub fn transition(&mut self, to: LoopPhase) {
        if !self.phase.allows(to) {
            tracing::warn!(
                session_id = %self.session_id,
                from = %self.phase,
                to = %to,
                "invalid loop transition, coercing"
            );
            self.sink.emit(&TraceEvent::InvalidTransition {
                session_id: self.session_id.clone(),
                from: self.phase.to_string(),
                to: to.to_string(),
                coerced_to: to.to_string(),
            });
        }
        self.phase = to;
    }
}
