//! Pipeline and stage state tracking
//!
//! **Architecture**:
//! - `StageState`: lifecycle of one stage (`Pending -> Running -> Succeeded | Failed`)
//! - `PipelineState`: lifecycle of the run (`Idle -> Running -> Completed | Aborted`)
//! - `OrchestrationState`: both, plus the rule that a stage may only start once
//!   its predecessor succeeded
//!
//! Every transition is validated; an invalid one is a programming error
//! surfaced as `Err(String)`.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Succeeded => "succeeded",
            StageState::Failed => "failed",
        }
    }

    /// Get all valid transitions FROM this state.
    pub fn valid_next_states(&self) -> Vec<StageState> {
        match self {
            StageState::Pending => vec![StageState::Running],
            StageState::Running => vec![StageState::Succeeded, StageState::Failed],
            StageState::Succeeded | StageState::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: StageState) -> bool {
        self.valid_next_states().contains(&next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::Aborted => "aborted",
        }
    }

    pub fn valid_next_states(&self) -> Vec<PipelineState> {
        match self {
            PipelineState::Idle => vec![PipelineState::Running, PipelineState::Aborted],
            PipelineState::Running => vec![PipelineState::Completed, PipelineState::Aborted],
            PipelineState::Completed | PipelineState::Aborted => vec![],
        }
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        self.valid_next_states().contains(&next)
    }
}

/// Snapshot of a provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub pipeline: PipelineState,
    /// Stage names and states, in execution order
    pub stages: Vec<(String, StageState)>,
    pub start_time: SystemTime,
    pub error: Option<String>,
}

impl OrchestrationState {
    pub fn new<I, S>(stage_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OrchestrationState {
            pipeline: PipelineState::Idle,
            stages: stage_names
                .into_iter()
                .map(|name| (name.into(), StageState::Pending))
                .collect(),
            start_time: SystemTime::now(),
            error: None,
        }
    }

    pub fn transition_pipeline(&mut self, next: PipelineState) -> Result<(), String> {
        if !self.pipeline.can_transition_to(next) {
            return Err(format!(
                "Invalid pipeline transition: {} -> {}",
                self.pipeline.as_str(),
                next.as_str()
            ));
        }
        self.pipeline = next;
        Ok(())
    }

    /// Move stage `index` to `next`, enforcing the predecessor rule for `Running`.
    pub fn transition_stage(&mut self, index: usize, next: StageState) -> Result<(), String> {
        if self.pipeline != PipelineState::Running {
            return Err(format!(
                "Stage transition while pipeline is {}",
                self.pipeline.as_str()
            ));
        }
        if next == StageState::Running && index > 0 {
            let (prev_name, prev_state) = &self.stages[index - 1];
            if *prev_state != StageState::Succeeded {
                return Err(format!(
                    "Stage {} cannot start: predecessor '{}' is {}",
                    index,
                    prev_name,
                    prev_state.as_str()
                ));
            }
        }

        let (name, state) = self
            .stages
            .get_mut(index)
            .ok_or_else(|| format!("No stage at index {}", index))?;
        if !state.can_transition_to(next) {
            return Err(format!(
                "Invalid transition for stage '{}': {} -> {}",
                name,
                state.as_str(),
                next.as_str()
            ));
        }
        *state = next;
        Ok(())
    }

    /// Record an error and mark the pipeline aborted.
    pub fn record_error(&mut self, error: String) {
        self.error = Some(error);
        self.pipeline = PipelineState::Aborted;
    }

    pub fn stage_state(&self, name: &str) -> Option<StageState> {
        self.stages
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, state)| *state)
    }

    /// Names of stages that reached `Succeeded`, in order.
    pub fn succeeded(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|(_, s)| *s == StageState::Succeeded)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> OrchestrationState {
        let mut state = OrchestrationState::new(["dependencies", "kernel", "libevl"]);
        state.transition_pipeline(PipelineState::Running).unwrap();
        state
    }

    #[test]
    fn test_stage_transitions() {
        assert!(StageState::Pending.can_transition_to(StageState::Running));
        assert!(!StageState::Pending.can_transition_to(StageState::Succeeded));
        assert!(StageState::Running.can_transition_to(StageState::Failed));
        assert!(!StageState::Succeeded.can_transition_to(StageState::Running));
    }

    #[test]
    fn test_pipeline_transitions() {
        assert!(PipelineState::Idle.can_transition_to(PipelineState::Running));
        assert!(!PipelineState::Idle.can_transition_to(PipelineState::Completed));
        assert!(!PipelineState::Aborted.can_transition_to(PipelineState::Running));
    }

    #[test]
    fn test_stage_requires_succeeded_predecessor() {
        let mut state = state();
        assert!(state.transition_stage(1, StageState::Running).is_err());

        state.transition_stage(0, StageState::Running).unwrap();
        state.transition_stage(0, StageState::Succeeded).unwrap();
        state.transition_stage(1, StageState::Running).unwrap();
        state.transition_stage(1, StageState::Failed).unwrap();
        assert!(state.transition_stage(2, StageState::Running).is_err());
        assert_eq!(state.succeeded(), vec!["dependencies"]);
    }

    #[test]
    fn test_no_stage_transitions_while_idle() {
        let mut state = OrchestrationState::new(["dependencies"]);
        assert!(state.transition_stage(0, StageState::Running).is_err());
    }

    #[test]
    fn test_record_error_aborts() {
        let mut state = state();
        state.record_error("boom".to_string());
        assert_eq!(state.pipeline, PipelineState::Aborted);
        assert_eq!(state.error.as_deref(), Some("boom"));
    }
}
