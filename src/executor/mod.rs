// Module: Executor
// Per-step and per-suite execution. The step executor builds and fires
// one HTTP request; the suite executor drives the execution order and
// owns the per-run state.

pub mod step;
pub mod suite;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use async_trait::async_trait;

use crate::dag::PreparedExecution;
use crate::model::{StepExecutionResult, TestStep};

/// Ephemeral per-run state. Never persisted, never shared across runs.
#[derive(Debug, Default)]
pub struct RunState {
    /// stepId → last recorded result.
    pub result_cache: HashMap<i64, StepExecutionResult>,
    /// stepId → wall time of its last execution, for cache TTL checks.
    pub executed_at: HashMap<i64, Instant>,
    /// `"<stepName>.<variable>"` → value. Grows monotonically.
    pub extracted: HashMap<String, String>,
    /// Steps re-executed this run because their TTL expired.
    pub refreshed: HashSet<i64>,
    /// Manual inputs collected so far. Later prompts reuse these silently.
    pub manual_inputs: HashMap<String, String>,
    /// Steps pre-marked SKIPPED by the non-interactive scan.
    pub pre_skipped: HashSet<i64>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Contract for executing one step against the prepared environment.
///
/// The trait seam keeps the suite executor independent from the HTTP
/// layer and, because implementations return boxed futures, lets
/// side-effect steps re-enter the executor from a spawned task.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn execute(
        &self,
        step: &TestStep,
        prepared: &PreparedExecution,
        state: &mut RunState,
    ) -> StepExecutionResult;
}
