//! Batch execution engine.
//!
//! Owns the accept/run/done state machine for one active proposal:
//! selection flags, per-operation outcomes, and the sequential execution
//! loop over an injected single-operation executor. Every state change is
//! published as a whole-structure snapshot, so an observer never sees a
//! torn `{phase, checked, results}` tuple.

use async_trait::async_trait;
use tokio::sync::watch;

use tabula_types::{BatchSummary, DataOp, OpOutcome, Phase};

/// Failure carried across the executor seam.
#[derive(Clone, Debug)]
pub struct ExecError {
    pub message: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Performs exactly one data mutation against the backing store.
#[async_trait]
pub trait OpExecutor: Send + Sync {
    async fn execute(&self, op: &DataOp) -> Result<(), ExecError>;
}

/// Consistent view of the engine at one point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSnapshot {
    pub phase: Phase,
    pub checked: Vec<bool>,
    pub results: Vec<OpOutcome>,
}

/// Success/failure counts of one batch run, before the done summary is
/// assembled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchTally {
    pub succeeded: usize,
    pub failed: usize,
}

/// State machine for one proposal's operations.
///
/// `checked`, `results`, and `ops` stay index-aligned for the lifetime of
/// the engine. Phase moves `Idle → Running → Done` and never backwards;
/// `Done` is terminal for this instance — a new proposal gets a new engine.
pub struct BatchEngine<O> {
    ops: Vec<O>,
    checked: Vec<bool>,
    results: Vec<OpOutcome>,
    phase: Phase,
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

impl<O> BatchEngine<O> {
    /// Seed a fresh engine: everything checked, everything pending.
    pub fn new(ops: Vec<O>) -> Self {
        let checked = vec![true; ops.len()];
        let results = vec![OpOutcome::Pending; ops.len()];
        let (snapshot_tx, _) = watch::channel(EngineSnapshot {
            phase: Phase::Idle,
            checked: checked.clone(),
            results: results.clone(),
        });
        Self {
            ops,
            checked,
            results,
            phase: Phase::Idle,
            snapshot_tx,
        }
    }

    pub fn ops(&self) -> &[O] {
        &self.ops
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn checked(&self) -> &[bool] {
        &self.checked
    }

    pub fn results(&self) -> &[OpOutcome] {
        &self.results
    }

    /// Subscribe to state snapshots; one is published after every
    /// transition, including per-operation progress during a run.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Flip one selection flag. Selection is frozen once execution starts.
    pub fn toggle(&mut self, index: usize) {
        if self.phase != Phase::Idle {
            return;
        }
        if let Some(flag) = self.checked.get_mut(index) {
            *flag = !*flag;
            self.publish();
        }
    }

    /// Set every selection flag at once. Frozen outside `Idle`.
    pub fn set_all(&mut self, checked: bool) {
        if self.phase != Phase::Idle {
            return;
        }
        for flag in &mut self.checked {
            *flag = checked;
        }
        self.publish();
    }

    /// Indices of checked operations, in ascending original order. The run
    /// loop never reorders them: proposal order is assumed meaningful.
    pub fn checked_indices(&self) -> Vec<usize> {
        self.checked
            .iter()
            .enumerate()
            .filter_map(|(i, &checked)| checked.then_some(i))
            .collect()
    }

    /// `Idle → Running` with every checked operation marked running at
    /// once — the all-or-nothing entry used for schema batches, which the
    /// backend commits in a single call. Returns false (and stays `Idle`)
    /// when nothing is checked.
    pub fn begin_atomic(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        let indices = self.checked_indices();
        if indices.is_empty() {
            return false;
        }
        self.phase = Phase::Running;
        for index in indices {
            self.results[index] = OpOutcome::Running;
        }
        self.publish();
        true
    }

    /// Resolve an atomic batch: every checked operation succeeds together
    /// or fails together with the shared message.
    pub fn complete_atomic(&mut self, result: Result<(), String>) -> BatchTally {
        if self.phase != Phase::Running {
            return BatchTally::default();
        }
        let indices = self.checked_indices();
        let mut tally = BatchTally::default();
        match result {
            Ok(()) => {
                tally.succeeded = indices.len();
                for index in indices {
                    self.results[index] = OpOutcome::Success;
                }
            }
            Err(message) => {
                tally.failed = indices.len();
                for index in indices {
                    self.results[index] = OpOutcome::Failed {
                        message: message.clone(),
                    };
                }
            }
        }
        self.publish();
        tally
    }

    /// `Running → Done`. The caller refetches the canonical store between
    /// the run and this call, so the done summary is never observable
    /// before the refetch attempt.
    pub fn finish(&mut self, tally: BatchTally, refetch_failed: bool) {
        if self.phase != Phase::Running {
            return;
        }
        self.phase = Phase::Done(BatchSummary {
            succeeded: tally.succeeded,
            failed: tally.failed,
            refetch_failed,
        });
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(EngineSnapshot {
            phase: self.phase,
            checked: self.checked.clone(),
            results: self.results.clone(),
        });
    }
}

impl BatchEngine<DataOp> {
    /// Run the checked operations one at a time, in ascending index order.
    ///
    /// Best-effort batch: a failed operation records its message and the
    /// loop continues — there is no abort-on-first-error and no retry.
    /// Unchecked operations are never executed and stay `Pending`.
    ///
    /// Returns `None` without any state change when nothing is checked or
    /// the engine is not idle. On success the phase is left at `Running`;
    /// call [`finish`](BatchEngine::finish) after the canonical refetch.
    pub async fn run(&mut self, executor: &dyn OpExecutor) -> Option<BatchTally> {
        if self.phase != Phase::Idle {
            return None;
        }
        let indices = self.checked_indices();
        if indices.is_empty() {
            return None;
        }

        self.phase = Phase::Running;
        self.publish();

        let mut tally = BatchTally::default();
        for index in indices {
            self.results[index] = OpOutcome::Running;
            self.publish();
            tracing::debug!(index, "executing operation");
            match executor.execute(&self.ops[index]).await {
                Ok(()) => {
                    self.results[index] = OpOutcome::Success;
                    tally.succeeded += 1;
                }
                Err(err) => {
                    tracing::warn!(index, message = %err.message, "operation failed");
                    self.results[index] = OpOutcome::Failed {
                        message: err.message,
                    };
                    tally.failed += 1;
                }
            }
            self.publish();
        }
        Some(tally)
    }
}
