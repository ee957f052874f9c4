//! Proposal controller.
//!
//! Owns the single-slot "one active proposal" invariant and wires the
//! pure overlay builders, the execution engine, and the injected backend
//! into one surface the renderer consumes. At most one proposal (data or
//! schema) is active at any time; activating a new one unconditionally
//! discards the prior proposal and its execution state.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use serde_json::Value;
use tabula_engine::{BatchEngine, EngineSnapshot, ExecError, OpExecutor};
use tabula_overlay::{build_data_overlay, column_name_index, DisplayRow};
use tabula_schema::annotate_schema_ops;
use tabula_store::{AcceptanceNotifier, StoreError, TableBackend};
use tabula_types::{
    BatchSummary, Column, ColumnMeta, DataOp, OpOutcome, Phase, Proposal, Row, RowId, RowMeta,
    SchemaOp, SchemaProposal,
};

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("invalid proposal payload: {0}")]
    InvalidPayload(String),
    #[error("proposal contains no operations")]
    EmptyProposal,
    #[error("no active proposal")]
    NoActiveProposal,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Discriminant of the active proposal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProposalKind {
    Data,
    Schema,
}

/// The merged view the renderer consumes. Rows and columns carry plain
/// action tags; the renderer never needs to know proposal semantics.
#[derive(Clone, Debug)]
pub struct TableView {
    pub columns: Vec<Column>,
    pub rows: Vec<DisplayRow>,
    pub row_meta: BTreeMap<RowId, RowMeta>,
    pub column_meta: BTreeMap<String, ColumnMeta>,
}

enum ActiveKind {
    Data {
        engine: BatchEngine<DataOp>,
        reasoning: Option<String>,
        research_log: Option<Value>,
    },
    Schema {
        engine: BatchEngine<SchemaOp>,
        table_name: Option<String>,
        table_description: Option<String>,
    },
}

struct ActiveProposal {
    /// Also the seed for placeholder column ids, so the schema overlay is
    /// stable across recomputation for the lifetime of this proposal.
    id: Uuid,
    kind: ActiveKind,
}

/// Adapts the backend's single-operation entry point to the engine's
/// executor seam.
struct BackendExecutor<'a> {
    backend: &'a dyn TableBackend,
}

#[async_trait]
impl OpExecutor for BackendExecutor<'_> {
    async fn execute(&self, op: &DataOp) -> Result<(), ExecError> {
        self.backend
            .execute_operation(op)
            .await
            .map_err(|err| ExecError::new(err.to_string()))
    }
}

pub struct ProposalController {
    backend: Arc<dyn TableBackend>,
    notifier: Arc<dyn AcceptanceNotifier>,
    columns: Vec<Column>,
    rows: Vec<Row>,
    active: Option<ActiveProposal>,
}

impl ProposalController {
    /// Fetch the canonical snapshot and start with an empty proposal slot.
    pub async fn load(
        backend: Arc<dyn TableBackend>,
        notifier: Arc<dyn AcceptanceNotifier>,
    ) -> Result<Self, ProposalError> {
        let columns = backend.fetch_columns().await?;
        let rows = backend.fetch_rows().await?;
        Ok(Self {
            backend,
            notifier,
            columns,
            rows,
            active: None,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn active_kind(&self) -> Option<ProposalKind> {
        self.active.as_ref().map(|active| match active.kind {
            ActiveKind::Data { .. } => ProposalKind::Data,
            ActiveKind::Schema { .. } => ProposalKind::Schema,
        })
    }

    /// Generator-supplied rationale of the active data proposal, if any.
    pub fn reasoning(&self) -> Option<&str> {
        match self.active.as_ref().map(|a| &a.kind) {
            Some(ActiveKind::Data { reasoning, .. }) => reasoning.as_deref(),
            _ => None,
        }
    }

    pub fn research_log(&self) -> Option<&Value> {
        match self.active.as_ref().map(|a| &a.kind) {
            Some(ActiveKind::Data { research_log, .. }) => research_log.as_ref(),
            _ => None,
        }
    }

    pub fn table_name(&self) -> Option<&str> {
        match self.active.as_ref().map(|a| &a.kind) {
            Some(ActiveKind::Schema { table_name, .. }) => table_name.as_deref(),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        self.with_engine(|e| e.phase(), |e| e.phase())
    }

    pub fn op_count(&self) -> usize {
        self.with_engine(|e| e.ops().len(), |e| e.ops().len())
            .unwrap_or(0)
    }

    pub fn checked(&self) -> Option<&[bool]> {
        match self.active.as_ref().map(|a| &a.kind) {
            Some(ActiveKind::Data { engine, .. }) => Some(engine.checked()),
            Some(ActiveKind::Schema { engine, .. }) => Some(engine.checked()),
            None => None,
        }
    }

    pub fn results(&self) -> Option<&[OpOutcome]> {
        match self.active.as_ref().map(|a| &a.kind) {
            Some(ActiveKind::Data { engine, .. }) => Some(engine.results()),
            Some(ActiveKind::Schema { engine, .. }) => Some(engine.results()),
            None => None,
        }
    }

    /// Snapshot stream of the active proposal's engine.
    pub fn subscribe(&self) -> Option<watch::Receiver<EngineSnapshot>> {
        self.with_engine(|e| e.subscribe(), |e| e.subscribe())
    }

    /// Activate a proposal, replacing whatever was active before.
    pub fn activate(&mut self, proposal: Proposal) -> Result<(), ProposalError> {
        if proposal.is_empty() {
            return Err(ProposalError::EmptyProposal);
        }
        let id = Uuid::new_v4();
        let kind = match proposal {
            Proposal::Data(data) => {
                tracing::info!(ops = data.operations.len(), "activating data proposal");
                ActiveKind::Data {
                    engine: BatchEngine::new(data.operations),
                    reasoning: data.reasoning,
                    research_log: data.research_log,
                }
            }
            Proposal::Schema(schema) => {
                tracing::info!(ops = schema.operations.len(), "activating schema proposal");
                ActiveKind::Schema {
                    engine: BatchEngine::new(schema.operations),
                    table_name: schema.table_name,
                    table_description: schema.table_description,
                }
            }
        };
        self.active = Some(ActiveProposal { id, kind });
        Ok(())
    }

    /// Validate and activate a raw payload (the shape the generator sends).
    pub fn activate_payload(&mut self, payload: Value) -> Result<(), ProposalError> {
        let proposal: Proposal = serde_json::from_value(payload)
            .map_err(|err| ProposalError::InvalidPayload(err.to_string()))?;
        self.activate(proposal)
    }

    /// Drop the active proposal: explicit cancel, or acknowledgement of a
    /// done summary. The overlay collapses back to canonical state.
    pub fn dismiss(&mut self) {
        if self.active.take().is_some() {
            tracing::info!("dismissed active proposal");
        }
    }

    /// Flip one selection flag. No-op while execution is in flight or done.
    pub fn toggle_op(&mut self, index: usize) {
        match self.active.as_mut().map(|a| &mut a.kind) {
            Some(ActiveKind::Data { engine, .. }) => engine.toggle(index),
            Some(ActiveKind::Schema { engine, .. }) => engine.toggle(index),
            None => {}
        }
    }

    pub fn set_all_ops(&mut self, checked: bool) {
        match self.active.as_mut().map(|a| &mut a.kind) {
            Some(ActiveKind::Data { engine, .. }) => engine.set_all(checked),
            Some(ActiveKind::Schema { engine, .. }) => engine.set_all(checked),
            None => {}
        }
    }

    /// Compute the merged overlay from the canonical snapshot and the
    /// active proposal. Derived fresh on every call, never stored.
    pub fn view(&self) -> TableView {
        match self.active.as_ref() {
            None => self.canonical_view(),
            Some(active) => match &active.kind {
                ActiveKind::Data { engine, .. } => {
                    let name_index = column_name_index(&self.columns);
                    let overlay =
                        build_data_overlay(&self.rows, engine.ops(), &name_index, engine.phase());
                    TableView {
                        columns: self.columns.clone(),
                        rows: overlay.display_rows,
                        row_meta: overlay.row_meta,
                        column_meta: BTreeMap::new(),
                    }
                }
                ActiveKind::Schema { engine, .. } => {
                    // Same terminal collapse as the data overlay: after the
                    // refetch the canonical columns already include the
                    // applied diff.
                    if engine.phase().is_done() {
                        return self.canonical_view();
                    }
                    let overlay = annotate_schema_ops(&self.columns, engine.ops(), &active.id);
                    TableView {
                        columns: overlay.display_columns,
                        rows: self.rows.iter().map(DisplayRow::from_canonical).collect(),
                        row_meta: BTreeMap::new(),
                        column_meta: overlay.column_meta,
                    }
                }
            },
        }
    }

    /// Execute the checked subset of the active proposal.
    ///
    /// Returns `Ok(None)` when nothing is checked (or the proposal already
    /// ran): no state is mutated. Otherwise runs to completion over the
    /// selected subset, refetches the canonical store when at least one
    /// operation succeeded, and only then exposes the done summary.
    pub async fn apply(&mut self) -> Result<Option<BatchSummary>, ProposalError> {
        let backend = Arc::clone(&self.backend);
        let notifier = Arc::clone(&self.notifier);
        let Some(active) = self.active.as_mut() else {
            return Err(ProposalError::NoActiveProposal);
        };

        let (total, tally, refetch_failed) = match &mut active.kind {
            ActiveKind::Data { engine, .. } => {
                let executor = BackendExecutor {
                    backend: backend.as_ref(),
                };
                let Some(tally) = engine.run(&executor).await else {
                    return Ok(None);
                };
                let mut refetch_failed = false;
                if tally.succeeded > 0 {
                    match backend.fetch_rows().await {
                        Ok(rows) => self.rows = rows,
                        Err(err) => {
                            tracing::warn!(error = %err, "canonical row refetch failed after batch");
                            refetch_failed = true;
                        }
                    }
                }
                engine.finish(tally, refetch_failed);
                (engine.ops().len(), tally, refetch_failed)
            }
            ActiveKind::Schema {
                engine,
                table_name,
                table_description,
            } => {
                if !engine.begin_atomic() {
                    return Ok(None);
                }
                let operations: Vec<SchemaOp> = engine
                    .checked_indices()
                    .into_iter()
                    .map(|i| engine.ops()[i].clone())
                    .collect();
                let filtered = SchemaProposal {
                    operations,
                    table_name: table_name.clone(),
                    table_description: table_description.clone(),
                };
                let result = backend
                    .apply_schema(&filtered)
                    .await
                    .map_err(|err| err.to_string());
                let tally = engine.complete_atomic(result);

                let mut refetch_failed = false;
                if tally.succeeded > 0 {
                    match backend.fetch_columns().await {
                        Ok(columns) => self.columns = columns,
                        Err(err) => {
                            tracing::warn!(error = %err, "canonical column refetch failed after schema apply");
                            refetch_failed = true;
                        }
                    }
                    match backend.fetch_rows().await {
                        Ok(rows) => self.rows = rows,
                        Err(err) => {
                            tracing::warn!(error = %err, "canonical row refetch failed after schema apply");
                            refetch_failed = true;
                        }
                    }
                }
                engine.finish(tally, refetch_failed);
                (engine.ops().len(), tally, refetch_failed)
            }
        };

        let summary = BatchSummary {
            succeeded: tally.succeeded,
            failed: tally.failed,
            refetch_failed,
        };
        if summary.failed == 0 && summary.succeeded > 0 {
            notifier
                .notify_accepted(&summary_message(total, &summary))
                .await;
        }
        Ok(Some(summary))
    }

    /// Re-pull the canonical snapshot outside the apply flow.
    pub async fn refresh(&mut self) -> Result<(), ProposalError> {
        self.columns = self.backend.fetch_columns().await?;
        self.rows = self.backend.fetch_rows().await?;
        Ok(())
    }

    fn canonical_view(&self) -> TableView {
        TableView {
            columns: self.columns.clone(),
            rows: self.rows.iter().map(DisplayRow::from_canonical).collect(),
            row_meta: BTreeMap::new(),
            column_meta: BTreeMap::new(),
        }
    }

    fn with_engine<T>(
        &self,
        data: impl FnOnce(&BatchEngine<DataOp>) -> T,
        schema: impl FnOnce(&BatchEngine<SchemaOp>) -> T,
    ) -> Option<T> {
        match self.active.as_ref().map(|a| &a.kind) {
            Some(ActiveKind::Data { engine, .. }) => Some(data(engine)),
            Some(ActiveKind::Schema { engine, .. }) => Some(schema(engine)),
            None => None,
        }
    }
}

/// Aggregate banner copy: "Applied X of Y proposed changes — Z failed".
pub fn summary_message(total: usize, summary: &BatchSummary) -> String {
    if summary.failed > 0 {
        format!(
            "Applied {} of {} proposed changes — {} failed",
            summary.succeeded, total, summary.failed
        )
    } else {
        format!("Applied {} of {} proposed changes", summary.succeeded, total)
    }
}
