//! Backend seam.
//!
//! The proposal core never writes to the canonical dataset directly; every
//! mutation flows through [`TableBackend`]. Hosts inject a real
//! implementation (REST, database, whatever); tests and the CLI use
//! [`InMemoryTableBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use tabula_schema::apply_schema_ops;
use tabula_types::{Column, DataOp, FieldMap, Row, SchemaProposal};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row {0} not found")]
    RowNotFound(i64),
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("operation rejected: {0}")]
    Rejected(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// The canonical row/column store, plus the two mutation entry points.
///
/// Data mutations are executed one operation at a time; a schema proposal
/// is committed as one all-or-nothing call.
#[async_trait]
pub trait TableBackend: Send + Sync {
    async fn execute_operation(&self, op: &DataOp) -> Result<(), StoreError>;
    async fn fetch_rows(&self) -> Result<Vec<Row>, StoreError>;
    async fn fetch_columns(&self) -> Result<Vec<Column>, StoreError>;
    async fn apply_schema(&self, proposal: &SchemaProposal) -> Result<(), StoreError>;
}

/// Side channel announcing an accepted proposal (e.g. into a chat
/// transcript). Purely fire-and-forget.
#[async_trait]
pub trait AcceptanceNotifier: Send + Sync {
    async fn notify_accepted(&self, message: &str);
}

/// Backend stub: rejects every mutation, serves an empty dataset.
pub struct NullTableBackend;

#[async_trait]
impl TableBackend for NullTableBackend {
    async fn execute_operation(&self, _op: &DataOp) -> Result<(), StoreError> {
        Err(StoreError::Backend("null table backend".into()))
    }

    async fn fetch_rows(&self) -> Result<Vec<Row>, StoreError> {
        Ok(Vec::new())
    }

    async fn fetch_columns(&self) -> Result<Vec<Column>, StoreError> {
        Ok(Vec::new())
    }

    async fn apply_schema(&self, _proposal: &SchemaProposal) -> Result<(), StoreError> {
        Err(StoreError::Backend("null table backend".into()))
    }
}

/// Notifier stub: drops the message.
pub struct NullNotifier;

#[async_trait]
impl AcceptanceNotifier for NullNotifier {
    async fn notify_accepted(&self, _message: &str) {}
}

/// In-memory reference store for tests and the CLI.
///
/// Not durable, no constraint enforcement beyond row existence; it does the
/// same case-insensitive name→id resolution a real backend performs before
/// touching storage.
pub struct InMemoryTableBackend {
    state: Mutex<TableState>,
}

struct TableState {
    columns: Vec<Column>,
    rows: Vec<Row>,
    next_row_id: i64,
}

impl InMemoryTableBackend {
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        let next_row_id = rows.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        Self {
            state: Mutex::new(TableState {
                columns,
                rows,
                next_row_id,
            }),
        }
    }

    pub fn shared(columns: Vec<Column>, rows: Vec<Row>) -> Arc<Self> {
        Arc::new(Self::new(columns, rows))
    }

    /// Current contents (debug hook for tests and the CLI).
    pub async fn snapshot(&self) -> (Vec<Column>, Vec<Row>) {
        let state = self.state.lock().await;
        (state.columns.clone(), state.rows.clone())
    }
}

impl TableState {
    /// Rewrite name-keyed operation fields to column ids; unknown names
    /// pass through as literal keys, matching the overlay's fallback.
    fn resolve(&self, fields: &FieldMap) -> FieldMap {
        fields
            .iter()
            .map(|(name, value)| {
                let key = self
                    .columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .map(|c| c.id.clone())
                    .unwrap_or_else(|| name.clone());
                (key, value.clone())
            })
            .collect()
    }
}

#[async_trait]
impl TableBackend for InMemoryTableBackend {
    async fn execute_operation(&self, op: &DataOp) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now().to_rfc3339();
        match op {
            DataOp::Add { fields } => {
                let id = state.next_row_id;
                state.next_row_id += 1;
                let fields = state.resolve(fields);
                state.rows.push(Row {
                    id,
                    parent_id: 0,
                    fields,
                    created_at: now.clone(),
                    updated_at: now,
                });
                Ok(())
            }
            DataOp::Update { row_id, changes } => {
                let changes = state.resolve(changes);
                let row = state
                    .rows
                    .iter_mut()
                    .find(|r| r.id == *row_id)
                    .ok_or(StoreError::RowNotFound(*row_id))?;
                for (key, value) in changes {
                    row.fields.insert(key, value);
                }
                row.updated_at = now;
                Ok(())
            }
            DataOp::Delete { row_id } => {
                let before = state.rows.len();
                state.rows.retain(|r| r.id != *row_id);
                if state.rows.len() == before {
                    return Err(StoreError::RowNotFound(*row_id));
                }
                Ok(())
            }
        }
    }

    async fn fetch_rows(&self) -> Result<Vec<Row>, StoreError> {
        Ok(self.state.lock().await.rows.clone())
    }

    async fn fetch_columns(&self) -> Result<Vec<Column>, StoreError> {
        Ok(self.state.lock().await.columns.clone())
    }

    async fn apply_schema(&self, proposal: &SchemaProposal) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        // Single swap: the whole diff lands or none of it does.
        state.columns = apply_schema_ops(&state.columns, &proposal.operations, &Uuid::new_v4());
        Ok(())
    }
}
