use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cell values and patch payloads are machine-generated JSON, keyed by
/// column id (canonical rows) or column name (inbound operations).
pub type FieldMap = BTreeMap<String, Value>;

/// Column value domain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Boolean,
    Select,
}

/// Rendering hint for a column; purely advisory.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayHint {
    Plain,
    Multiline,
    Currency,
    Percent,
}

/// A table column. Identity is `id`; `name` is a user-facing label and is
/// not guaranteed unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_hint: Option<DisplayHint>,
}

/// A canonical table row, owned by the external store. This core only ever
/// reads canonical rows; writes flow through the backend seam.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: i64,
    #[serde(default)]
    pub parent_id: i64,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Payload of a proposed column addition. `name` is the only field a sane
/// spec must carry; everything else falls back to defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub column_type: Option<ColumnType>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default, rename = "default")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub display_hint: Option<DisplayHint>,
}

/// Partial column edit. Every field is optional; a JSON `null` deserializes
/// to `None` and therefore can never overwrite an existing value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub column_type: Option<ColumnType>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default, rename = "default")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub display_hint: Option<DisplayHint>,
}

/// A proposed edit to the column list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOp {
    Add {
        column: ColumnSpec,
        #[serde(default)]
        after_column_id: Option<String>,
    },
    Modify {
        column_id: String,
        changes: ColumnPatch,
    },
    Remove {
        column_id: String,
    },
    Reorder {
        column_id: String,
        #[serde(default)]
        after_column_id: Option<String>,
    },
}

/// A proposed row mutation. `fields`/`changes` are keyed by human-readable
/// column name; name→id resolution happens inside this core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DataOp {
    Add {
        fields: FieldMap,
    },
    Update {
        row_id: i64,
        changes: FieldMap,
    },
    Delete {
        row_id: i64,
    },
}

/// Per-operation execution status, index-aligned with the operation list
/// for the lifetime of a proposal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OpOutcome {
    Pending,
    Running,
    Success,
    Failed { message: String },
}

impl OpOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpOutcome::Success | OpOutcome::Failed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataProposal {
    pub operations: Vec<DataOp>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub research_log: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaProposal {
    pub operations: Vec<SchemaOp>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub table_description: Option<String>,
}

/// A single pending batch of proposed mutations. At most one proposal is
/// active system-wide at any time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Proposal {
    Data(DataProposal),
    Schema(SchemaProposal),
}

impl Proposal {
    pub fn len(&self) -> usize {
        match self {
            Proposal::Data(p) => p.operations.len(),
            Proposal::Schema(p) => p.operations.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Final tally of a batch run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the post-batch canonical refetch failed; the view keeps the
    /// last known canonical snapshot (best-effort stale display).
    #[serde(default)]
    pub refetch_failed: bool,
}

/// Execution progress of the active proposal. Monotonic: `Idle → Running →
/// Done`, no transition skips or reverses a step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Running,
    Done(BatchSummary),
}

impl Phase {
    pub fn is_done(&self) -> bool {
        matches!(self, Phase::Done(_))
    }
}

/// Reference to a display row: either a canonical row or a virtual row
/// synthesized from a proposed Add at the given operation index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RowId {
    Canonical(i64),
    Virtual(usize),
}

impl RowId {
    /// Integer id as presented to consumers that key rows by number.
    /// Virtual rows map to strictly negative ids, `-(i + 1)` for operation
    /// index `i`, so they can never collide with non-negative canonical ids.
    pub fn display_id(self) -> i64 {
        match self {
            RowId::Canonical(id) => id,
            RowId::Virtual(index) => -(index as i64 + 1),
        }
    }

    pub fn is_virtual(self) -> bool {
        matches!(self, RowId::Virtual(_))
    }
}

/// How the active proposal affects a display row.
#[derive(Clone, Debug, PartialEq)]
pub enum RowMeta {
    Added { op_index: usize },
    Updated { op_index: usize, old_values: FieldMap },
    Deleted { op_index: usize },
}

impl RowMeta {
    pub fn op_index(&self) -> usize {
        match self {
            RowMeta::Added { op_index }
            | RowMeta::Updated { op_index, .. }
            | RowMeta::Deleted { op_index } => *op_index,
        }
    }
}

/// How the active proposal affects a display column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnMeta {
    Added,
    Removed,
    Modified { changes: ColumnPatch },
}
