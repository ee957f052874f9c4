//! Data overlay builder.
//!
//! Computes the review view of a pending data proposal: virtual rows for
//! proposed Adds, patched rows for proposed Updates, and per-row metadata,
//! all derived fresh from the canonical rows on every call. Nothing here
//! mutates canonical state and nothing here fails — unresolvable targets
//! are skipped so a partially-malformed proposal still renders.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tabula_types::{Column, DataOp, FieldMap, Phase, Row, RowId, RowMeta};

/// A row as presented to the renderer: canonical, patched, or virtual.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayRow {
    pub id: RowId,
    /// `None` for virtual rows, which have no parent until persisted.
    pub parent_id: Option<i64>,
    pub fields: FieldMap,
    pub created_at: String,
    pub updated_at: String,
}

impl DisplayRow {
    pub fn from_canonical(row: &Row) -> Self {
        Self {
            id: RowId::Canonical(row.id),
            parent_id: Some(row.parent_id),
            fields: row.fields.clone(),
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
        }
    }
}

/// Display rows plus annotations for a pending data proposal.
#[derive(Clone, Debug, Default)]
pub struct DataOverlay {
    pub display_rows: Vec<DisplayRow>,
    pub row_meta: BTreeMap<RowId, RowMeta>,
}

/// Lowercased column name → column id, for case-insensitive resolution of
/// the human-readable keys carried by inbound operations.
pub fn column_name_index(columns: &[Column]) -> HashMap<String, String> {
    columns
        .iter()
        .map(|c| (c.name.to_lowercase(), c.id.clone()))
        .collect()
}

/// Rewrite name-keyed fields to id-keyed fields. Keys that resolve to no
/// column pass through as literal keys.
pub fn resolve_field_names(fields: &FieldMap, name_index: &HashMap<String, String>) -> FieldMap {
    fields
        .iter()
        .map(|(name, value)| {
            let key = name_index
                .get(&name.to_lowercase())
                .cloned()
                .unwrap_or_else(|| name.clone());
            (key, value.clone())
        })
        .collect()
}

/// Build the display rows and row metadata for `ops` over `rows`.
///
/// Once the execution phase reaches `Done` the canonical store has been
/// refetched, so the overlay collapses: canonical rows come back unmodified
/// with no metadata, never duplicated against already-persisted changes.
pub fn build_data_overlay(
    rows: &[Row],
    ops: &[DataOp],
    name_index: &HashMap<String, String>,
    phase: Phase,
) -> DataOverlay {
    if phase.is_done() {
        return DataOverlay {
            display_rows: rows.iter().map(DisplayRow::from_canonical).collect(),
            row_meta: BTreeMap::new(),
        };
    }

    let mut virtual_rows: Vec<DisplayRow> = Vec::new();
    let mut patches: HashMap<i64, FieldMap> = HashMap::new();
    let mut row_meta: BTreeMap<RowId, RowMeta> = BTreeMap::new();

    for (index, op) in ops.iter().enumerate() {
        match op {
            DataOp::Add { fields } => {
                let id = RowId::Virtual(index);
                virtual_rows.push(DisplayRow {
                    id,
                    parent_id: None,
                    fields: resolve_field_names(fields, name_index),
                    created_at: String::new(),
                    updated_at: String::new(),
                });
                row_meta.insert(id, RowMeta::Added { op_index: index });
            }
            DataOp::Update { row_id, changes } => {
                let Some(canonical) = rows.iter().find(|r| r.id == *row_id) else {
                    continue; // unknown target row
                };
                let resolved = resolve_field_names(changes, name_index);
                let old_values: FieldMap = resolved
                    .keys()
                    .map(|key| {
                        let old = canonical.fields.get(key).cloned().unwrap_or(Value::Null);
                        (key.clone(), old)
                    })
                    .collect();
                patches.entry(*row_id).or_default().extend(resolved);
                row_meta.insert(
                    RowId::Canonical(*row_id),
                    RowMeta::Updated {
                        op_index: index,
                        old_values,
                    },
                );
            }
            DataOp::Delete { row_id } => {
                // The row stays in the display set until the operation
                // actually executes; the renderer strikes it through.
                if rows.iter().any(|r| r.id == *row_id) {
                    row_meta.insert(
                        RowId::Canonical(*row_id),
                        RowMeta::Deleted { op_index: index },
                    );
                }
            }
        }
    }

    // Virtual rows first (in operation-index order), then canonical rows in
    // their original order with any patches merged in.
    let mut display_rows = virtual_rows;
    for row in rows {
        let mut display = DisplayRow::from_canonical(row);
        if let Some(patch) = patches.get(&row.id) {
            for (key, value) in patch {
                display.fields.insert(key.clone(), value.clone());
            }
        }
        display_rows.push(display);
    }

    DataOverlay {
        display_rows,
        row_meta,
    }
}
