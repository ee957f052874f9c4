//! Pure schema-operation traversal.
//!
//! Two entry points share one algorithm: `apply_schema_ops` materializes a
//! batch of column edits (what a backend commits), `annotate_schema_ops`
//! produces the review view of the same batch (removals stay visible,
//! every touched column carries metadata). Neither ever fails: a malformed
//! machine-generated operation degrades to a no-op so a partially-bad
//! proposal still renders something sane.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use tabula_types::{Column, ColumnMeta, ColumnPatch, ColumnSpec, ColumnType, SchemaOp};

/// Annotated column view of a pending schema proposal.
#[derive(Clone, Debug)]
pub struct SchemaOverlay {
    pub display_columns: Vec<Column>,
    /// Keyed by column id. Reorders are materialized but not annotated.
    pub column_meta: BTreeMap<String, ColumnMeta>,
}

/// Derive the column id for the Add at `op_index` of the proposal `seed`.
///
/// Hashing (seed, index) instead of drawing randomness makes recomputation
/// stable: the overlay can be rebuilt on every render without columns
/// changing identity, and the applier produces the same id the overlay
/// already showed.
pub fn placeholder_column_id(seed: &Uuid, op_index: usize) -> String {
    let mut h = Sha256::new();
    h.update(seed.as_bytes());
    h.update((op_index as u64).to_be_bytes());
    let digest: [u8; 32] = h.finalize().into();
    let mut b = [0u8; 16];
    b.copy_from_slice(&digest[..16]);
    format!("col_{}", Uuid::from_bytes(b))
}

/// Apply `ops` to `columns` strictly in list order and return the resulting
/// column list. Later ops may reference columns created by earlier ops in
/// the same batch.
pub fn apply_schema_ops(columns: &[Column], ops: &[SchemaOp], seed: &Uuid) -> Vec<Column> {
    let mut out: Vec<Column> = columns.to_vec();
    for (index, op) in ops.iter().enumerate() {
        match op {
            SchemaOp::Add {
                column,
                after_column_id,
            } => {
                let Some(new) = column_from_spec(column, placeholder_column_id(seed, index))
                else {
                    continue; // spec without a name is malformed
                };
                let at = insertion_index(&out, after_column_id.as_deref());
                out.insert(at, new);
            }
            SchemaOp::Modify { column_id, changes } => {
                if let Some(col) = out.iter_mut().find(|c| c.id == *column_id) {
                    patch_column(col, changes);
                }
            }
            SchemaOp::Remove { column_id } => {
                out.retain(|c| c.id != *column_id);
            }
            SchemaOp::Reorder {
                column_id,
                after_column_id,
            } => reorder(&mut out, column_id, after_column_id.as_deref()),
        }
    }
    out
}

/// Same traversal as [`apply_schema_ops`], except removals are not
/// materialized: the column stays visible, tagged `Removed`, until the
/// proposal is actually applied.
pub fn annotate_schema_ops(columns: &[Column], ops: &[SchemaOp], seed: &Uuid) -> SchemaOverlay {
    let mut out: Vec<Column> = columns.to_vec();
    let mut meta: BTreeMap<String, ColumnMeta> = BTreeMap::new();
    for (index, op) in ops.iter().enumerate() {
        match op {
            SchemaOp::Add {
                column,
                after_column_id,
            } => {
                let id = placeholder_column_id(seed, index);
                let Some(new) = column_from_spec(column, id.clone()) else {
                    continue;
                };
                let at = insertion_index(&out, after_column_id.as_deref());
                out.insert(at, new);
                meta.insert(id, ColumnMeta::Added);
            }
            SchemaOp::Modify { column_id, changes } => {
                if let Some(col) = out.iter_mut().find(|c| c.id == *column_id) {
                    patch_column(col, changes);
                    meta.insert(
                        column_id.clone(),
                        ColumnMeta::Modified {
                            changes: changes.clone(),
                        },
                    );
                }
            }
            SchemaOp::Remove { column_id } => {
                if out.iter().any(|c| c.id == *column_id) {
                    meta.insert(column_id.clone(), ColumnMeta::Removed);
                }
            }
            SchemaOp::Reorder {
                column_id,
                after_column_id,
            } => reorder(&mut out, column_id, after_column_id.as_deref()),
        }
    }
    SchemaOverlay {
        display_columns: out,
        column_meta: meta,
    }
}

fn column_from_spec(spec: &ColumnSpec, id: String) -> Option<Column> {
    let name = spec.name.as_deref()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(Column {
        id,
        name: name.to_string(),
        column_type: spec.column_type.unwrap_or(ColumnType::Text),
        required: spec.required.unwrap_or(false),
        default_value: spec.default_value.clone(),
        options: spec.options.clone(),
        display_hint: spec.display_hint,
    })
}

/// Insert position for Add: immediately after the anchor when present,
/// otherwise the end of the list.
fn insertion_index(columns: &[Column], after: Option<&str>) -> usize {
    after
        .and_then(|anchor| columns.iter().position(|c| c.id == anchor))
        .map(|i| i + 1)
        .unwrap_or(columns.len())
}

/// Reorder semantics differ from Add: no anchor means "move to front", and
/// a missing column or anchor degrades to a no-op.
fn reorder(columns: &mut Vec<Column>, column_id: &str, after: Option<&str>) {
    let Some(from) = columns.iter().position(|c| c.id == column_id) else {
        return;
    };
    let col = columns.remove(from);
    match after.map(|anchor| columns.iter().position(|c| c.id == anchor)) {
        None => columns.insert(0, col),
        Some(Some(anchor_pos)) => columns.insert(anchor_pos + 1, col),
        // Anchor not found (or it was the column itself): put it back.
        Some(None) => columns.insert(from, col),
    }
}

/// Shallow field-level patch. `None` fields never touch the column, which
/// is what keeps JSON nulls from clobbering existing values.
fn patch_column(column: &mut Column, changes: &ColumnPatch) {
    if let Some(name) = &changes.name {
        column.name = name.clone();
    }
    if let Some(column_type) = changes.column_type {
        column.column_type = column_type;
    }
    if let Some(required) = changes.required {
        column.required = required;
    }
    if let Some(default_value) = &changes.default_value {
        column.default_value = Some(default_value.clone());
    }
    if let Some(options) = &changes.options {
        column.options = Some(options.clone());
    }
    if let Some(display_hint) = changes.display_hint {
        column.display_hint = Some(display_hint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(id: &str, name: &str, column_type: ColumnType) -> Column {
        Column {
            id: id.to_string(),
            name: name.to_string(),
            column_type,
            required: false,
            default_value: None,
            options: None,
            display_hint: None,
        }
    }

    fn add(name: &str, column_type: ColumnType) -> SchemaOp {
        SchemaOp::Add {
            column: ColumnSpec {
                name: Some(name.to_string()),
                column_type: Some(column_type),
                ..ColumnSpec::default()
            },
            after_column_id: None,
        }
    }

    fn seed() -> Uuid {
        Uuid::from_u128(0x5eed)
    }

    #[test]
    fn add_appends_at_end() {
        let columns = vec![column("c1", "Title", ColumnType::Text)];
        let out = apply_schema_ops(&columns, &[add("Year", ColumnType::Number)], &seed());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "c1");
        assert_eq!(out[1].name, "Year");
        assert_eq!(out[1].column_type, ColumnType::Number);
    }

    #[test]
    fn add_inserts_after_anchor() {
        let columns = vec![
            column("c1", "Title", ColumnType::Text),
            column("c2", "Read", ColumnType::Boolean),
        ];
        let op = SchemaOp::Add {
            column: ColumnSpec {
                name: Some("Year".to_string()),
                ..ColumnSpec::default()
            },
            after_column_id: Some("c1".to_string()),
        };
        let out = apply_schema_ops(&columns, &[op], &seed());
        let names: Vec<&str> = out.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Title", "Year", "Read"]);
        // Missing type defaults to text.
        assert_eq!(out[1].column_type, ColumnType::Text);
    }

    #[test]
    fn add_without_name_is_skipped() {
        let columns = vec![column("c1", "Title", ColumnType::Text)];
        let op = SchemaOp::Add {
            column: ColumnSpec::default(),
            after_column_id: None,
        };
        let out = apply_schema_ops(&columns, &[op], &seed());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let columns = vec![
            column("c1", "Title", ColumnType::Text),
            column("c2", "Year", ColumnType::Number),
        ];
        let ops = vec![
            SchemaOp::Remove {
                column_id: "c2".to_string(),
            },
            SchemaOp::Remove {
                column_id: "c2".to_string(),
            },
        ];
        let out = apply_schema_ops(&columns, &ops, &seed());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "c1");
    }

    #[test]
    fn modify_patches_only_present_fields() {
        let mut base = column("c1", "Title", ColumnType::Text);
        base.default_value = Some(serde_json::json!("untitled"));
        let op = SchemaOp::Modify {
            column_id: "c1".to_string(),
            changes: ColumnPatch {
                required: Some(true),
                ..ColumnPatch::default()
            },
        };
        let out = apply_schema_ops(&[base], &[op], &seed());
        assert!(out[0].required);
        assert_eq!(out[0].name, "Title");
        // Absent patch fields leave existing values alone; nothing becomes null.
        assert_eq!(out[0].default_value, Some(serde_json::json!("untitled")));
    }

    #[test]
    fn modify_unknown_column_is_a_noop() {
        let columns = vec![column("c1", "Title", ColumnType::Text)];
        let op = SchemaOp::Modify {
            column_id: "nope".to_string(),
            changes: ColumnPatch {
                name: Some("Other".to_string()),
                ..ColumnPatch::default()
            },
        };
        let out = apply_schema_ops(&columns, &[op], &seed());
        assert_eq!(out, columns);
    }

    #[test]
    fn reorder_moves_to_front_without_anchor() {
        let columns = vec![
            column("c1", "Title", ColumnType::Text),
            column("c2", "Year", ColumnType::Number),
            column("c3", "Read", ColumnType::Boolean),
        ];
        let op = SchemaOp::Reorder {
            column_id: "c3".to_string(),
            after_column_id: None,
        };
        let out = apply_schema_ops(&columns, &[op], &seed());
        let ids: Vec<&str> = out.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c1", "c2"]);
    }

    #[test]
    fn reorder_with_missing_anchor_is_a_noop() {
        let columns = vec![
            column("c1", "Title", ColumnType::Text),
            column("c2", "Year", ColumnType::Number),
        ];
        let op = SchemaOp::Reorder {
            column_id: "c1".to_string(),
            after_column_id: Some("gone".to_string()),
        };
        let out = apply_schema_ops(&columns, &[op], &seed());
        assert_eq!(out, columns);
    }

    #[test]
    fn later_op_can_reference_column_added_earlier_in_the_batch() {
        let columns = vec![column("c1", "Title", ColumnType::Text)];
        let added_id = placeholder_column_id(&seed(), 0);
        let ops = vec![
            add("Year", ColumnType::Number),
            SchemaOp::Modify {
                column_id: added_id.clone(),
                changes: ColumnPatch {
                    required: Some(true),
                    ..ColumnPatch::default()
                },
            },
        ];
        let out = apply_schema_ops(&columns, &ops, &seed());
        let year = out.iter().find(|c| c.id == added_id).expect("added column");
        assert!(year.required);
    }

    #[test]
    fn placeholder_ids_are_stable_and_distinct() {
        let a = placeholder_column_id(&seed(), 0);
        assert_eq!(a, placeholder_column_id(&seed(), 0));
        assert_ne!(a, placeholder_column_id(&seed(), 1));
        assert_ne!(a, placeholder_column_id(&Uuid::from_u128(99), 0));
    }

    #[test]
    fn annotate_keeps_removed_columns_visible() {
        let columns = vec![
            column("c1", "Title", ColumnType::Text),
            column("c2", "Year", ColumnType::Number),
        ];
        let op = SchemaOp::Remove {
            column_id: "c2".to_string(),
        };
        let overlay = annotate_schema_ops(&columns, &[op], &seed());
        assert_eq!(overlay.display_columns.len(), 2);
        assert_eq!(overlay.column_meta.get("c2"), Some(&ColumnMeta::Removed));
    }

    #[test]
    fn annotate_tags_adds_and_modifies() {
        let columns = vec![column("c1", "Title", ColumnType::Text)];
        let ops = vec![
            add("Year", ColumnType::Number),
            SchemaOp::Modify {
                column_id: "c1".to_string(),
                changes: ColumnPatch {
                    name: Some("Book Title".to_string()),
                    ..ColumnPatch::default()
                },
            },
        ];
        let overlay = annotate_schema_ops(&columns, &ops, &seed());
        let added_id = placeholder_column_id(&seed(), 0);
        assert_eq!(overlay.column_meta.get(&added_id), Some(&ColumnMeta::Added));
        assert!(matches!(
            overlay.column_meta.get("c1"),
            Some(ColumnMeta::Modified { .. })
        ));
        assert_eq!(overlay.display_columns[0].name, "Book Title");
    }

    #[test]
    fn annotate_is_stable_across_recomputation() {
        let columns = vec![column("c1", "Title", ColumnType::Text)];
        let ops = vec![add("Year", ColumnType::Number)];
        let first = annotate_schema_ops(&columns, &ops, &seed());
        let second = annotate_schema_ops(&columns, &ops, &seed());
        assert_eq!(
            first.display_columns[1].id,
            second.display_columns[1].id,
            "placeholder ids must not change between renders"
        );
    }
}
