//! End-to-end accept flow against the in-memory backend: activate →
//! review overlay → selective apply → refetch → done summary → dismiss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tabula_proposal::{summary_message, ProposalController, ProposalError};
use tabula_store::{
    AcceptanceNotifier, InMemoryTableBackend, NullNotifier, StoreError, TableBackend,
};
use tabula_types::{Column, ColumnType, DataOp, FieldMap, OpOutcome, Phase, Row, SchemaProposal};

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

fn book(id: i64, title: &str, year: i64) -> Row {
    let mut fields = FieldMap::new();
    fields.insert("c1".to_string(), json!(title));
    fields.insert("c2".to_string(), json!(year));
    Row {
        id,
        parent_id: 0,
        fields,
        created_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

fn books_backend() -> Arc<InMemoryTableBackend> {
    InMemoryTableBackend::shared(
        vec![
            column("c1", "Title", ColumnType::Text),
            column("c2", "Year", ColumnType::Number),
        ],
        vec![book(1, "Solaris", 1961), book(2, "Ubik", 1969)],
    )
}

/// Records every accepted-batch announcement.
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AcceptanceNotifier for RecordingNotifier {
    async fn notify_accepted(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Delegates to the in-memory backend but can be switched to fail row
/// refetches, to exercise the post-batch refetch failure policy.
struct FlakyFetchBackend {
    inner: Arc<InMemoryTableBackend>,
    fail_fetch: AtomicBool,
}

#[async_trait]
impl TableBackend for FlakyFetchBackend {
    async fn execute_operation(&self, op: &DataOp) -> Result<(), StoreError> {
        self.inner.execute_operation(op).await
    }

    async fn fetch_rows(&self) -> Result<Vec<Row>, StoreError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("fetch unavailable".into()));
        }
        self.inner.fetch_rows().await
    }

    async fn fetch_columns(&self) -> Result<Vec<Column>, StoreError> {
        self.inner.fetch_columns().await
    }

    async fn apply_schema(&self, proposal: &SchemaProposal) -> Result<(), StoreError> {
        self.inner.apply_schema(proposal).await
    }
}

#[tokio::test]
async fn selective_apply_with_partial_failure() {
    let backend = books_backend();
    let mut controller = ProposalController::load(backend.clone(), Arc::new(NullNotifier))
        .await
        .expect("load");

    controller
        .activate_payload(json!({
            "kind": "data",
            "operations": [
                { "op": "add", "fields": { "Title": "Dune", "Year": 1965 } },
                { "op": "update", "row_id": 1, "changes": { "Year": 1970 } },
                { "op": "delete", "row_id": 99 }
            ]
        }))
        .expect("activate");

    // Leave only the add and the (doomed) delete selected.
    controller.toggle_op(1);
    let summary = controller
        .apply()
        .await
        .expect("apply")
        .expect("batch should run");

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.refetch_failed);

    let results = controller.results().expect("active proposal");
    assert_eq!(results[0], OpOutcome::Success);
    // The unchecked update never executes.
    assert_eq!(results[1], OpOutcome::Pending);
    assert!(matches!(results[2], OpOutcome::Failed { .. }));

    // The canonical snapshot was refetched: row 1 is untouched, Dune landed.
    let rows = controller.rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].fields.get("c2"), Some(&json!(1961)));
    assert!(rows.iter().any(|r| r.fields.get("c1") == Some(&json!("Dune"))));
}

#[tokio::test]
async fn done_view_collapses_to_canonical_rows() {
    let backend = books_backend();
    let mut controller = ProposalController::load(backend.clone(), Arc::new(NullNotifier))
        .await
        .expect("load");

    controller
        .activate_payload(json!({
            "kind": "data",
            "operations": [
                { "op": "add", "fields": { "Title": "Dune" } }
            ]
        }))
        .expect("activate");

    // During review the overlay shows the virtual row up front.
    let review = controller.view();
    assert_eq!(review.rows.len(), 3);
    assert_eq!(review.rows[0].id.display_id(), -1);

    let summary = controller.apply().await.expect("apply").expect("ran");
    assert_eq!(summary.succeeded, 1);
    assert!(matches!(controller.phase(), Some(Phase::Done(_))));

    // After done, the overlay is gone: no virtual rows, no metadata, just
    // the refetched canonical rows (which now contain the persisted add).
    let after = controller.view();
    assert_eq!(after.rows.len(), 3);
    assert!(after.rows.iter().all(|r| r.id.display_id() > 0));
    assert!(after.row_meta.is_empty());

    // Done is terminal; only dismissal clears the slot.
    assert!(controller.apply().await.expect("noop").is_none());
    controller.dismiss();
    assert!(controller.active_kind().is_none());
}

#[tokio::test]
async fn clean_accept_notifies_partial_failure_does_not() {
    let backend = books_backend();
    let notifier = RecordingNotifier::new();
    let mut controller = ProposalController::load(backend.clone(), notifier.clone())
        .await
        .expect("load");

    controller
        .activate_payload(json!({
            "kind": "data",
            "operations": [
                { "op": "update", "row_id": 1, "changes": { "Year": 1970 } },
                { "op": "delete", "row_id": 2 }
            ]
        }))
        .expect("activate");
    controller.apply().await.expect("apply").expect("ran");

    {
        let messages = notifier.messages.lock().unwrap();
        assert_eq!(messages.as_slice(), ["Applied 2 of 2 proposed changes"]);
    }

    // A batch with a failure is summarized but never announced as accepted.
    controller
        .activate_payload(json!({
            "kind": "data",
            "operations": [
                { "op": "delete", "row_id": 404 }
            ]
        }))
        .expect("activate");
    let summary = controller.apply().await.expect("apply").expect("ran");
    assert_eq!(summary.failed, 1);
    assert_eq!(notifier.messages.lock().unwrap().len(), 1);
    assert_eq!(
        summary_message(1, &summary),
        "Applied 0 of 1 proposed changes — 1 failed"
    );
}

#[tokio::test]
async fn schema_proposal_applies_atomically() {
    let backend = books_backend();
    let mut controller = ProposalController::load(backend.clone(), Arc::new(NullNotifier))
        .await
        .expect("load");

    controller
        .activate_payload(json!({
            "kind": "schema",
            "table_name": "books",
            "operations": [
                { "op": "add", "column": { "name": "Rating", "type": "number" } },
                { "op": "remove", "column_id": "c2" }
            ]
        }))
        .expect("activate");

    // Review: the removed column is still visible, annotated.
    let review = controller.view();
    assert_eq!(review.columns.len(), 3);
    assert!(review.column_meta.contains_key("c2"));

    let summary = controller.apply().await.expect("apply").expect("ran");
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);

    // Canonical columns were refetched: Year gone, Rating present.
    let after = controller.view();
    let names: Vec<&str> = after.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Title", "Rating"]);
    assert!(after.column_meta.is_empty());
}

#[tokio::test]
async fn refetch_failure_keeps_stale_snapshot_and_flags_it() {
    let inner = books_backend();
    let backend = Arc::new(FlakyFetchBackend {
        inner: inner.clone(),
        fail_fetch: AtomicBool::new(false),
    });
    let mut controller = ProposalController::load(backend.clone(), Arc::new(NullNotifier))
        .await
        .expect("load");

    controller
        .activate_payload(json!({
            "kind": "data",
            "operations": [
                { "op": "add", "fields": { "Title": "Dune" } }
            ]
        }))
        .expect("activate");

    backend.fail_fetch.store(true, Ordering::SeqCst);
    let summary = controller.apply().await.expect("apply").expect("ran");

    assert_eq!(summary.succeeded, 1);
    assert!(summary.refetch_failed);
    // Best-effort stale display: the controller still holds the pre-batch
    // snapshot even though the backend now has three rows.
    assert_eq!(controller.rows().len(), 2);
    assert_eq!(inner.snapshot().await.1.len(), 3);

    let again = controller.apply().await.expect("no error");
    assert!(again.is_none(), "done proposal re-apply is a no-op");
}

#[tokio::test]
async fn dismissing_without_apply_restores_canonical_view() {
    let backend = books_backend();
    let mut controller = ProposalController::load(backend, Arc::new(NullNotifier))
        .await
        .expect("load");

    controller
        .activate_payload(json!({
            "kind": "data",
            "operations": [
                { "op": "delete", "row_id": 1 }
            ]
        }))
        .expect("activate");
    assert_eq!(controller.view().row_meta.len(), 1);

    controller.dismiss();
    let view = controller.view();
    assert!(view.row_meta.is_empty());
    assert_eq!(view.rows.len(), 2);

    let err = controller.apply().await;
    assert!(matches!(err, Err(ProposalError::NoActiveProposal)));
}
