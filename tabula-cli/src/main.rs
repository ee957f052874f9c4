use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};

use tabula_proposal::{summary_message, ProposalController, TableView};
use tabula_store::{AcceptanceNotifier, InMemoryTableBackend};
use tabula_types::{Column, ColumnMeta, ColumnType, FieldMap, OpOutcome, Row, RowMeta};

#[derive(Parser)]
#[command(name = "tabula")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted review/apply session against a built-in table.
    Demo,
    /// Overlay a proposal file on a table fixture, optionally applying it.
    Review {
        #[arg(long)]
        table: PathBuf,
        #[arg(long)]
        proposal: PathBuf,
        #[arg(long)]
        apply: bool,
    },
}

/// Table fixture loaded from YAML: canonical columns plus seed rows.
#[derive(Debug, Deserialize)]
struct TableFixture {
    columns: Vec<Column>,
    #[serde(default)]
    rows: Vec<Row>,
}

/// Notifier that plays the transcript channel: prints the announcement.
struct PrintlnNotifier;

#[async_trait]
impl AcceptanceNotifier for PrintlnNotifier {
    async fn notify_accepted(&self, message: &str) {
        println!(">> {message}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo => demo().await,
        Command::Review {
            table,
            proposal,
            apply,
        } => review(&table, &proposal, apply).await,
    }
}

async fn demo() -> anyhow::Result<()> {
    let backend = InMemoryTableBackend::shared(demo_columns(), demo_rows());
    let mut controller =
        ProposalController::load(backend, Arc::new(PrintlnNotifier)).await?;

    println!("# canonical table");
    print_view(&controller.view());

    controller.activate_payload(json!({
        "kind": "data",
        "reasoning": "fill in the missing classics and fix Ubik's year",
        "operations": [
            { "op": "add", "fields": { "Title": "Dune", "Year": 1965, "Read": false } },
            { "op": "update", "row_id": 2, "changes": { "Year": 1969 } },
            { "op": "delete", "row_id": 3 }
        ]
    }))?;

    println!("\n# proposed data changes");
    if let Some(reasoning) = controller.reasoning() {
        println!("reasoning: {reasoning}");
    }
    print_view(&controller.view());

    apply_and_report(&mut controller).await?;
    println!("\n# table after apply");
    print_view(&controller.view());
    controller.dismiss();

    controller.activate_payload(json!({
        "kind": "schema",
        "table_name": "books",
        "operations": [
            { "op": "add", "column": { "name": "Rating", "type": "number" } },
            { "op": "remove", "column_id": "c3" }
        ]
    }))?;

    println!("\n# proposed schema changes");
    print_view(&controller.view());

    apply_and_report(&mut controller).await?;
    println!("\n# table after schema apply");
    print_view(&controller.view());
    controller.dismiss();

    Ok(())
}

async fn review(table: &Path, proposal: &Path, apply: bool) -> anyhow::Result<()> {
    let fixture: TableFixture = serde_yaml::from_str(&std::fs::read_to_string(table)?)?;
    let backend = InMemoryTableBackend::shared(fixture.columns, fixture.rows);
    let mut controller =
        ProposalController::load(backend, Arc::new(PrintlnNotifier)).await?;

    controller.activate_payload(load_payload(proposal)?)?;
    print_view(&controller.view());

    if apply {
        apply_and_report(&mut controller).await?;
        println!("\n# table after apply");
        print_view(&controller.view());
    }
    Ok(())
}

/// Proposal payloads arrive as JSON from the generator; on disk we accept
/// YAML too and funnel both through the same payload validation.
fn load_payload(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)?;
    let payload = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)?,
        _ => serde_yaml::from_str(&text)?,
    };
    Ok(payload)
}

async fn apply_and_report(controller: &mut ProposalController) -> anyhow::Result<()> {
    let total = controller.op_count();
    let Some(summary) = controller.apply().await? else {
        println!("nothing selected; nothing applied");
        return Ok(());
    };

    if let Some(results) = controller.results() {
        for (index, outcome) in results.iter().enumerate() {
            println!("  op {index}: {}", describe_outcome(outcome));
        }
    }
    println!("{}", summary_message(total, &summary));
    if summary.refetch_failed {
        println!("warning: table refresh failed; showing last known rows");
    }
    Ok(())
}

fn describe_outcome(outcome: &OpOutcome) -> String {
    match outcome {
        OpOutcome::Pending => "skipped".to_string(),
        OpOutcome::Running => "running".to_string(),
        OpOutcome::Success => "ok".to_string(),
        OpOutcome::Failed { message } => format!("failed: {message}"),
    }
}

fn print_view(view: &TableView) {
    let header: Vec<String> = view
        .columns
        .iter()
        .map(|c| {
            let marker = match view.column_meta.get(&c.id) {
                Some(ColumnMeta::Added) => "+",
                Some(ColumnMeta::Removed) => "-",
                Some(ColumnMeta::Modified { .. }) => "~",
                None => "",
            };
            format!("{marker}{}", c.name)
        })
        .collect();
    println!("| id | {} |", header.join(" | "));

    for row in &view.rows {
        let marker = match view.row_meta.get(&row.id) {
            Some(RowMeta::Added { .. }) => "+",
            Some(RowMeta::Updated { .. }) => "~",
            Some(RowMeta::Deleted { .. }) => "-",
            None => " ",
        };
        let cells: Vec<String> = view
            .columns
            .iter()
            .map(|c| format_cell(&row.fields, &c.id))
            .collect();
        print!("|{marker}{} | {} |", row.id.display_id(), cells.join(" | "));
        if let Some(RowMeta::Updated { old_values, .. }) = view.row_meta.get(&row.id) {
            let was: Vec<String> = old_values
                .iter()
                .map(|(key, value)| format!("{key}: {}", format_value(value)))
                .collect();
            print!("  (was {})", was.join(", "));
        }
        println!();
    }
}

fn format_cell(fields: &FieldMap, column_id: &str) -> String {
    fields.get(column_id).map(format_value).unwrap_or_default()
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn demo_columns() -> Vec<Column> {
    let column = |id: &str, name: &str, column_type| Column {
        id: id.to_string(),
        name: name.to_string(),
        column_type,
        required: false,
        default_value: None,
        options: None,
        display_hint: None,
    };
    vec![
        column("c1", "Title", ColumnType::Text),
        column("c2", "Year", ColumnType::Number),
        column("c3", "Read", ColumnType::Boolean),
    ]
}

fn demo_rows() -> Vec<Row> {
    let book = |id: i64, title: &str, year: i64, read: bool| {
        let mut fields = FieldMap::new();
        fields.insert("c1".to_string(), json!(title));
        fields.insert("c2".to_string(), json!(year));
        fields.insert("c3".to_string(), json!(read));
        Row {
            id,
            parent_id: 0,
            fields,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    };
    vec![
        book(1, "Solaris", 1961, true),
        book(2, "Ubik", 1970, false),
        book(3, "Duplicate Ubik", 1970, false),
    ]
}
