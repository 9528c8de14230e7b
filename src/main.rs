use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use filevault::database::error::StoreError;
use filevault::database::migrate::mysql_bootstrap_script;
use filevault::database::records::{
    NewAnalyticsResult, NewFile, NewProcessedData, NewQualityMetric,
};
use filevault::database::repo::Store;
use filevault::ingest::register::file_from_path;
use filevault::utils::config::{load_dotenv, ServiceArgs, StoreArgs};
use filevault::utils::ids::generate_id;

#[derive(Parser, Debug)]
#[command(author, version, about = "Schema bootstrap and record store for uploaded files", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create any missing tables and verify existing ones.
    Migrate,

    /// Write an idempotent MySQL script: database, service account, grant and tables.
    BootstrapSql {
        #[command(flatten)]
        service: ServiceArgs,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store a local file as a File row.
    Register {
        path: PathBuf,

        #[arg(long, default_value = "upload")]
        source_type: String,

        #[arg(long)]
        file_id: Option<String>,
    },

    /// Insert rows from a JSON object or array (stdin when no input is given).
    Insert {
        #[arg(value_enum)]
        kind: RecordKind,

        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    MarkProcessed {
        file_id: String,
    },

    /// Print a row as JSON. Files include their processed data, analytics and quality checks.
    Show {
        id: String,

        #[arg(long, value_enum, default_value = "file")]
        kind: ShowKind,
    },

    List {
        #[arg(long, conflicts_with = "pending")]
        processed: bool,

        #[arg(long)]
        pending: bool,
    },

    /// Delete a row. Refused while dependent rows exist.
    Delete {
        #[arg(value_enum)]
        kind: DeleteKind,

        id: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RecordKind {
    File,
    ProcessedData,
    AnalyticsResult,
    QualityMetric,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ShowKind {
    File,
    ProcessedData,
    AnalyticsResult,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DeleteKind {
    File,
    ProcessedData,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run() {
        error!("{:#}", e);
        // Rejected input exits 2 so supervisors can tell it from an unusable store.
        let code = match e.downcast_ref::<StoreError>() {
            Some(err) if err.is_validation() => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    load_dotenv(Path::new(".env"))?;
    let cli = Cli::parse();

    if let Command::BootstrapSql { service, output } = &cli.command {
        return write_bootstrap(service, output.as_deref());
    }

    let mut store = Store::open(&cli.store.db_path)
        .with_context(|| format!("Failed to open store at {:?}", cli.store.db_path))?;
    run_with_store(&mut store, cli.command)
}

fn write_bootstrap(service: &ServiceArgs, output: Option<&Path>) -> Result<()> {
    let plan = service.provision_plan()?;
    let script = mysql_bootstrap_script(&plan)?;
    match output {
        Some(path) => {
            fs::write(path, script).with_context(|| format!("Failed to write {:?}", path))?;
            info!("Bootstrap script written to {:?}", path);
        }
        None => print!("{script}"),
    }
    Ok(())
}

fn run_with_store(store: &mut Store, command: Command) -> Result<()> {
    match command {
        Command::BootstrapSql { .. } => bail!("bootstrap-sql does not use the store"),
        Command::Migrate => {
            let report = store.schema_report();
            info!(
                "Schema ready: {} created, {} already present",
                report.created.len(),
                report.existing.len()
            );
        }
        Command::Register {
            path,
            source_type,
            file_id,
        } => {
            let file = file_from_path(&path, &source_type, file_id)?;
            store.insert_file(&file)?;
            info!("Registered {:?} as {}", path, file.file_id);
            println!("{}", file.file_id);
        }
        Command::Insert { kind, input } => {
            let rows = read_rows(input.as_deref())?;
            let count = insert_rows(store, kind, rows)?;
            info!("Inserted {} {:?} row(s)", count, kind);
        }
        Command::MarkProcessed { file_id } => store.mark_processed(&file_id)?,
        Command::Show { id, kind } => {
            let view = show(store, kind, &id)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::List { processed, pending } => {
            let filter = match (processed, pending) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let files = store.list_files(filter)?;
            println!("{}", serde_json::to_string_pretty(&files)?);
        }
        Command::Delete { kind, id } => match kind {
            DeleteKind::File => store.delete_file(&id)?,
            DeleteKind::ProcessedData => store.delete_processed_data(&id)?,
        },
    }
    Ok(())
}

fn show(store: &Store, kind: ShowKind, id: &str) -> Result<Value> {
    let view = match kind {
        ShowKind::File => {
            let Some(found) = store.file_with_data(id)? else {
                bail!("File {} not found", id);
            };
            let mut processed = Vec::with_capacity(found.processed_data.len());
            for data in &found.processed_data {
                let analytics = store.analytics_for_data(&data.data_id)?;
                processed.push(json!({ "data": data, "analytics": analytics }));
            }
            json!({
                "file": found.file,
                "processed_data": processed,
                "quality_metrics": store.quality_metrics_for_file(id)?,
            })
        }
        ShowKind::ProcessedData => match store.get_processed_data(id)? {
            Some(data) => json!(data),
            None => bail!("Processed data {} not found", id),
        },
        ShowKind::AnalyticsResult => match store.get_analytics_result(id)? {
            Some(result) => json!(result),
            None => bail!("Analytics result {} not found", id),
        },
    };
    Ok(view)
}

fn read_rows(input: Option<&Path>) -> Result<Vec<Value>> {
    let raw = match input {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?
        }
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("Failed to read stdin")?;
            buf
        }
    };

    let parsed: Value = serde_json::from_str(&raw).context("Input is not valid JSON")?;
    match parsed {
        Value::Array(rows) => Ok(rows),
        row @ Value::Object(_) => Ok(vec![row]),
        _ => bail!("Expected a JSON object or an array of objects"),
    }
}

/// Every kind lands as one transaction, so a bad row leaves nothing behind.
fn insert_rows(store: &mut Store, kind: RecordKind, rows: Vec<Value>) -> Result<usize> {
    let count = match kind {
        RecordKind::File => store.insert_files(&parse_rows::<NewFile>(rows, "file_id", "file")?)?,
        RecordKind::ProcessedData => store.insert_processed_data_batch(&parse_rows::<
            NewProcessedData,
        >(rows, "data_id", "data")?)?,
        RecordKind::AnalyticsResult => store.insert_analytics_results(&parse_rows::<
            NewAnalyticsResult,
        >(rows, "analysis_id", "analysis")?)?,
        RecordKind::QualityMetric => store.insert_quality_metrics(&parse_rows::<
            NewQualityMetric,
        >(rows, "metric_id", "metric")?)?,
    };
    Ok(count)
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>, key: &str, prefix: &str) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| parse_row(row, key, prefix))
        .collect()
}

/// Deserializes one row, generating its key when the input leaves it out.
fn parse_row<T: DeserializeOwned>(mut row: Value, key: &str, prefix: &str) -> Result<T> {
    if let Value::Object(fields) = &mut row {
        fields
            .entry(key)
            .or_insert_with(|| Value::String(generate_id(prefix)));
    }
    serde_json::from_value(row).with_context(|| format!("Invalid {} row", prefix))
}
