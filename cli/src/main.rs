//! Controlmap CLI: runs mapping batches and reviews their edges
//!
//! Works directly against the RocksDB store named by `data_dir` in the config file.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use controlmap::graph::{
    Control, ControlId, EdgeId, MappingEdge, PropertyValue, RelationKind, Standard,
};
use controlmap::{
    AppConfig, CancelSignal, ControlRepository, GraphRepository, MappingPipeline, PipelineError,
    ReviewService, RunRequest, RunSummary,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "controlmap", version, about = "Semantic mapping of cybersecurity controls")]
struct Cli {
    /// YAML configuration file
    #[arg(long, default_value = "controlmap.yaml", global = true, env = "CONTROLMAP_CONFIG")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Map source controls against target standards
    Run {
        /// Map every control of this standard
        #[arg(long, conflicts_with = "control", required_unless_present = "control")]
        standard: Option<String>,

        /// Map these controls (repeatable)
        #[arg(long)]
        control: Vec<String>,

        /// Target standards (repeatable); defaults to run.target_standards
        #[arg(long)]
        target: Vec<String>,
    },
    /// List mapping edges of a control
    Edges {
        control: String,

        /// Include superseded edges
        #[arg(long)]
        history: bool,
    },
    /// Review a mapping edge
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
    /// Show store statistics
    Status,
    /// Import a standard and its controls from a YAML catalog
    Import { catalog: PathBuf },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// Accept the edge as-is
    Confirm { edge: u64 },
    /// Replace the edge with an analyst judgment
    Revise {
        edge: u64,
        #[arg(long)]
        kind: String,
        #[arg(long)]
        rationale: String,
    },
    /// Supersede the edge without replacement
    Reject { edge: u64 },
}

#[derive(Deserialize)]
struct Catalog {
    standard: CatalogStandard,
    #[serde(default)]
    controls: Vec<CatalogControl>,
}

#[derive(Deserialize)]
struct CatalogStandard {
    id: String,
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct CatalogControl {
    id: String,
    text: String,
    title: Option<String>,
    category: Option<String>,
    criticality: Option<String>,
    /// Further catalog fields, shown to the verifier as metadata
    #[serde(default)]
    properties: BTreeMap<String, CatalogValue>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl From<CatalogValue> for PropertyValue {
    fn from(value: CatalogValue) -> Self {
        match value {
            CatalogValue::Boolean(b) => b.into(),
            CatalogValue::Integer(i) => i.into(),
            CatalogValue::Float(f) => f.into(),
            CatalogValue::Text(s) => s.into(),
            CatalogValue::List(items) => items.into(),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate_services()?;

    let repository = Arc::new(
        GraphRepository::open(&config.data_dir)
            .with_context(|| format!("opening store at {}", config.data_dir.display()))?,
    );

    let result = match cli.command {
        Commands::Run {
            standard,
            control,
            target,
        } => {
            let request = match standard {
                Some(standard) => RunRequest::standard(standard),
                None => RunRequest::controls(control),
            }
            .with_targets(target);
            run_pipeline(&config, Arc::clone(&repository), request, &cli.format).await
        }
        Commands::Edges { control, history } => {
            show_edges(repository.as_ref(), &ControlId::new(control), history, &cli.format).await
        }
        Commands::Review { action } => review(Arc::clone(&repository), action, &cli.format).await,
        Commands::Status => show_status(repository.as_ref(), &cli.format).await,
        Commands::Import { catalog } => import_catalog(repository.as_ref(), &catalog).await,
    };

    repository.flush().await?;
    result
}

async fn run_pipeline(
    config: &AppConfig,
    repository: Arc<GraphRepository>,
    request: RunRequest,
    format: &OutputFormat,
) -> Result<()> {
    let pipeline = MappingPipeline::from_config(config, repository)?;

    let cancel = CancelSignal::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    match pipeline.run(request, &cancel).await {
        Ok(summary) => print_summary(&summary, format),
        Err(PipelineError::SystemicFailure { summary, .. }) => {
            print_summary(&summary, format)?;
            Err(anyhow!(
                "verification service is failing consistently; run halted after {} control(s)",
                summary.controls_processed
            ))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_summary(summary: &RunSummary, format: &OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Run:        {}", summary.run_id);
    println!("Verifier:   {}", summary.verifier);
    println!("Embeddings: {}", summary.embedding_model_version);
    println!();

    let mut totals = Table::new();
    totals.set_header(vec!["metric", "count"]);
    for (metric, count) in [
        ("controls processed", summary.controls_processed),
        ("controls succeeded", summary.controls_succeeded),
        ("controls partial", summary.controls_partial),
        ("controls failed", summary.controls_failed),
        ("controls cancelled", summary.controls_cancelled),
        ("controls skipped", summary.controls_skipped),
        ("candidates generated", summary.candidates_generated),
        ("candidates verified", summary.candidates_verified),
        ("verification retries", summary.verification_retries),
        ("low-trust judgments", summary.low_trust_judgments),
        ("edges created", summary.edges_created),
        ("edges superseded", summary.edges_superseded),
        ("edges unchanged", summary.edges_unchanged),
        ("edges protected", summary.edges_protected),
    ] {
        totals.add_row(vec![metric.to_string(), count.to_string()]);
    }
    println!("{}", totals);

    if !summary.failures_by_category.is_empty() {
        let mut failures = Table::new();
        failures.set_content_arrangement(ContentArrangement::Dynamic);
        failures.set_header(vec!["control", "category", "target", "message"]);
        for report in &summary.controls {
            for failure in &report.failures {
                failures.add_row(vec![
                    report.control.to_string(),
                    failure.category.to_string(),
                    failure
                        .target
                        .as_ref()
                        .map(|t| t.to_string())
                        .unwrap_or_default(),
                    failure.message.clone(),
                ]);
            }
        }
        println!("{}", failures);
    }

    Ok(())
}

async fn show_edges(
    repository: &GraphRepository,
    control: &ControlId,
    history: bool,
    format: &OutputFormat,
) -> Result<()> {
    let edges: Vec<MappingEdge> = repository
        .get_edges(control)
        .await?
        .into_iter()
        .filter(|e| history || e.is_active())
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&edges)?),
        OutputFormat::Table => {
            if edges.is_empty() {
                println!("(no edges)");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec![
                "id", "target", "kind", "confidence", "status", "method", "verifier", "state",
                "rationale",
            ]);
            for edge in &edges {
                table.add_row(edge_row(edge));
            }
            println!("{}", table);
            println!("{} edge(s)", edges.len());
        }
    }
    Ok(())
}

fn edge_row(edge: &MappingEdge) -> Vec<String> {
    let mut confidence = format!("{:.2}", edge.confidence);
    if edge.low_trust {
        confidence.push_str(" (low trust)");
    }
    vec![
        edge.id.as_u64().to_string(),
        edge.target.to_string(),
        edge.kind.to_string(),
        confidence,
        edge.status.as_str().to_string(),
        edge.method.as_str().to_string(),
        edge.verifier.to_string(),
        if edge.is_active() { "active" } else { "superseded" }.to_string(),
        edge.rationale.clone(),
    ]
}

async fn review(
    repository: Arc<GraphRepository>,
    action: ReviewAction,
    format: &OutputFormat,
) -> Result<()> {
    let service = ReviewService::new(repository);
    let edge = match action {
        ReviewAction::Confirm { edge } => service.confirm(EdgeId::new(edge)).await?,
        ReviewAction::Revise {
            edge,
            kind,
            rationale,
        } => {
            let kind: RelationKind = kind.parse()?;
            service.revise(EdgeId::new(edge), kind, rationale).await?
        }
        ReviewAction::Reject { edge } => service.reject(EdgeId::new(edge)).await?,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&edge)?),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_header(vec![
                "id", "target", "kind", "confidence", "status", "method", "verifier", "state",
                "rationale",
            ]);
            table.add_row(edge_row(&edge));
            println!("{}", table);
        }
    }
    Ok(())
}

async fn show_status(repository: &GraphRepository, format: &OutputFormat) -> Result<()> {
    let stats = repository.statistics().await?;
    let embeddings = match repository.storage() {
        Some(storage) => storage.embedding_count()?,
        None => 0,
    };

    match format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(&stats)?;
            value["cached_embeddings"] = embeddings.into();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Table => {
            println!("Version:           {}", controlmap::version());
            println!("Standards:         {}", stats.standards);
            println!("Controls:          {}", stats.controls);
            println!("Active edges:      {}", stats.active_edges);
            println!("Superseded edges:  {}", stats.superseded_edges);
            println!("Cached embeddings: {}", embeddings);
        }
    }
    Ok(())
}

async fn import_catalog(repository: &GraphRepository, path: &Path) -> Result<()> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    let catalog: Catalog = serde_yaml::from_str(&yaml)?;
    if catalog.standard.id.trim().is_empty() {
        bail!("catalog standard id must not be empty");
    }

    let standard = Standard::new(
        catalog.standard.id.as_str(),
        catalog.standard.name,
        catalog.standard.version,
    );
    let controls: Vec<Control> = catalog
        .controls
        .into_iter()
        .map(|c| {
            let mut control = Control::new(c.id, standard.id.clone(), c.text);
            if let Some(title) = c.title {
                control = control.with_title(title);
            }
            if let Some(category) = c.category {
                control = control.with_category(category);
            }
            if let Some(criticality) = c.criticality {
                control = control.with_criticality(criticality);
            }
            for (key, value) in c.properties {
                control = control.with_property(key, value);
            }
            control
        })
        .collect();

    let total = controls.len();
    let imported = repository.import_standard(standard, controls).await?;
    info!(catalog = %path.display(), imported, total, "catalog imported");
    println!("Imported {} of {} control(s)", imported, total);
    Ok(())
}
