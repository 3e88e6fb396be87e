use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use labarchive::cache::Cache;
use labarchive::config::{ConfigLoader, Settings};
use labarchive::domain::CitationStyle;
use labarchive::error::ArchiveError;
use labarchive::output::{FetchResult, InfoResult, JsonOutput, ListResult};
use labarchive::publish::{PublishRequest, publish};
use labarchive::registry::Registry;

#[derive(Parser)]
#[command(name = "labarchive")]
#[command(about = "Publish dataset releases to Zenodo and fetch them back from the lab registry")]
#[command(version, author)]
struct Cli {
    /// JSON config file (defaults to ./labarchive.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Publish a dataset release and record it in the registry")]
    Publish(PublishArgs),
    #[command(about = "List registered dataset ids")]
    List,
    #[command(about = "Show a registered dataset")]
    Info(DatasetArgs),
    #[command(about = "Print a citation for the latest version")]
    Cite(CiteArgs),
    #[command(about = "Download a version's files into the cache and verify them")]
    Fetch(FetchArgs),
}

#[derive(Args)]
struct PublishArgs {
    dataset_id: String,

    #[arg(long)]
    version: String,

    /// JSON file with Zenodo deposition metadata
    #[arg(long)]
    metadata: PathBuf,

    #[arg(long)]
    registry: Option<PathBuf>,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Args)]
struct DatasetArgs {
    dataset_id: String,
}

#[derive(Args)]
struct CiteArgs {
    dataset_id: String,

    #[arg(long, value_enum, default_value_t = CitationStyle::Text)]
    style: CitationStyle,
}

#[derive(Args)]
struct FetchArgs {
    dataset_id: String,

    #[arg(long)]
    version: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ArchiveError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ArchiveError) -> u8 {
    match error {
        ArchiveError::RegistryNotFound(_)
        | ArchiveError::Configuration(_)
        | ArchiveError::ConfigRead(_)
        | ArchiveError::ConfigParse(_) => 2,
        ArchiveError::ArchiveHttp(_)
        | ArchiveError::ArchiveService { .. }
        | ArchiveError::TransferHttp(_)
        | ArchiveError::Transfer { .. } => 3,
        ArchiveError::ChecksumMismatch { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Publish(args) => run_publish(args, &settings),
        Commands::List => {
            let datasets = Registry::from_settings(&settings).list_ids()?;
            JsonOutput::print_list(&ListResult { datasets }).into_diagnostic()
        }
        Commands::Info(args) => {
            let view = Registry::from_settings(&settings).get(&args.dataset_id)?;
            JsonOutput::print_info(&InfoResult::from(&view)).into_diagnostic()
        }
        Commands::Cite(args) => {
            let view = Registry::from_settings(&settings).get(&args.dataset_id)?;
            println!("{}", view.citation(args.style)?);
            Ok(())
        }
        Commands::Fetch(args) => run_fetch(args, &settings),
    }
}

fn run_publish(args: PublishArgs, settings: &Settings) -> miette::Result<()> {
    settings.token()?;
    let content = fs::read_to_string(&args.metadata)
        .map_err(|_| ArchiveError::ConfigRead(args.metadata.clone()))?;
    let metadata: Map<String, Value> = serde_json::from_str(&content)
        .map_err(|err| ArchiveError::InvalidArgument(format!("metadata file: {err}")))?;

    let result = publish(
        settings,
        PublishRequest {
            dataset_id: args.dataset_id,
            files: args.files,
            metadata,
            version: args.version,
            registry_path: args.registry,
        },
    )?;
    JsonOutput::print_publish(&result).into_diagnostic()
}

fn run_fetch(args: FetchArgs, settings: &Settings) -> miette::Result<()> {
    let view = Registry::from_settings(settings).get(&args.dataset_id)?;
    let version = match args.version.as_deref() {
        Some(version) => view.version(version)?.version.clone(),
        None => view.latest()?.version.clone(),
    };
    let cache = Cache::from_settings(settings)?;
    let files = view.fetch(Some(&version), &cache)?;
    JsonOutput::print_fetch(&FetchResult {
        dataset_id: args.dataset_id,
        version,
        files,
    })
    .into_diagnostic()
}
