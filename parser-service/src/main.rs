use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowdoc_parser::analysis::{load_environments, scan_dwl_files, scan_model};
use flowdoc_parser::{CrossReferenceIndex, DocumentationBundle, ParsingConfig, ParsingService};

/// Where environment property files live in a standard project layout
const DEFAULT_ENVIRONMENTS_DIR: &str = "src/main/resources";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory, single configuration file, or .jar/.zip package
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for the documentation bundle
    #[arg(short, long)]
    output: PathBuf,

    /// Application name shown in the documentation
    #[arg(short, long, default_value = "MuleSoft Application")]
    name: String,

    /// Embed the raw configuration sources
    #[arg(long)]
    include_code: bool,

    /// Summarize DataWeave scripts and compare environments
    #[arg(long)]
    detailed_analysis: bool,

    /// Parser configuration file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of <env>.yaml property files
    #[arg(long)]
    environments: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// File patterns to include
    #[arg(long)]
    include: Vec<String>,

    /// File patterns to exclude
    #[arg(long)]
    exclude: Vec<String>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.debug);

    info!("Flowdoc v{}", env!("CARGO_PKG_VERSION"));
    info!("Input: {:?}", cli.input);

    // Expand home directory in paths
    let input = expand_home_dir(&cli.input)?;
    let output = expand_home_dir(&cli.output)?;

    let config = build_config(&cli)?;
    info!("Using {} worker threads", config.worker_count());
    let service = ParsingService::new(config)?;

    let start = std::time::Instant::now();
    let application = service.parse_application(&input, &cli.name)?;
    let xref = CrossReferenceIndex::resolve(&application.model, &service.config().flow_ref_rules);
    let mut bundle = DocumentationBundle::assemble(application, xref);

    if cli.detailed_analysis {
        let mut transformations = scan_model(&bundle.model);
        if input.is_dir() {
            transformations.extend(scan_dwl_files(&input)?);
        }
        bundle = bundle.with_transformations(transformations);
    }

    if let Some(dir) = environments_dir(&cli, &input)? {
        info!("Loading environments from {}", dir.display());
        bundle = bundle.with_environments(load_environments(&dir)?);
    }

    let written = bundle.write_to(&output)?;
    let duration = start.elapsed();

    // Print summary
    let report = &bundle.report;
    let stats = &bundle.cross_references.statistics;
    println!("\n=== Parse Summary ===");
    if let Some(coordinates) = bundle.metadata.coordinates() {
        println!("Artifact: {}", coordinates);
    }
    println!("Purpose: {}", bundle.purpose);
    println!("Documents parsed: {} of {}", report.documents_parsed, report.documents_found);
    println!("Flows: {} ({} source, {} sub-flows, {} other)",
        stats.total_flows, stats.source_flows, stats.subflows, stats.intermediate_flows);
    println!("Global configs: {}", bundle.model.global_configs.len());
    println!("Reference edges: {}", bundle.cross_references.edge_count());
    println!("Flows without error handling: {}", stats.flows_without_handlers);
    println!("Try scopes: {} ({} without a handler)",
        stats.try_scopes.total, stats.try_scopes.without_handler);
    println!("Transformations: {}", bundle.transformations.len());
    println!("Environments: {}", bundle.environments.len());
    println!("Total time: {:.2}s", duration.as_secs_f64());
    for path in &written {
        println!("Wrote {}", path.display());
    }

    if !report.failures.is_empty() {
        warn!("{} documents had parse errors:", report.failures.len());
        for failure in report.failures.iter().take(10) {
            warn!("  {}: {}", failure.file_name, failure.error);
        }
        if report.failures.len() > 10 {
            warn!("  ... and {} more", report.failures.len() - 10);
        }
    }
    for duplicate in &report.duplicate_flows {
        warn!(
            "Duplicate flow '{}': kept {}, ignored {}",
            duplicate.flow_id, duplicate.first_file, duplicate.duplicate_file
        );
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<ParsingConfig> {
    let mut config = match &cli.config {
        Some(path) => ParsingConfig::from_yaml_file(&expand_home_dir(path)?)?,
        None => ParsingConfig::default(),
    };
    if cli.workers.is_some() {
        config.workers = cli.workers;
    }
    config.include.extend(cli.include.iter().cloned());
    config.exclude.extend(cli.exclude.iter().cloned());
    config.keep_sources |= cli.include_code;
    Ok(config)
}

/// The explicit `--environments` directory, or the project's resources
/// directory when running a detailed analysis
fn environments_dir(cli: &Cli, input: &Path) -> Result<Option<PathBuf>> {
    if let Some(dir) = &cli.environments {
        return Ok(Some(expand_home_dir(dir)?));
    }
    let default = input.join(DEFAULT_ENVIRONMENTS_DIR);
    Ok((cli.detailed_analysis && default.is_dir()).then_some(default))
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "flowdoc_parser=debug,flowdoc=debug,info"
    } else {
        "flowdoc_parser=info,flowdoc=info,warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn expand_home_dir(path: &Path) -> Result<PathBuf> {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return Ok(home.join(rest));
            }
        }
    }
    Ok(path.to_path_buf())
}
