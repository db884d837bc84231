//! CLI for the fundametrics valuation engine.
//!
//! `run` executes the full pipeline for the configured entity types;
//! `list` shows the formula registries; `validate` checks a registry file
//! for syntax and dependency cycles without touching any data.

use clap::{Parser, Subcommand};
use fundametrics::{
    EngineConfig, EntityType, FileFactSource, FormulaRegistry, ParquetSink, Pipeline,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fundametrics")]
#[command(about = "Fundamental metrics and point-in-time valuation engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and publish output datasets
    Run {
        /// Directory holding input tables
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Directory receiving output datasets
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
        /// Comma-separated entity types (default: all)
        #[arg(long)]
        entity: Option<String>,
        /// Engine configuration file (JSON); flags override its paths
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List the formula registries
    List {
        /// Restrict to one entity type
        #[arg(long)]
        entity: Option<String>,
    },
    /// Validate a formula registry file
    Validate {
        /// Entity type the registry is scoped to
        #[arg(long)]
        entity: String,
        /// Registry file (JSON array of formula specs)
        #[arg(long)]
        registry: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            data_dir,
            out_dir,
            entity,
            config,
        } => run(data_dir, out_dir, entity.as_deref(), config),
        Commands::List { entity } => list(entity.as_deref()),
        Commands::Validate { entity, registry } => validate(&entity, &registry),
    }
}

fn parse_entity(name: &str) -> EntityType {
    name.trim().parse().unwrap_or_else(|err: String| {
        eprintln!("Error: {err}");
        eprintln!(
            "Valid entity types: {}",
            EntityType::ALL.map(|e| e.as_str()).join(", ")
        );
        std::process::exit(2);
    })
}

fn run(data_dir: PathBuf, out_dir: PathBuf, entity: Option<&str>, config_file: Option<PathBuf>) {
    let mut config = match config_file {
        Some(path) => EngineConfig::from_json_file(&path).unwrap_or_else(|err| {
            eprintln!("Error loading {}: {err}", path.display());
            std::process::exit(2);
        }),
        None => EngineConfig::default(),
    };
    config.data_dir = data_dir;
    config.out_dir = out_dir;
    if let Some(entities) = entity {
        config.entities = entities.split(',').map(parse_entity).collect();
    }

    let source = FileFactSource::new(&config.data_dir);
    let sink = ParquetSink::new(&config.out_dir);
    let pipeline = Pipeline::new(&config, &source, &sink);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("static template"),
    );
    spinner.set_message("running pipeline...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let reports = pipeline.run();
    spinner.finish_and_clear();

    let reports = reports.unwrap_or_else(|err| {
        eprintln!("Error: {err}");
        std::process::exit(1);
    });

    let mut failures = 0usize;
    for report in &reports {
        match &report.outcome {
            Ok(stats) => {
                println!(
                    "{}: {} symbols, {} statement rows",
                    report.entity_type, stats.symbols, stats.statement_rows
                );
                for (ratio, rows) in &stats.valuation_rows {
                    println!("  {ratio}: {rows} observations");
                }
            }
            Err(err) => {
                failures += 1;
                println!("{}: FAILED ({err})", report.entity_type);
            }
        }
    }
    if failures == reports.len() {
        std::process::exit(1);
    }
}

fn list(entity: Option<&str>) {
    let entities: Vec<EntityType> = match entity {
        Some(name) => vec![parse_entity(name)],
        None => EntityType::ALL.to_vec(),
    };

    for entity in entities {
        let registry = FormulaRegistry::with_defaults(entity).unwrap_or_else(|err| {
            eprintln!("Error: {err}");
            std::process::exit(1);
        });
        println!("{entity} ({} derived metrics):", registry.len());
        for info in registry.all_info() {
            let unit = if info.unit.is_empty() {
                String::new()
            } else {
                format!(" [{}]", info.unit)
            };
            println!("  {}{unit} = {}", info.name, info.expr);
            println!("    inputs: {}", info.inputs.join(", "));
        }
        println!();
    }
}

fn validate(entity: &str, registry: &std::path::Path) {
    let entity = parse_entity(entity);
    match FormulaRegistry::from_json_file(entity, registry) {
        Ok(registry) => {
            println!(
                "OK: {} formulas, evaluation order: {}",
                registry.len(),
                registry.names().join(" -> ")
            );
        }
        Err(err) => {
            eprintln!("Invalid registry: {err}");
            std::process::exit(1);
        }
    }
}
