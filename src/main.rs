//! assetreg - Incrementally maintained asset metadata index.
//!
//! Usage:
//!   assetreg scan PATH        Gather a content directory and print a summary
//!   assetreg info SNAPSHOT    Summarize a saved snapshot
//!   assetreg deps SNAPSHOT ID Show what an asset depends on
//!   assetreg refs SNAPSHOT ID Show what references an asset
//!   assetreg find SNAPSHOT    Filter the assets in a snapshot
//!   assetreg --help           Show help

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use tracing::info;
use tracing_subscriber::EnvFilter;

use assetreg_core::{
    AssetFilter, AssetIdentifier, DependencyCategory, DependencyProperties, DependencyQuery,
    RegistryConfig, StaticTypeRegistry, TagPredicate,
};
use assetreg_index::SaveOptions;
use assetreg_registry::{RegistryController, ScanFlags};

#[derive(Parser)]
#[command(
    name = "assetreg",
    version,
    about = "Index asset metadata and dependencies under mounted content directories",
    long_about = "assetreg gathers container manifests from mounted directories into an \
                  in-memory index of assets, paths and dependencies.\n\n\
                  Use `assetreg scan` to build a snapshot, then query it with \
                  `info`, `deps`, `refs` and `find`."
)]
struct Cli {
    /// Registry configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Gather a content directory
    Scan {
        /// Directory to mount
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Namespace root for the mount
        #[arg(short, long, default_value = "/Game")]
        namespace: String,

        /// Gather on background workers instead of the calling thread
        #[arg(short, long)]
        background: bool,

        /// Give up waiting for background gathering after this many seconds
        #[arg(long, default_value = "600")]
        timeout: u64,

        /// Write a snapshot here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Leave dependency edges out of the snapshot
        #[arg(long)]
        no_dependencies: bool,
    },

    /// Summarize a snapshot
    Info {
        snapshot: PathBuf,

        /// Number of asset types to list
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,
    },

    /// Show the dependencies of an asset
    Deps {
        snapshot: PathBuf,

        /// Asset identifier, e.g. /Game/Maps/L1 or /Game/Maps/L1.L1
        id: String,

        /// Restrict to one category
        #[arg(long)]
        category: Option<CategoryArg>,

        /// Only hard edges
        #[arg(long)]
        hard: bool,
    },

    /// Show the referencers of an asset
    Refs {
        snapshot: PathBuf,

        /// Asset identifier
        id: String,

        /// Restrict to one category
        #[arg(long)]
        category: Option<CategoryArg>,

        /// Only hard edges
        #[arg(long)]
        hard: bool,
    },

    /// Filter the assets in a snapshot
    Find {
        snapshot: PathBuf,

        /// Asset type (repeatable)
        #[arg(short = 't', long = "type")]
        types: Vec<String>,

        /// Include subclasses of each type
        #[arg(short, long)]
        recursive: bool,

        /// Exclude a type (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Package path prefix (searched recursively)
        #[arg(short, long)]
        path: Option<String>,

        /// Tag predicate, KEY or KEY=VALUE (repeatable)
        #[arg(long)]
        tag: Vec<String>,

        /// Maximum number of results to print
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CategoryArg {
    Content,
    SearchableName,
    Manage,
}

impl From<CategoryArg> for DependencyCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Content => DependencyCategory::Content,
            CategoryArg::SearchableName => DependencyCategory::SearchableName,
            CategoryArg::Manage => DependencyCategory::Manage,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Scan {
            path,
            namespace,
            background,
            timeout,
            output,
            no_dependencies,
        } => {
            let save = output.map(|path| {
                let options = SaveOptions {
                    include_dependencies: !no_dependencies,
                    ..SaveOptions::default()
                };
                (path, options)
            });
            run_scan(config, &path, &namespace, background, Duration::from_secs(timeout), save, cli.format)?;
        }
        Command::Info { snapshot, top } => run_info(config, &snapshot, top, cli.format)?,
        Command::Deps {
            snapshot,
            id,
            category,
            hard,
        } => run_edges(config, &snapshot, &id, edge_query(category, hard), false, cli.format)?,
        Command::Refs {
            snapshot,
            id,
            category,
            hard,
        } => run_edges(config, &snapshot, &id, edge_query(category, hard), true, cli.format)?,
        Command::Find {
            snapshot,
            types,
            recursive,
            exclude,
            path,
            tag,
            limit,
        } => {
            let mut filter = AssetFilter::new();
            for ty in types {
                filter = filter.with_type(ty, recursive);
            }
            for ty in exclude {
                filter = filter.without_type(ty);
            }
            if let Some(path) = path {
                filter = filter.with_package_path(&path, true);
            }
            for predicate in tag {
                filter = filter.with_tag(match predicate.split_once('=') {
                    Some((key, value)) => TagPredicate::equals(key, value),
                    None => TagPredicate::exists(predicate),
                });
            }
            run_find(config, &snapshot, &filter, limit, cli.format)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RegistryConfig> {
    let Some(path) = path else {
        return Ok(RegistryConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
    let config: RegistryConfig =
        toml::from_str(&text).wrap_err_with(|| format!("Invalid config {}", path.display()))?;
    config.check().wrap_err("Invalid config")?;
    Ok(config)
}

fn edge_query(category: Option<CategoryArg>, hard: bool) -> DependencyQuery {
    let query = match category {
        Some(category) => DependencyQuery::category(category.into()),
        None => DependencyQuery::all(),
    };
    if hard {
        query.require(DependencyProperties::HARD)
    } else {
        query
    }
}

/// Controller with no mounts, filled from a snapshot.
fn open_snapshot(config: RegistryConfig, snapshot: &Path) -> Result<RegistryController> {
    let mut config = config;
    config.gather.mount_points.clear();
    let types = Arc::new(StaticTypeRegistry::with_types([]));
    let registry = RegistryController::new(config, types).wrap_err("Failed to create registry")?;
    let file = File::open(snapshot)
        .wrap_err_with(|| format!("Failed to open snapshot {}", snapshot.display()))?;
    registry
        .load(BufReader::new(file))
        .wrap_err_with(|| format!("Failed to load snapshot {}", snapshot.display()))?;
    Ok(registry)
}

fn parse_id(id: &str) -> Result<AssetIdentifier> {
    AssetIdentifier::parse(id).ok_or_else(|| eyre!("Invalid asset identifier {id:?}"))
}

/// Mount a directory, gather it and print a summary.
fn run_scan(
    config: RegistryConfig,
    path: &Path,
    namespace: &str,
    background: bool,
    timeout: Duration,
    save: Option<(PathBuf, SaveOptions)>,
    format: OutputFormat,
) -> Result<()> {
    let path = path.canonicalize().context("Invalid path")?;
    let types = Arc::new(StaticTypeRegistry::with_types([]));
    let registry = RegistryController::new(config, types).wrap_err("Failed to create registry")?;
    registry
        .add_mount_point(&path, namespace)
        .wrap_err_with(|| format!("Failed to mount {}", path.display()))?;

    eprintln!("Gathering {} as {}...", path.display(), namespace);
    let started = Instant::now();
    let warnings = if background {
        registry.start().wrap_err("Failed to start gathering")?;
        if !registry.run_until_idle(Some(timeout)) {
            return Err(eyre!("Gathering did not finish within {}s", timeout.as_secs()));
        }
        registry.shutdown();
        registry.warnings()
    } else {
        let summary = registry
            .scan_paths(&[path.clone()], &[], ScanFlags::default())
            .wrap_err("Scan failed")?;
        summary.warnings
    };
    let elapsed = started.elapsed();

    let records = registry
        .get_assets(&AssetFilter::new().with_package_path(namespace, true))
        .wrap_err("Query failed")?;
    let mut packages: Vec<&str> = records.iter().map(|r| r.package_name.as_str()).collect();
    packages.dedup();
    let total_size: u64 = packages
        .iter()
        .filter_map(|p| registry.get_package_data(p))
        .map(|p| p.size)
        .sum();
    let pending = registry.progress().pending_load;

    if let Some((output, options)) = &save {
        let file = File::create(output)
            .wrap_err_with(|| format!("Failed to create {}", output.display()))?;
        registry
            .save(BufWriter::new(file), options)
            .wrap_err("Failed to write snapshot")?;
        info!(path = %output.display(), "Saved snapshot");
    }

    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(60));
            println!(" {} -> {}", path.display(), namespace);
            println!(
                " {} assets in {} packages, {}",
                records.len(),
                registry.package_count(),
                format_size(total_size)
            );
            println!(" Gathered in {:.2}s", elapsed.as_secs_f64());
            println!("{}", "─".repeat(60));
            if pending > 0 {
                println!(" {} container(s) need a full load", pending);
            }
            if !warnings.is_empty() {
                println!();
                println!("{} warning(s) during scan", warnings.len());
                for warning in warnings.iter().take(20) {
                    println!("   {}: {}", warning.path.display(), warning.message);
                }
            }
        }
        OutputFormat::Json => {
            let report = serde_json::json!({
                "root": path,
                "namespace": namespace,
                "assets": records.len(),
                "packages": registry.package_count(),
                "total_size": total_size,
                "pending_load": pending,
                "elapsed_secs": elapsed.as_secs_f64(),
                "warnings": warnings,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Summarize a snapshot.
fn run_info(config: RegistryConfig, snapshot: &Path, top: usize, format: OutputFormat) -> Result<()> {
    let registry = open_snapshot(config, snapshot)?;
    let records = registry
        .get_assets(&AssetFilter::new().with_package_path("/", true))
        .wrap_err("Query failed")?;

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &records {
        *by_type.entry(record.asset_type.as_str()).or_default() += 1;
    }
    let mut by_type: Vec<(&str, usize)> = by_type.into_iter().collect();
    by_type.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    by_type.truncate(top);

    let roots = registry.get_subpaths("/", false);

    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(60));
            println!(" {}", snapshot.display());
            println!(
                " {} assets in {} packages",
                records.len(),
                registry.package_count()
            );
            println!(" Roots: {}", roots.join(", "));
            println!("{}", "─".repeat(60));
            println!();
            println!(" Top asset types:");
            for (ty, count) in &by_type {
                println!("   {:<40} {:>8}", ty, count);
            }
        }
        OutputFormat::Json => {
            let types: serde_json::Map<String, serde_json::Value> = by_type
                .iter()
                .map(|(ty, count)| (ty.to_string(), serde_json::Value::from(*count)))
                .collect();
            let report = serde_json::json!({
                "snapshot": snapshot,
                "assets": records.len(),
                "packages": registry.package_count(),
                "roots": roots,
                "types": types,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Print dependencies or referencers of one asset.
fn run_edges(
    config: RegistryConfig,
    snapshot: &Path,
    id: &str,
    query: DependencyQuery,
    referencers: bool,
    format: OutputFormat,
) -> Result<()> {
    let registry = open_snapshot(config, snapshot)?;
    let id = parse_id(id)?;

    if referencers {
        let refs = registry.get_referencers(&id, &query);
        match format {
            OutputFormat::Text => {
                println!(" {} is referenced by {} asset(s)", id, refs.len());
                for r in &refs {
                    println!("   {}", r);
                }
            }
            OutputFormat::Json => {
                let refs: Vec<String> = refs.iter().map(ToString::to_string).collect();
                println!("{}", serde_json::to_string_pretty(&refs)?);
            }
        }
        return Ok(());
    }

    let deps = registry.get_dependencies(&id, &query);
    match format {
        OutputFormat::Text => {
            println!(" {} depends on {} asset(s)", id, deps.len());
            for (target, category, properties) in &deps {
                println!("   {:<50} {:<16} {:?}", target.to_string(), category.to_string(), properties);
            }
        }
        OutputFormat::Json => {
            let deps: Vec<serde_json::Value> = deps
                .iter()
                .map(|(target, category, properties)| {
                    serde_json::json!({
                        "target": target.to_string(),
                        "category": category,
                        "properties": properties,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&deps)?);
        }
    }
    Ok(())
}

/// Print assets matching a filter.
fn run_find(
    config: RegistryConfig,
    snapshot: &Path,
    filter: &AssetFilter,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let registry = open_snapshot(config, snapshot)?;
    let records = registry.get_assets(filter).wrap_err("Invalid filter")?;

    match format {
        OutputFormat::Text => {
            println!(" {} matching asset(s)", records.len());
            for record in records.iter().take(limit) {
                println!("   {:<60} {}", record.identifier().to_string(), record.asset_type);
            }
            let remaining = records.len().saturating_sub(limit);
            if remaining > 0 {
                println!("   ... and {} more", remaining);
            }
        }
        OutputFormat::Json => {
            let shown: Vec<_> = records.iter().take(limit).collect();
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
