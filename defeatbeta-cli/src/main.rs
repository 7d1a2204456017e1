//! defeatbeta CLI: cached access to remote Parquet datasets.
//!
//! Commands:
//! - `fetch`: download a whole file into the cache and print its path
//! - `query`: predicate-pushdown read (`column == value`) of a remote file
//! - `stats`: per-row-group column bounds of a remote file
//! - `table`: resolve a dataset table name to its Parquet URL
//! - `cache validate|clear|invalidate`: cache management

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use defeatbeta_core::origin::HttpOrigin;
use defeatbeta_core::{
    CacheConfig, ColumnarCacheEngine, DatasetClient, FilterQuery, MissingTokenPolicy,
    ScalarValue, ValueKind, DEFAULT_BASE_URL,
};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "defeatbeta",
    version,
    about = "Cached, row-group aware access to remote Parquet datasets"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML configuration file.
    #[arg(long, global = true, env = "DEFEATBETA_CONFIG")]
    config: Option<PathBuf>,

    /// Cache directory (overrides the configuration file).
    #[arg(long, global = true, env = "DEFEATBETA_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Trust entries without an entity tag for this many seconds (default
    /// 86400 when given without a value) instead of always refetching them.
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "86400")]
    ttl: Option<u64>,

    /// Serve cached entries without probing the origin.
    #[arg(long, global = true, default_value_t = false)]
    no_validate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a whole remote file into the cache and print its local path.
    Fetch {
        url: String,

        /// Download even if a fresh copy is cached.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Read the rows of a remote Parquet file where COLUMN equals VALUE.
    Query {
        url: String,

        #[arg(long)]
        column: String,

        /// One query runs per value, in parallel.
        #[arg(long = "value", required = true, num_args = 1..)]
        values: Vec<String>,

        /// How to interpret the values.
        #[arg(long = "type", value_enum, default_value_t = ValueType::Str)]
        value_type: ValueType,

        /// Comma-separated columns to return.
        #[arg(long, value_delimiter = ',')]
        select: Option<Vec<String>>,

        /// Rows to print per result.
        #[arg(long, default_value_t = 10)]
        head: usize,
    },
    /// Print per-row-group column bounds of a remote Parquet file.
    Stats { url: String },
    /// Resolve a dataset table to its Parquet URL.
    Table {
        name: String,

        /// Dataset revision; defaults to the latest published tag.
        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Clear the cache if the dataset was republished since it was filled.
    Validate {
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },
    /// Delete every cached entry.
    Clear,
    /// Delete every cached artifact of one URL.
    Invalidate { url: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ValueType {
    Str,
    Int,
    Float,
    Bool,
}

impl From<ValueType> for ValueKind {
    fn from(t: ValueType) -> Self {
        match t {
            ValueType::Str => ValueKind::Str,
            ValueType::Int => ValueKind::Int,
            ValueType::Float => ValueKind::Float,
            ValueType::Bool => ValueKind::Bool,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let config = load_config(&cli.global)?;
    debug!(?config, "resolved configuration");

    match cli.command {
        Commands::Fetch { url, force } => run_fetch(config, &url, force),
        Commands::Query {
            url,
            column,
            values,
            value_type,
            select,
            head,
        } => run_query(config, &url, &column, &values, value_type, select, head),
        Commands::Stats { url } => run_stats(config, &url),
        Commands::Table {
            name,
            tag,
            base_url,
        } => run_table(&config, &name, tag.as_deref(), &base_url),
        Commands::Cache { action } => match action {
            CacheAction::Validate { base_url } => run_cache_validate(config, &base_url),
            CacheAction::Clear => {
                let engine = engine(config)?;
                engine.clear()?;
                println!("Cleared {}", engine.cache_dir().display());
                Ok(())
            }
            CacheAction::Invalidate { url } => {
                engine(config)?
                    .invalidate(&url)
                    .with_context(|| format!("invalidating {url}"))?;
                println!("Invalidated {url}");
                Ok(())
            }
        },
    }
}

/// 0 = warn, 1 = info, 2+ = debug.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("defeatbeta_core={level},defeatbeta={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &GlobalArgs) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(secs) = args.ttl {
        config.missing_token = MissingTokenPolicy::Ttl { secs };
    }
    if args.no_validate {
        config.validate_freshness = false;
    }
    config.validate()?;
    Ok(config)
}

fn engine(config: CacheConfig) -> Result<ColumnarCacheEngine> {
    ColumnarCacheEngine::with_http(config).context("initializing cache engine")
}

fn run_fetch(config: CacheConfig, url: &str, force: bool) -> Result<()> {
    let engine = engine(config)?;
    let path = engine
        .get_path(url, force)
        .with_context(|| format!("fetching {url}"))?;
    println!("{}", path.display());
    Ok(())
}

fn run_query(
    config: CacheConfig,
    url: &str,
    column: &str,
    values: &[String],
    value_type: ValueType,
    select: Option<Vec<String>>,
    head: usize,
) -> Result<()> {
    let engine = engine(config)?;
    let kind = ValueKind::from(value_type);
    let parsed = values
        .iter()
        .map(|raw| ScalarValue::parse_as(kind, raw))
        .collect::<Result<Vec<_>, _>>()?;

    let started = Instant::now();
    let results: Vec<_> = parsed
        .par_iter()
        .map(|value| {
            let mut query = FilterQuery::new(url, column, value.clone());
            query.columns = select.clone();
            (value, engine.query(&query))
        })
        .collect();

    for (value, result) in results {
        let frame = result.with_context(|| format!("querying {column} == {value}"))?;
        println!("── {column} == {value}: {} rows", frame.height());
        if frame.height() > 0 {
            println!("{}", frame.head(Some(head)));
        }
    }

    let m = engine.metrics();
    println!(
        "\n{} queries in {:.2?} (row groups fetched: {}, memory hits: {}, disk hits: {}, probes: {})",
        values.len(),
        started.elapsed(),
        m.row_group_fetches,
        m.memory_hits,
        m.disk_hits,
        m.probes
    );
    Ok(())
}

fn run_stats(config: CacheConfig, url: &str) -> Result<()> {
    let engine = engine(config)?;
    let stats = engine
        .row_group_statistics(url)
        .with_context(|| format!("reading statistics of {url}"))?;

    println!(
        "{url}: {} row groups, {} rows",
        stats.num_row_groups(),
        stats.total_rows()
    );
    for (i, rg) in stats.row_groups.iter().enumerate() {
        println!("row group {i}: {} rows", rg.num_rows);
        for (name, bounds) in &rg.columns {
            println!("  {:<32} {} .. {}", name, bounds.min, bounds.max);
        }
    }
    Ok(())
}

fn run_table(config: &CacheConfig, name: &str, tag: Option<&str>, base_url: &str) -> Result<()> {
    let client = DatasetClient::new(base_url, Arc::new(HttpOrigin::new(config)?));
    let url = match tag {
        Some(tag) => client.table_url(name, tag)?,
        None => client
            .resolve_table(name)
            .with_context(|| format!("resolving table {name}"))?,
    };
    println!("{url}");
    Ok(())
}

fn run_cache_validate(config: CacheConfig, base_url: &str) -> Result<()> {
    let origin = Arc::new(HttpOrigin::new(&config)?);
    let client = DatasetClient::new(base_url, origin.clone());
    let engine = ColumnarCacheEngine::new(config, origin).context("initializing cache engine")?;

    if client.validate_cache(&engine)? {
        println!("Dataset republished; cache cleared");
    } else {
        println!("Cache is up to date");
    }
    Ok(())
}
