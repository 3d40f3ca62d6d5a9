use anyhow::{bail, Context};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use steward::cache::{CacheStore, QueryCacheManager};
use steward::config::{Config, ConfigError};
use steward::logging::init_logging;
use steward::utils::format_duration;

#[derive(Parser)]
#[command(name = "steward")]
#[command(about = "Replica-aware query routing and query result caching")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Invalidate cached query results
    #[command(group(ArgGroup::new("target").required(true).args(["key", "model", "tag"])))]
    Invalidate {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/steward.toml")]
        config: PathBuf,
        /// Exact cache key
        #[arg(long)]
        key: Option<String>,
        /// Every entry cached under this model
        #[arg(long)]
        model: Option<String>,
        /// Every entry cached under this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Remove every cached entry under the configured prefix
    Flush {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/steward.toml")]
        config: PathBuf,
    },
    /// Show fleet-wide cache statistics from the store
    Stats {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/steward.toml")]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => generate_config(output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Invalidate {
            config,
            key,
            model,
            tag,
        } => {
            let cache = connect_cache(&config).await?;
            let removed = match (key, model, tag) {
                (Some(key), _, _) => u64::from(cache.invalidate(&key).await?),
                (_, Some(model), _) => cache.invalidate_model(&model).await?,
                (_, _, Some(tag)) => cache.invalidate_tag(&tag).await?,
                _ => bail!("one of --key, --model or --tag is required"),
            };
            println!("Invalidated {} cache entries", removed);
        }
        Commands::Flush { config } => {
            let cache = connect_cache(&config).await?;
            let removed = cache.clear_all().await?;
            println!("Removed {} keys", removed);
        }
        Commands::Stats { config } => show_stats(config).await?,
        Commands::Version => show_version(),
    }

    Ok(())
}

/// Load the configuration and open the configured Redis store
async fn connect_cache(config_path: &Path) -> anyhow::Result<QueryCacheManager> {
    let config = Config::load_from_file(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(&config.logging);

    if config.cache.redis_addr.is_none() {
        bail!("cache.redis_addr is not set; nothing to operate on");
    }
    let store: Arc<dyn CacheStore> = steward::cache_store_for(&config);
    store
        .ping()
        .await
        .with_context(|| format!("Cache store at {:?} is unreachable", config.cache.redis_addr))?;

    Ok(QueryCacheManager::new(store, config.cache_settings()))
}

async fn show_stats(config_path: PathBuf) -> anyhow::Result<()> {
    let started = Instant::now();
    let cache = connect_cache(&config_path).await?;
    let stats = cache.global_stats().await?;

    if !cache.settings().distributed_stats {
        println!("Note: cache.distributed_stats is disabled; counters may be empty");
    }
    println!("Cache statistics (prefix {:?})", cache.settings().key_prefix);
    println!("  Hits:          {}", stats.hits);
    println!("  Misses:        {}", stats.misses);
    println!("  Total queries: {}", stats.total_queries);
    println!("  Hit rate:      {:.1}%", stats.hit_rate * 100.0);
    println!("  Fetched in:    {}", format_duration(started.elapsed()));
    Ok(())
}

fn generate_config(output: PathBuf) -> anyhow::Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  steward validate --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Primary: {}", config.router.primary);
            println!("  Selection: {}", config.router.selection);
            println!("  Replicas: {} instances", config.replicas.len());
            for (i, replica) in config.replicas.iter().enumerate() {
                println!(
                    "    {}: {} -> {} (weight {}, max lag {}ms)",
                    i + 1,
                    replica.id,
                    replica.target,
                    replica.weight,
                    replica.max_acceptable_lag_ms
                );
            }
            println!(
                "  Health checks: every {}s, timeout {}s, unhealthy after {} errors",
                config.health.interval_sec,
                config.health.timeout_sec,
                config.health.max_consecutive_errors
            );
            match (&config.cache.redis_addr, config.cache.enabled) {
                (_, false) => println!("  Cache: disabled"),
                (Some(addr), true) => println!("  Cache: redis at {}", addr),
                (None, true) => println!("  Cache: in-process"),
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("steward v{}", env!("CARGO_PKG_VERSION"));
    println!("Replica-aware query routing and query result caching");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Read/write splitting with health-checked replica selection");
    println!("  • Automatic failover of reads to the primary");
    println!("  • Query result cache with model and tag invalidation");
    println!("  • Stale-while-revalidate background refresh");
}
