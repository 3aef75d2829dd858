//! sweepkv soak driver
//!
//! Runs concurrent writers against one shared cache with the clearing-factor
//! plugin attached, then reports how much expired data the writes swept.

use anyhow::Context;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sweepkv::plugin::{
    ClearExpiredByFactor, PluginOptions, RandomSource, SeededRandom, ThreadRandom,
    DEFAULT_PRIORITY,
};
use sweepkv::storage::{Cache, StorageEngine};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Driver configuration
struct Config {
    /// Sweep probability denominator (0 disables)
    clearing_factor: u32,
    /// Number of concurrent writer tasks
    writers: usize,
    /// Writes per writer
    writes: u64,
    /// TTL given to every written key
    ttl: Duration,
    /// Plugin listener priority
    priority: i32,
    /// Seed for reproducible sampling
    seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clearing_factor: 100,
            writers: 4,
            writes: 100_000,
            ttl: Duration::from_millis(5),
            priority: DEFAULT_PRIORITY,
            seed: None,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--clearing-factor" | "-f" => {
                    config.clearing_factor = parse_value(&args, i, "--clearing-factor");
                    i += 2;
                }
                "--writers" | "-w" => {
                    config.writers = parse_value(&args, i, "--writers");
                    i += 2;
                }
                "--writes" | "-n" => {
                    config.writes = parse_value(&args, i, "--writes");
                    i += 2;
                }
                "--ttl-ms" => {
                    config.ttl = Duration::from_millis(parse_value(&args, i, "--ttl-ms"));
                    i += 2;
                }
                "--priority" => {
                    config.priority = parse_value(&args, i, "--priority");
                    i += 2;
                }
                "--seed" => {
                    config.seed = Some(parse_value(&args, i, "--seed"));
                    i += 2;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("sweepkv version {}", sweepkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }
}

/// Parses the value following the flag at `args[i]`, exiting on error.
fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    let Some(raw) = args.get(i + 1) else {
        eprintln!("Error: {} requires a value", flag);
        std::process::exit(1);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid value for {}: {}", flag, raw);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
sweepkv - Write-amortized expiry soak driver

USAGE:
    sweepkv [OPTIONS]

OPTIONS:
    -f, --clearing-factor <N>  Sweep with probability 1/N per write, 0 disables (default: 100)
    -w, --writers <N>          Concurrent writer tasks (default: 4)
    -n, --writes <N>           Writes per writer (default: 100000)
        --ttl-ms <MS>          TTL of every written key (default: 5)
        --priority <P>         Plugin listener priority (default: 1)
        --seed <SEED>          Seed the sampler for reproducible runs
    -v, --version              Print version information
    -h, --help                 Print this help message

LOGGING:
    Set RUST_LOG (e.g. RUST_LOG=sweepkv=debug) to see individual sweeps.
"#
    );
}

/// One writer: `writes` short-lived sets through the shared cache.
fn run_writer(
    cache: &Cache<StorageEngine>,
    stop: &AtomicBool,
    writer: usize,
    writes: u64,
    ttl: Duration,
) -> anyhow::Result<()> {
    for j in 0..writes {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let key = Bytes::from(format!("w{}:{}", writer, j));
        cache
            .set_item_with_ttl(key, Bytes::from_static(b"payload"), ttl)
            .with_context(|| format!("writer {} failed at write {}", writer, j))?;
    }
    Ok(())
}

/// Waits for every writer, failing on the first error.
async fn join_writers(writers: &mut JoinSet<anyhow::Result<()>>) -> anyhow::Result<()> {
    while let Some(joined) = writers.join_next().await {
        joined.context("writer task panicked")??;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let random: Arc<dyn RandomSource> = match config.seed {
        Some(seed) => Arc::new(SeededRandom::new(seed)),
        None => Arc::new(ThreadRandom),
    };
    let plugin = ClearExpiredByFactor::with_random_source(
        Arc::new(PluginOptions::new(config.clearing_factor)),
        random,
    );

    let cache = Arc::new(Cache::new(StorageEngine::new()));
    cache.add_plugin(&plugin, config.priority)?;
    info!(
        clearing_factor = config.clearing_factor,
        writers = config.writers,
        writes = config.writes,
        ttl_ms = config.ttl.as_millis() as u64,
        "Plugin attached, starting writers"
    );

    let started = Instant::now();
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = JoinSet::new();
    for writer in 0..config.writers {
        let cache = Arc::clone(&cache);
        let stop = Arc::clone(&stop);
        let (writes, ttl) = (config.writes, config.ttl);
        writers.spawn_blocking(move || run_writer(&cache, &stop, writer, writes, ttl));
    }

    let interrupted = tokio::select! {
        result = join_writers(&mut writers) => {
            if let Err(e) = &result {
                error!("Soak run failed: {:#}", e);
                stop.store(true, Ordering::Relaxed);
            }
            result?;
            false
        }
        _ = signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Shutdown signal received, stopping writers...");
        stop.store(true, Ordering::Relaxed);
        while writers.join_next().await.is_some() {}
    }

    cache.remove_plugin(&plugin)?;

    let stats = cache.storage().stats();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        sets = stats.set_ops,
        sweeps = stats.sweeps,
        expired = stats.expired,
        keys_remaining = stats.keys,
        "Soak run complete"
    );
    Ok(())
}
