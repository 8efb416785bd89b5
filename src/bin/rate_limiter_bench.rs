// src/bin/rate_limiter_bench.rs

use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use kv_rate_limiter::algorithms::{RateLimitAlgorithm, SlidingWindow};
use kv_rate_limiter::config::{RateLimitConfig, Settings, StorageSettings};
use kv_rate_limiter::logging::{self, LogFormat};
use kv_rate_limiter::storage::{MemoryStorage, RedisStorage, StorageBackend};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "rate_limiter_bench",
    about = "A load benchmark for the sliding window rate limiter"
)]
struct Opt {
    /// Storage backend to use (defaults to RATE_LIMITER_STORAGE, then memory)
    #[structopt(short, long, possible_values = &["memory", "redis"])]
    storage: Option<String>,

    /// Redis URL (defaults to REDIS_URL)
    #[structopt(long)]
    redis_url: Option<String>,

    /// Maximum number of requests allowed per identifier and window
    #[structopt(short, long, default_value = "50")]
    max_requests: u32,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Block duration in seconds once an identifier hits the limit
    #[structopt(short, long)]
    block_duration_seconds: Option<u64>,

    /// Number of concurrent identifiers to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of checks issued by each simulated user
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Pick a random identifier for every check instead of one per user
    #[structopt(long)]
    random_keys: bool,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum number of checks in flight
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Hide the progress bar
    #[structopt(long)]
    no_progress: bool,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

impl Opt {
    fn policy(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.max_requests,
            window_seconds: self.window_seconds,
            block_duration_seconds: self.block_duration_seconds,
            fail_closed: false,
        }
    }
}

/// Totals for one iteration
#[derive(Debug, Default, Clone)]
struct IterationStats {
    allowed: usize,
    denied: usize,
    // Admissions beyond the quota, caused by racing read-modify-write cycles
    excess_admitted: usize,
    elapsed: Duration,
}

impl IterationStats {
    fn total(&self) -> usize {
        self.allowed + self.denied
    }

    fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total() as f64 / secs
        } else {
            0.0
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    logging::init_with(
        LogFormat::from_env(),
        &format!("rate_limiter_bench={},kv_rate_limiter={}", log_level, log_level),
    );

    let policy = opt.policy();
    policy.validate()?;
    if opt.num_users == 0 || opt.concurrency == 0 {
        return Err("num_users and concurrency must be greater than zero".into());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    let mut settings = Settings::from_env_with_storage(opt.storage.as_deref())?;
    if let (Some(url), StorageSettings::Redis(redis)) = (&opt.redis_url, &mut settings.storage) {
        redis.url = url.clone();
    }

    match settings.storage {
        StorageSettings::Memory(mut memory_config) => {
            // Every simulated identifier needs a slot
            memory_config.max_entries = memory_config.max_entries.max(opt.num_users * 2);
            let storage = MemoryStorage::new(memory_config);
            let limiter = Arc::new(SlidingWindow::new(storage, settings.limiter));
            run_benchmark(limiter, "Sliding Window (Memory)", &opt, &policy, &stop).await
        }
        StorageSettings::Redis(redis_config) => {
            let storage = match RedisStorage::new(redis_config).await {
                Ok(storage) => storage,
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    return Err(format!("Failed to connect to Redis: {}", e).into());
                }
            };
            let limiter = Arc::new(SlidingWindow::new(storage, settings.limiter));
            run_benchmark(limiter, "Sliding Window (Redis)", &opt, &policy, &stop).await
        }
    }
}

fn progress_bar(opt: &Opt) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    if opt.no_progress {
        return Ok(ProgressBar::hidden());
    }

    let total = (opt.num_users * opt.requests_per_user) as u64;
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} checks")?
            .progress_chars("##-"),
    );
    Ok(bar)
}

async fn run_benchmark<S>(
    limiter: Arc<SlidingWindow<S>>,
    name: &str,
    opt: &Opt,
    policy: &RateLimitConfig,
    stop: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: StorageBackend + 'static,
{
    println!("\nRunning benchmark: {}", name);
    println!("==================={}", "=".repeat(name.len()));

    // Fresh namespace per run so nothing from earlier runs is counted
    let action = format!("bench-{}", Uuid::new_v4());
    info!(action = %action, "Using action namespace");

    let mut iterations = Vec::with_capacity(opt.iterations);

    for iteration in 0..opt.iterations {
        if stop.load(Ordering::SeqCst) {
            warn!("Interrupted, skipping remaining iterations");
            break;
        }

        for user in 0..opt.num_users {
            limiter.reset(&format!("user_{}", user), &action).await?;
        }

        let stats = run_iteration(Arc::clone(&limiter), &action, opt, policy).await?;
        println!(
            "Iteration {}: {:?}, {} allowed, {} denied, {} excess, {:.2} checks/sec",
            iteration + 1,
            stats.elapsed,
            stats.allowed,
            stats.denied,
            stats.excess_admitted,
            stats.throughput()
        );
        iterations.push(stats);
    }

    for user in 0..opt.num_users {
        limiter.reset(&format!("user_{}", user), &action).await?;
    }

    print_summary(name, &iterations);
    Ok(())
}

async fn run_iteration<S>(
    limiter: Arc<SlidingWindow<S>>,
    action: &str,
    opt: &Opt,
    policy: &RateLimitConfig,
) -> Result<IterationStats, Box<dyn std::error::Error>>
where
    S: StorageBackend + 'static,
{
    let bar = progress_bar(opt)?;
    let barrier = Arc::new(Barrier::new(opt.num_users));
    let semaphore = Arc::new(Semaphore::new(opt.concurrency));
    let mut handles = Vec::with_capacity(opt.num_users);

    let start_time = Instant::now();

    for user in 0..opt.num_users {
        let limiter = Arc::clone(&limiter);
        let barrier = Arc::clone(&barrier);
        let semaphore = Arc::clone(&semaphore);
        let bar = bar.clone();
        let action = action.to_string();
        let policy = policy.clone();
        let requests = opt.requests_per_user;
        let num_users = opt.num_users;
        let random_keys = opt.random_keys;

        handles.push(tokio::spawn(async move {
            barrier.wait().await;

            // (identifier index, allowed) per check
            let mut outcomes = Vec::with_capacity(requests);
            for _ in 0..requests {
                let Ok(_permit) = semaphore.acquire().await else {
                    break;
                };

                let target = if random_keys {
                    rand::random_range(0..num_users)
                } else {
                    user
                };
                let identifier = format!("user_{}", target);

                let result = limiter.check_limit(&identifier, &action, &policy).await;
                outcomes.push((target, result.allowed));
                bar.inc(1);
            }
            outcomes
        }));
    }

    let mut requested = vec![0usize; opt.num_users];
    let mut admitted = vec![0usize; opt.num_users];

    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(outcomes) => {
                for (target, allowed) in outcomes {
                    requested[target] += 1;
                    if allowed {
                        admitted[target] += 1;
                    }
                }
            }
            Err(e) => error!("Benchmark task failed: {}", e),
        }
    }

    let elapsed = start_time.elapsed();
    bar.finish_and_clear();

    let allowed: usize = admitted.iter().sum();
    let total: usize = requested.iter().sum();
    let quota = admission_quota(policy, elapsed);
    let excess_admitted = requested
        .iter()
        .zip(&admitted)
        .map(|(&req, &adm)| adm.saturating_sub(req.min(quota)))
        .sum();

    Ok(IterationStats {
        allowed,
        denied: total - allowed,
        excess_admitted,
        elapsed,
    })
}

/// Most admissions one identifier can legitimately get over `elapsed`.
///
/// Each window the run touched (started or partial) grants a fresh quota.
fn admission_quota(policy: &RateLimitConfig, elapsed: Duration) -> usize {
    let window_ms = u128::from(policy.window_seconds.max(1)) * 1000;
    let windows = elapsed.as_millis() / window_ms + 1;
    let quota = u128::from(policy.max_requests).saturating_mul(windows);
    usize::try_from(quota).unwrap_or(usize::MAX)
}

fn print_summary(name: &str, iterations: &[IterationStats]) {
    if iterations.is_empty() {
        println!("No iterations completed for {}", name);
        return;
    }

    let mut table = Table::new();
    table.add_row(row!["Iteration", "Checks", "Allowed", "Denied", "Excess (over quota per window)", "Duration", "Checks/sec"]);

    for (i, stats) in iterations.iter().enumerate() {
        table.add_row(row![
            i + 1,
            stats.total(),
            stats.allowed,
            stats.denied,
            stats.excess_admitted,
            format!("{:?}", stats.elapsed),
            format!("{:.2}", stats.throughput())
        ]);
    }

    let total = IterationStats {
        allowed: iterations.iter().map(|s| s.allowed).sum(),
        denied: iterations.iter().map(|s| s.denied).sum(),
        excess_admitted: iterations.iter().map(|s| s.excess_admitted).sum(),
        elapsed: iterations.iter().map(|s| s.elapsed).sum(),
    };
    table.add_row(row![
        "Total",
        total.total(),
        total.allowed,
        total.denied,
        total.excess_admitted,
        format!("{:?}", total.elapsed),
        format!("{:.2}", total.throughput())
    ]);

    println!("\nBenchmark Results for {}:", name);
    table.printstd();
}
