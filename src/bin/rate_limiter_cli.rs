// src/bin/rate_limiter_cli.rs

use dotenv::dotenv;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{error, info, warn};

use kv_rate_limiter::algorithms::{RateLimitAlgorithm, RateLimitResult, SlidingWindow};
use kv_rate_limiter::config::{RateLimitConfig, Settings, StorageSettings};
use kv_rate_limiter::logging::{self, LogFormat};
use kv_rate_limiter::storage::{MemoryStorage, RedisStorage, StorageBackend};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "rate_limiter_cli",
    about = "Simulate traffic against the sliding window rate limiter"
)]
struct Opt {
    /// Identifier being limited (an IP address, a user id, ...)
    #[structopt(short, long, default_value = "127.0.0.1")]
    identifier: String,

    /// Action namespace for the limit
    #[structopt(short, long, default_value = "login")]
    action: String,

    /// Maximum number of requests allowed per window
    #[structopt(short, long, default_value = "5")]
    max_requests: u32,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Block the identifier for this many seconds once the limit is hit
    #[structopt(short, long)]
    block_duration_seconds: Option<u64>,

    /// Deny requests when the store cannot be read
    #[structopt(long)]
    fail_closed: bool,

    /// Storage backend to use (defaults to RATE_LIMITER_STORAGE, then memory)
    #[structopt(short, long, possible_values = &["memory", "redis"])]
    storage: Option<String>,

    /// Redis URL (defaults to REDIS_URL)
    #[structopt(long)]
    redis_url: Option<String>,

    /// Key prefix for stored state (defaults to RATE_LIMITER_KEY_PREFIX)
    #[structopt(long)]
    key_prefix: Option<String>,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady", "sine_wave", "custom"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "10")]
    num_requests: usize,

    /// Time between requests in milliseconds (for steady and sine_wave modes)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Clear stored state for the identifier before simulating
    #[structopt(long)]
    reset: bool,

    /// Print every result as a JSON line
    #[structopt(long)]
    json: bool,

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
            fail_closed: self.fail_closed,
        }
    }
}

/// Running totals for one simulation
#[derive(Debug, Default)]
struct Tally {
    allowed: usize,
    denied: usize,
}

impl Tally {
    fn count(&mut self, result: &RateLimitResult) {
        if result.allowed {
            self.allowed += 1;
        } else {
            self.denied += 1;
        }
    }

    fn record(&mut self, index: usize, result: &RateLimitResult, opt: &Opt) {
        self.count(result);

        if opt.json {
            match serde_json::to_string(result) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode result: {}", e),
            }
        } else if opt.disable_logs {
            // Logs are off, results still go to stdout
            println!("Request {}: {}", index + 1, describe(result));
        } else if result.allowed {
            info!("Request {}: {}", index + 1, describe(result));
        } else {
            warn!("Request {}: {}", index + 1, describe(result));
        }
    }

    fn print(&self, title: &str, elapsed: Duration) {
        println!("\n{} Simulation Results:", title);
        println!("{}", "-".repeat(title.len() + 20));
        println!("Total requests: {}", self.allowed + self.denied);
        println!("Allowed: {}", self.allowed);
        println!("Denied: {}", self.denied);
        println!("Time elapsed: {:?}", elapsed);
    }
}

fn describe(result: &RateLimitResult) -> String {
    match (result.allowed, result.retry_after_seconds) {
        (true, _) => format!("ALLOWED (remaining: {})", result.remaining),
        (false, Some(secs)) => format!("DENIED (retry after: {}s)", secs),
        (false, None) => "DENIED".to_string(),
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
        &format!("rate_limiter_cli={},kv_rate_limiter={}", log_level, log_level),
    );

    let policy = opt.policy();
    policy.validate()?;

    let settings = apply_overrides(
        Settings::from_env_with_storage(opt.storage.as_deref())?,
        &opt,
    );

    info!(
        "Configuration: max_requests={}, window={}s, block={:?}, fail_closed={}",
        policy.max_requests, policy.window_seconds, policy.block_duration_seconds, policy.fail_closed
    );

    match settings.storage {
        StorageSettings::Memory(memory_config) => {
            let storage = MemoryStorage::new(memory_config);
            run_simulation(&opt, &policy, SlidingWindow::new(storage, settings.limiter)).await
        }
        StorageSettings::Redis(redis_config) => {
            let url = redis_config.url.clone();
            let storage = match RedisStorage::new(redis_config).await {
                Ok(storage) => storage,
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    return Err(e.into());
                }
            };
            storage.ping().await?;
            info!("Connected to Redis at {}", url);
            run_simulation(&opt, &policy, SlidingWindow::new(storage, settings.limiter)).await
        }
    }
}

// Command line flags win over the environment
fn apply_overrides(mut settings: Settings, opt: &Opt) -> Settings {
    if let Some(prefix) = &opt.key_prefix {
        settings.limiter.key_prefix = prefix.clone();
    }

    if let (Some(url), StorageSettings::Redis(redis)) = (&opt.redis_url, &mut settings.storage) {
        redis.url = url.clone();
    }

    settings
}

async fn run_simulation<S>(
    opt: &Opt,
    policy: &RateLimitConfig,
    limiter: SlidingWindow<S>,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: StorageBackend,
{
    if opt.reset {
        limiter.reset(&opt.identifier, &opt.action).await?;
        info!("Cleared state for {}:{}", opt.action, opt.identifier);
    }

    match opt.simulation.as_str() {
        "burst" => simulate_paced(opt, policy, &limiter, "Burst", |_| Duration::ZERO).await,
        "steady" => {
            let interval = Duration::from_millis(opt.request_interval_ms);
            simulate_paced(opt, policy, &limiter, "Steady", |_| interval).await
        }
        "sine_wave" => {
            let base = Duration::from_millis(opt.request_interval_ms);
            let total = opt.num_requests.max(1) as f64;
            simulate_paced(opt, policy, &limiter, "Sine Wave", move |i| {
                // Full cycle over the run, between 0.5x and 1.5x the base interval
                let phase = (i as f64 * std::f64::consts::PI * 2.0) / total;
                base.mul_f64(1.0 + 0.5 * phase.sin())
            })
            .await
        }
        "custom" => simulate_custom(opt, policy, &limiter).await,
        other => {
            error!("Unknown simulation mode: {}", other);
            Err("Unknown simulation mode".into())
        }
    }
}

// Issue requests back to back, waiting `pause(i)` after request i
async fn simulate_paced<S, F>(
    opt: &Opt,
    policy: &RateLimitConfig,
    limiter: &SlidingWindow<S>,
    title: &str,
    pause: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: StorageBackend,
    F: Fn(usize) -> Duration,
{
    info!(
        "Simulating {} requests ({}) for {}:{}",
        opt.num_requests, title, opt.action, opt.identifier
    );

    let mut tally = Tally::default();
    let start_time = Instant::now();

    for i in 0..opt.num_requests {
        let request_time = Instant::now();

        let result = limiter
            .check_limit(&opt.identifier, &opt.action, policy)
            .await;
        tally.record(i, &result, opt);

        let wait = pause(i);
        let elapsed = request_time.elapsed();
        if elapsed < wait {
            time::sleep(wait - elapsed).await;
        }
    }

    tally.print(title, start_time.elapsed());
    Ok(())
}

// Press Enter to send a request
async fn simulate_custom<S>(
    opt: &Opt,
    policy: &RateLimitConfig,
    limiter: &SlidingWindow<S>,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: StorageBackend,
{
    println!("\nCustom Simulation Mode");
    println!("----------------------");
    println!("Press Enter to make a request, 'reset' to clear state, or 'quit' to exit");

    let mut tally = Tally::default();
    let start_time = Instant::now();
    let mut input_buffer = String::new();

    loop {
        input_buffer.clear();
        if std::io::stdin().read_line(&mut input_buffer)? == 0 {
            break;
        }

        match input_buffer.trim() {
            "quit" | "exit" | "q" => break,
            "reset" => {
                limiter.reset(&opt.identifier, &opt.action).await?;
                println!("State cleared");
                continue;
            }
            _ => {}
        }

        let result = limiter
            .check_limit(&opt.identifier, &opt.action, policy)
            .await;
        println!("{}", describe(&result));
        tally.count(&result);
    }

    tally.print("Custom", start_time.elapsed());
    Ok(())
}
