//! Reference driver: ten holders contend for a small lease pool.
//!
//! Caller latency is simulated with random delays; the pool itself never sleeps.

use std::process;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use leasepool::{
    AcquireResult, Holder, HolderAgent, LeaseDurationRange, PoolConfig, QueueDiscipline,
    ReleaseResult, ResourcePool,
};
use rand::Rng;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const HOLDERS: [&str; 10] = [
    "Alice", "Bob", "Charlie", "Diana", "Eve", "Frank", "Grace", "Hank", "Ivy", "Jack",
];

/// Upper bound of the simulated caller latency.
const MAX_LATENCY_MS: u64 = 100;

struct Options {
    config: PoolConfig,
    startup_delay: Duration,
    revoke_interval: Duration,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let parsed = PoolConfig::from_env()
        .map_err(|e| e.to_string())
        .and_then(|base| parse_args(&args, base));
    let options = match parsed {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: leasepool-demo [options]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --capacity <n>             Concurrent leases [default: 3]");
            eprintln!("  --lease-ms <min> <max>     Expire leases after a random duration");
            eprintln!("  --lifo                     Promote the newest waiter first");
            eprintln!("  --startup-delay-ms <ms>    Delay before holders claim [default: 2000]");
            eprintln!("  --revoke-interval-ms <ms>  Period between revocations [default: 3000]");
            eprintln!();
            eprintln!("LEASEPOOL_* environment variables provide the pool defaults.");
            process::exit(2);
        }
    };

    if let Err(e) = run(options).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

/// Initialize tracing with LEASEPOOL_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("LEASEPOOL_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!(
            "leasepool={level},leasepool_demo={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

/// Apply command-line flags on top of `config`.
fn parse_args(args: &[String], mut config: PoolConfig) -> Result<Options, String> {
    let mut startup_delay = Duration::from_millis(2000);
    let mut revoke_interval = Duration::from_millis(3000);

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--capacity" => {
                i += 1;
                let capacity = parse_number(args.get(i), "--capacity")?;
                config.capacity = usize::try_from(capacity)
                    .map_err(|_| format!("--capacity: {capacity} is too large"))?;
            }
            "--lease-ms" => {
                let min = parse_number(args.get(i + 1), "--lease-ms")?;
                let max = parse_number(args.get(i + 2), "--lease-ms")?;
                i += 2;
                config.lease_duration =
                    Some(LeaseDurationRange::from_millis(min, max).map_err(|e| e.to_string())?);
            }
            "--lifo" => config.queue_discipline = QueueDiscipline::Lifo,
            "--startup-delay-ms" => {
                i += 1;
                startup_delay =
                    Duration::from_millis(parse_number(args.get(i), "--startup-delay-ms")?);
            }
            "--revoke-interval-ms" => {
                i += 1;
                revoke_interval =
                    Duration::from_millis(parse_number(args.get(i), "--revoke-interval-ms")?);
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    config.validate().map_err(|e| e.to_string())?;
    if revoke_interval.is_zero() {
        return Err("--revoke-interval-ms must be greater than zero".to_string());
    }

    Ok(Options {
        config,
        startup_delay,
        revoke_interval,
    })
}

fn parse_number(value: Option<&String>, flag: &str) -> Result<u64, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .map_err(|_| format!("{flag}: '{value}' is not a non-negative integer"))
}

async fn simulated_latency() {
    let ms = rand::rng().random_range(0..=MAX_LATENCY_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

async fn run(options: Options) -> anyhow::Result<()> {
    let pool = ResourcePool::new(options.config).context("failed to create lease pool")?;
    let agent = HolderAgent::new(pool.clone());
    let holders = HOLDERS
        .iter()
        .map(|name| Holder::new(name))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid demo holder")?;

    let _revocations = pool.subscribe(|event| {
        tracing::info!(
            holder = %event.holder,
            lease = %event.lease,
            reason = ?event.reason,
            "Lease revoked - slot available"
        );
    })?;
    tracing::info!(capacity = pool.capacity(), "Listening for revocations");

    tokio::time::sleep(options.startup_delay).await;

    let claims = holders.iter().map(|holder| {
        let agent = agent.clone();
        let holder = holder.clone();
        async move {
            simulated_latency().await;
            match agent.claim(&holder) {
                Ok(AcquireResult::Granted(lease)) => {
                    tracing::info!(holder = %holder.name(), lease = %lease.id(), "Claimed a lease");
                }
                Ok(AcquireResult::Queued { position }) => {
                    tracing::info!(holder = %holder.name(), position, "No lease available - waiting");
                }
                Err(e) => tracing::warn!(holder = %holder.name(), error = %e, "Claim rejected"),
            }
        }
    });
    join_all(claims).await;

    let mut interval = tokio::time::interval(options.revoke_interval);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = interval.tick() => {}
        }

        let snapshot = pool.snapshot();
        tracing::debug!(snapshot = %serde_json::to_string(&snapshot)?, "Pool state");

        let Some(lease) = snapshot.active.first() else {
            if snapshot.waiting.is_empty() {
                tracing::info!("No active leases left");
                break;
            }
            continue;
        };

        let holder = Holder::from(lease.holder().clone());
        simulated_latency().await;
        if let ReleaseResult::Released {
            promoted: Some(next),
            ..
        } = agent.revoke(&holder)?
        {
            tracing::info!(holder = %next.holder(), lease = %next.id(), "Promoted from waitlist");
        }
    }

    Ok(())
}
