use std::net::TcpStream;
use std::time::Duration;

use rpc_pool::{ConnectionPool, HostStatus, PoolStats, TcpTransport};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::load_config;

/// How long `probe` waits for in-flight connections at the end.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Serialize)]
struct RoundSummary {
    round: u32,
    ok: usize,
    dead: usize,
    failed: usize,
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    prewarmed: usize,
    rounds: Vec<RoundSummary>,
    pool: PoolStats,
    hosts: Vec<HostStatus>,
}

enum Outcome {
    Alive,
    Dead,
    Failed(String),
}

pub async fn probe(config_path: &str, rounds: u32, format: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let registry = config.build_registry()?;
    let transport = TcpTransport::new(config.host.connect_timeout);
    let pool = ConnectionPool::with_transport(config.pool.clone(), registry.clone(), transport);
    let evictor = pool.spawn_evictor();

    let prewarmed = pool.prewarm().await;
    info!(prewarmed, hosts = registry.len(), "starting probe");

    let width = config.pool.max_active;
    let mut summaries = Vec::new();
    for round in 1..=rounds {
        let mut tasks = JoinSet::new();
        for _ in 0..width {
            let pool = pool.clone();
            tasks.spawn(async move { probe_once(&pool).await });
        }

        let mut summary = RoundSummary {
            round,
            ..RoundSummary::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined? {
                Outcome::Alive => summary.ok += 1,
                Outcome::Dead => summary.dead += 1,
                Outcome::Failed(error) => {
                    summary.failed += 1;
                    summary.errors.push(error);
                }
            }
        }
        info!(round, ok = summary.ok, dead = summary.dead, failed = summary.failed, "probe round finished");
        summaries.push(summary);
    }

    pool.log_stats();
    let report = ProbeReport {
        prewarmed,
        rounds: summaries,
        pool: pool.stats(),
        hosts: registry.status(),
    };

    let outstanding = pool.drain(DRAIN_TIMEOUT).await;
    if outstanding > 0 {
        warn!(outstanding, "connections still checked out after drain");
    }
    if let Some(handle) = evictor {
        handle.await?;
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&report),
    }
    Ok(())
}

async fn probe_once(pool: &ConnectionPool<TcpStream>) -> Outcome {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Outcome::Failed(e.to_string()),
    };
    // Pinging peeks the socket with a read timeout, so keep it off the executor.
    let checked = tokio::task::spawn_blocking(move || {
        let alive = conn.validate();
        (conn, alive)
    })
    .await;

    match checked {
        Ok((conn, alive)) => {
            pool.release(conn);
            if alive { Outcome::Alive } else { Outcome::Dead }
        }
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

fn print_report(report: &ProbeReport) {
    println!("pre-warmed {} connection(s)", report.prewarmed);
    println!();
    println!("{:<6} {:>5} {:>5} {:>7}", "ROUND", "OK", "DEAD", "FAILED");
    for round in &report.rounds {
        println!("{:<6} {:>5} {:>5} {:>7}", round.round, round.ok, round.dead, round.failed);
        for error in &round.errors {
            println!("       ✗ {error}");
        }
    }

    println!();
    println!("{:<40} {:>6} {:>8} {:>9}", "HOST", "WEIGHT", "HEALTHY", "FAILURES");
    for host in &report.hosts {
        let healthy = if host.healthy { "yes" } else { "no" };
        println!(
            "{:<40} {:>6} {:>8} {:>9}",
            host.addr.to_string(),
            host.weight,
            healthy,
            host.consecutive_failures
        );
    }

    let stats = &report.pool;
    println!();
    println!(
        "pool: {} idle, {} active, {}/{} total, {} created, {} destroyed, {} waits, {} timeouts",
        stats.idle,
        stats.active,
        stats.total,
        stats.max_active,
        stats.created,
        stats.destroyed,
        stats.waits,
        stats.timeouts
    );
}
