//! Host registry — candidate endpoints, health state, and selection.
//!
//! Selection is round-robin over an atomic cursor, so concurrent callers never
//! contend on a lock to pick a host. Each host occupies `weight` consecutive
//! slots of the rotation.
//!
//! # Failover
//!
//! ```text
//! get()
//!   → ticket = cursor.fetch_add(1)
//!     → walk slots starting at ticket % slots
//!       → first host that is healthy, or eligible for retry under the policy
//!     → nothing eligible → NoHostAvailable
//! ```
//!
//! A failed open marks the host unhealthy; a successful open marks it healthy.
//! Under [`RetryPolicy::EveryCycle`] an unhealthy host becomes eligible again
//! once the cursor has gone a full rotation past the failure.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ConfigError, PoolError, PoolResult};

/// A `host:port` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostAddr {
    host: String,
    port: u16,
}

impl HostAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse a comma-separated host list, skipping empty entries.
    pub fn parse_list(list: &str) -> Result<Vec<HostAddr>, ConfigError> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidHost(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::InvalidHost(s.to_string()))?;
        if host.is_empty() || port == 0 {
            return Err(ConfigError::InvalidHost(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}

impl Serialize for HostAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// When an unhealthy host may be tried again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry once the rotation has gone a full cycle past the failure.
    #[default]
    EveryCycle,
    /// Retry once the given duration has elapsed since the last failure.
    Cooldown(Duration),
}

/// Point-in-time view of one host, for diagnostics.
#[derive(Clone, Debug, Serialize)]
pub struct HostStatus {
    pub addr: HostAddr,
    pub weight: u32,
    pub healthy: bool,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct Host {
    addr: HostAddr,
    weight: u32,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    /// Cursor value at the most recent failure.
    failed_at: AtomicUsize,
    last_failure: Mutex<Option<Instant>>,
}

impl Host {
    fn new(addr: HostAddr, weight: u32) -> Self {
        Self {
            addr,
            weight: weight.max(1),
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            failed_at: AtomicUsize::new(0),
            last_failure: Mutex::new(None),
        }
    }

    fn is_eligible(&self, policy: RetryPolicy, ticket: usize, slots: usize) -> bool {
        if self.healthy.load(Ordering::Acquire) {
            return true;
        }
        match policy {
            RetryPolicy::EveryCycle => {
                ticket.wrapping_sub(self.failed_at.load(Ordering::Acquire)) >= slots
            }
            RetryPolicy::Cooldown(cooldown) => self
                .last_failure
                .lock()
                .is_none_or(|at| at.elapsed() >= cooldown),
        }
    }
}

/// Static set of candidate hosts with per-host health.
#[derive(Debug)]
pub struct HostRegistry {
    hosts: Vec<Host>,
    /// Rotation order: each entry indexes `hosts`, repeated `weight` times.
    slots: Vec<usize>,
    cursor: AtomicUsize,
    policy: RetryPolicy,
}

impl HostRegistry {
    /// Create a registry where every host has weight 1.
    pub fn new(addrs: Vec<HostAddr>) -> Self {
        Self::weighted(addrs.into_iter().map(|addr| (addr, 1)).collect())
    }

    /// Create a registry with explicit weights (0 is treated as 1).
    pub fn weighted(hosts: Vec<(HostAddr, u32)>) -> Self {
        let hosts: Vec<Host> = hosts
            .into_iter()
            .map(|(addr, weight)| Host::new(addr, weight))
            .collect();
        let slots = hosts
            .iter()
            .enumerate()
            .flat_map(|(idx, host)| std::iter::repeat_n(idx, host.weight as usize))
            .collect();
        Self {
            hosts,
            slots,
            cursor: AtomicUsize::new(0),
            policy: RetryPolicy::default(),
        }
    }

    /// Build a registry from a comma-separated `host:port` list.
    pub fn from_list(list: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(HostAddr::parse_list(list)?))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Select the next host to try.
    pub fn get(&self) -> PoolResult<HostAddr> {
        let slots = self.slots.len();
        if slots == 0 {
            return Err(PoolError::NoHostAvailable { hosts: 0 });
        }

        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..slots {
            let host = &self.hosts[self.slots[ticket.wrapping_add(offset) % slots]];
            if host.is_eligible(self.policy, ticket, slots) {
                return Ok(host.addr.clone());
            }
        }

        warn!(hosts = self.hosts.len(), "every host is marked unhealthy");
        Err(PoolError::NoHostAvailable {
            hosts: self.hosts.len(),
        })
    }

    /// Record a failed connection attempt against `addr`.
    pub fn mark_failure(&self, addr: &HostAddr) {
        let Some(host) = self.find(addr) else {
            return;
        };
        host.failed_at
            .store(self.cursor.load(Ordering::Relaxed), Ordering::Release);
        *host.last_failure.lock() = Some(Instant::now());
        let failures = host.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if host.healthy.swap(false, Ordering::AcqRel) {
            warn!(host = %addr, failures, "host marked unhealthy");
        }
    }

    /// Record a successful connection attempt against `addr`.
    pub fn mark_success(&self, addr: &HostAddr) {
        let Some(host) = self.find(addr) else {
            return;
        };
        host.consecutive_failures.store(0, Ordering::Relaxed);
        if !host.healthy.swap(true, Ordering::AcqRel) {
            info!(host = %addr, "host recovered");
        }
    }

    pub fn is_healthy(&self, addr: &HostAddr) -> Option<bool> {
        self.find(addr).map(|h| h.healthy.load(Ordering::Acquire))
    }

    pub fn healthy_count(&self) -> usize {
        self.hosts
            .iter()
            .filter(|h| h.healthy.load(Ordering::Acquire))
            .count()
    }

    /// Snapshot every host, in registration order.
    pub fn status(&self) -> Vec<HostStatus> {
        self.hosts
            .iter()
            .map(|h| HostStatus {
                addr: h.addr.clone(),
                weight: h.weight,
                healthy: h.healthy.load(Ordering::Acquire),
                consecutive_failures: h.consecutive_failures.load(Ordering::Relaxed),
                last_failure: *h.last_failure.lock(),
            })
            .collect()
    }

    fn find(&self, addr: &HostAddr) -> Option<&Host> {
        self.hosts.iter().find(|h| h.addr == *addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> HostAddr {
        s.parse().unwrap()
    }

    fn registry(list: &str) -> HostRegistry {
        HostRegistry::from_list(list).unwrap()
    }

    // ── HostAddr ────────────────────────────────────────────────────

    #[test]
    fn parse_host_and_port() {
        let a = addr("rpc.local:9090");
        assert_eq!(a.host(), "rpc.local");
        assert_eq!(a.port(), 9090);
        assert_eq!(a.to_string(), "rpc.local:9090");
    }

    #[test]
    fn parse_bracketed_ipv6() {
        let a = addr("[::1]:7000");
        assert_eq!(a.host(), "[::1]");
        assert_eq!(a.port(), 7000);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "nohost", ":9090", "host:", "host:abc", "host:0", "host:70000"] {
            assert!(bad.parse::<HostAddr>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn parse_list_trims_and_skips_empty() {
        let list = HostAddr::parse_list(" a:1, b:2 ,,c:3 ").unwrap();
        assert_eq!(list, vec![addr("a:1"), addr("b:2"), addr("c:3")]);
    }

    #[test]
    fn parse_list_reports_bad_entry() {
        let err = HostAddr::parse_list("a:1,oops").unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    // ── Selection ───────────────────────────────────────────────────

    #[test]
    fn round_robin_cycles_through_hosts() {
        let reg = registry("a:1,b:2,c:3");
        let picks: Vec<String> = (0..6).map(|_| reg.get().unwrap().to_string()).collect();
        assert_eq!(picks, ["a:1", "b:2", "c:3", "a:1", "b:2", "c:3"]);
    }

    #[test]
    fn empty_registry_has_no_host() {
        let reg = HostRegistry::new(vec![]);
        assert!(reg.is_empty());
        assert!(matches!(
            reg.get(),
            Err(PoolError::NoHostAvailable { hosts: 0 })
        ));
    }

    #[test]
    fn weighted_rotation_repeats_heavier_hosts() {
        let reg = HostRegistry::weighted(vec![(addr("a:1"), 2), (addr("b:2"), 1)]);
        let picks: Vec<String> = (0..6).map(|_| reg.get().unwrap().to_string()).collect();
        assert_eq!(picks, ["a:1", "a:1", "b:2", "a:1", "a:1", "b:2"]);
    }

    #[test]
    fn zero_weight_counts_as_one() {
        let reg = HostRegistry::weighted(vec![(addr("a:1"), 0)]);
        assert_eq!(reg.status()[0].weight, 1);
        assert_eq!(reg.get().unwrap(), addr("a:1"));
    }

    // ── Health ──────────────────────────────────────────────────────

    #[test]
    fn failed_host_is_skipped() {
        let reg = registry("a:1,b:2");
        let first = reg.get().unwrap();
        assert_eq!(first, addr("a:1"));
        reg.mark_failure(&first);

        // Rest of this cycle avoids a:1.
        assert_eq!(reg.get().unwrap(), addr("b:2"));
        assert_eq!(reg.get().unwrap(), addr("b:2"));
        assert_eq!(reg.is_healthy(&first), Some(false));
        assert_eq!(reg.healthy_count(), 1);
    }

    #[test]
    fn every_cycle_retries_after_full_rotation() {
        let reg = registry("a:1,b:2");
        let a = reg.get().unwrap();
        reg.mark_failure(&a);
        let b = reg.get().unwrap();
        reg.mark_failure(&b);

        // Both failed within the current rotation.
        assert!(matches!(
            reg.get(),
            Err(PoolError::NoHostAvailable { hosts: 2 })
        ));

        // One rotation after a:1 failed, it is eligible again.
        assert_eq!(reg.get().unwrap(), a);
    }

    #[test]
    fn success_restores_health() {
        let reg = registry("a:1");
        let a = reg.get().unwrap();
        reg.mark_failure(&a);
        reg.mark_failure(&a);
        assert_eq!(reg.status()[0].consecutive_failures, 2);
        assert!(reg.status()[0].last_failure.is_some());

        reg.mark_success(&a);
        let status = &reg.status()[0];
        assert!(status.healthy);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[test]
    fn cooldown_blocks_until_elapsed() {
        let reg = registry("a:1").with_policy(RetryPolicy::Cooldown(Duration::from_millis(30)));
        let a = reg.get().unwrap();
        reg.mark_failure(&a);

        for _ in 0..4 {
            assert!(matches!(reg.get(), Err(PoolError::NoHostAvailable { .. })));
        }

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(reg.get().unwrap(), a);
    }

    #[test]
    fn unknown_host_marks_are_ignored() {
        let reg = registry("a:1");
        reg.mark_failure(&addr("zzz:1"));
        reg.mark_success(&addr("zzz:1"));
        assert_eq!(reg.healthy_count(), 1);
        assert_eq!(reg.is_healthy(&addr("zzz:1")), None);
    }

    #[test]
    fn concurrent_selection_is_balanced() {
        use std::collections::HashMap;
        use std::sync::Arc;
        use std::thread;

        let reg = Arc::new(registry("a:1,b:2,c:3,d:4"));
        let mut handles = vec![];
        for _ in 0..4 {
            let reg = reg.clone();
            handles.push(thread::spawn(move || {
                (0..100).map(|_| reg.get().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut counts: HashMap<HostAddr, usize> = HashMap::new();
        for h in handles {
            for a in h.join().unwrap() {
                *counts.entry(a).or_default() += 1;
            }
        }

        // 400 tickets over 4 hosts, one slot each.
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&n| n == 100));
    }
}
