//! Session ticket cache for TLS resumption.
//!
//! Mirrors how a browser treats tickets: a couple per hostname, a
//! bounded global pool, 24 h lifetimes with the occasional short-lived
//! CDN-style ticket, and a small chance of resuming from an older
//! ticket the way a multi-tab browser does. Tickets are held in memory
//! only, base64-encoded at this boundary (the wire library's session
//! slot takes the base64 text).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::fingerprint::BrowserFingerprint;

pub const DEFAULT_TICKET_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
/// Some CDNs rotate tickets on a much shorter schedule; a slice of
/// stores imitates that.
pub const SHORT_TICKET_LIFETIME: Duration = Duration::from_secs(4 * 60 * 60);

const DEFAULT_MAX_PER_HOST: usize = 2;
const DEFAULT_MAX_TOTAL: usize = 100;

#[derive(Debug, Clone)]
struct TicketEntry {
    encoded: String,
    stored_at: Instant,
    lifetime: Duration,
    fingerprint: BrowserFingerprint,
}

impl TicketEntry {
    fn expired(&self) -> bool {
        self.stored_at.elapsed() >= self.lifetime
    }
}

/// Per-hostname multimap of resumable tickets, oldest first.
pub struct SessionTicketStore {
    entries: HashMap<String, Vec<TicketEntry>>,
    max_per_host: usize,
    max_total: usize,
    rng: StdRng,
}

impl Default for SessionTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTicketStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            max_per_host: DEFAULT_MAX_PER_HOST,
            max_total: DEFAULT_MAX_TOTAL,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic store for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }

    /// Caches a raw ticket for `hostname`. One store in ten gets the
    /// short CDN lifetime.
    pub fn store(&mut self, hostname: &str, ticket: &[u8], fingerprint: BrowserFingerprint) {
        let lifetime = if self.rng.gen_range(0..10) == 0 {
            SHORT_TICKET_LIFETIME
        } else {
            DEFAULT_TICKET_LIFETIME
        };
        self.store_with_lifetime(hostname, ticket, fingerprint, lifetime);
    }

    pub fn store_with_lifetime(
        &mut self,
        hostname: &str,
        ticket: &[u8],
        fingerprint: BrowserFingerprint,
        lifetime: Duration,
    ) {
        let entry = TicketEntry {
            encoded: BASE64.encode(ticket),
            stored_at: Instant::now(),
            lifetime,
            fingerprint,
        };
        self.entries
            .entry(hostname.to_string())
            .or_default()
            .push(entry);
        crate::telemetry!(crate::telemetry::TICKETS_STORED.inc());
        self.enforce_limits();
    }

    /// Returns a base64 ticket for `hostname`: the newest one, except
    /// that with two or more cached and probability 1/5 an older one is
    /// chosen, imitating resumption from a backgrounded tab.
    pub fn get(&mut self, hostname: &str) -> Option<String> {
        self.cleanup_expired();
        let list = self.entries.get(hostname)?;
        if list.is_empty() {
            return None;
        }
        let mut index = list.len() - 1;
        if list.len() > 1 && self.rng.gen_range(0..5) == 0 {
            index = self.rng.gen_range(0..list.len());
        }
        Some(list[index].encoded.clone())
    }

    /// Raw ticket bytes for `hostname`, decoded from the stored
    /// encoding.
    pub fn get_raw(&mut self, hostname: &str) -> Option<Vec<u8>> {
        let encoded = self.get(hostname)?;
        BASE64.decode(encoded.as_bytes()).ok()
    }

    /// Fingerprint the newest ticket for `hostname` was issued under.
    pub fn fingerprint_for(&self, hostname: &str) -> Option<BrowserFingerprint> {
        self.entries
            .get(hostname)
            .and_then(|l| l.last())
            .map(|e| e.fingerprint)
    }

    pub fn remove(&mut self, hostname: &str) {
        self.entries.remove(hostname);
    }

    pub fn cleanup_expired(&mut self) {
        for list in self.entries.values_mut() {
            list.retain(|e| !e.expired());
        }
        self.entries.retain(|_, l| !l.is_empty());
    }

    pub fn count(&self) -> usize {
        self.entries.values().map(|l| l.len()).sum()
    }

    pub fn set_max_per_host(&mut self, max: usize) {
        self.max_per_host = max;
        self.enforce_limits();
    }

    pub fn set_max_total(&mut self, max: usize) {
        self.max_total = max;
        self.enforce_limits();
    }

    /// Evicts oldest-first, per host and then globally. Runs after
    /// every store.
    fn enforce_limits(&mut self) {
        for list in self.entries.values_mut() {
            while list.len() > self.max_per_host {
                list.remove(0);
            }
        }
        while self.count() > self.max_total {
            let oldest_host = self
                .entries
                .iter()
                .filter_map(|(host, list)| list.first().map(|e| (host.clone(), e.stored_at)))
                .min_by_key(|(_, at)| *at)
                .map(|(host, _)| host);
            match oldest_host {
                Some(host) => {
                    if let Some(list) = self.entries.get_mut(&host) {
                        list.remove(0);
                        if list.is_empty() {
                            self.entries.remove(&host);
                        }
                    }
                }
                None => break,
            }
        }
    }
}

lazy_static! {
    /// Process-wide ticket store shared by all connections, guarded by
    /// a single mutex as every operation is short.
    pub static ref SESSION_TICKETS: Mutex<SessionTicketStore> =
        Mutex::new(SessionTicketStore::new());
}
