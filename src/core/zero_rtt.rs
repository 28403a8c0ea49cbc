//! 0-RTT session resumption support.
//!
//! Tokens bind a hostname to an issue time with an HMAC-SHA256 under a
//! process-wide master key, so a resumption attempt can prove it was
//! minted by this process for this host. Validation is constant-time.
//! The actual early-data negotiation is the wire library's; this
//! module decides whether an attempt is allowed at all.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Policy for 0-RTT attempts.
#[derive(Debug, Clone, Copy)]
pub struct ZeroRttConfig {
    pub enabled: bool,
    /// Early-data budget offered to the application (bytes).
    pub max_early_data: u32,
    pub max_tokens_per_host: u32,
    pub max_token_lifetime_s: u32,
    /// Refuse the attempt entirely when no token is cached instead of
    /// minting a fresh one.
    pub reject_if_no_token: bool,
    /// Tokens are only accepted for the hostname they were minted for.
    pub require_token_binding: bool,
}

impl Default for ZeroRttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_early_data: 16 * 1024,
            max_tokens_per_host: 4,
            max_token_lifetime_s: 7200,
            reject_if_no_token: false,
            require_token_binding: true,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct ZeroRttToken {
    pub hostname: String,
    /// HMAC-SHA256 over `hostname ":" issued_at_ms`.
    pub token_data: Vec<u8>,
    pub issued_at_ms: u64,
    pub lifetime_s: u32,
}

impl ZeroRttToken {
    pub fn is_expired(&self) -> bool {
        let age_ms = now_millis().saturating_sub(self.issued_at_ms);
        age_ms >= self.lifetime_s as u64 * 1000
    }
}

/// Process-wide token store and master key holder.
pub struct ZeroRttManager {
    master_key: [u8; 32],
    tokens: HashMap<String, Vec<ZeroRttToken>>,
}

impl ZeroRttManager {
    pub fn new() -> Self {
        Self {
            master_key: rand::random(),
            tokens: HashMap::new(),
        }
    }

    /// Replaces the process master key; existing tokens stop
    /// validating.
    pub fn set_master_key(&mut self, key: [u8; 32]) {
        self.master_key = key;
    }

    fn mac_for(&self, hostname: &str, issued_at_ms: u64) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.master_key)
            .expect("HMAC accepts any key length");
        mac.update(hostname.as_bytes());
        mac.update(b":");
        mac.update(issued_at_ms.to_string().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    pub fn generate_token(&mut self, hostname: &str, config: &ZeroRttConfig) -> ZeroRttToken {
        let issued_at_ms = now_millis();
        ZeroRttToken {
            hostname: hostname.to_string(),
            token_data: self.mac_for(hostname, issued_at_ms),
            issued_at_ms,
            lifetime_s: config.max_token_lifetime_s,
        }
    }

    /// Constant-time validation of `token` against `hostname`: the MAC
    /// must verify for this hostname and issue time, and the token
    /// must be within its lifetime.
    pub fn validate_token(&self, token: &ZeroRttToken, hostname: &str) -> bool {
        if token.is_expired() {
            return false;
        }
        let mut mac = HmacSha256::new_from_slice(&self.master_key)
            .expect("HMAC accepts any key length");
        mac.update(hostname.as_bytes());
        mac.update(b":");
        mac.update(token.issued_at_ms.to_string().as_bytes());
        mac.verify_slice(&token.token_data).is_ok()
    }

    pub fn store_token(&mut self, token: ZeroRttToken, config: &ZeroRttConfig) {
        let list = self.tokens.entry(token.hostname.clone()).or_default();
        list.push(token);
        let cap = config.max_tokens_per_host.max(1) as usize;
        while list.len() > cap {
            list.remove(0);
        }
    }

    /// Newest unexpired token for `hostname`.
    pub fn token_for(&self, hostname: &str) -> Option<ZeroRttToken> {
        self.tokens
            .get(hostname)?
            .iter()
            .rev()
            .find(|t| !t.is_expired())
            .cloned()
    }

    pub fn remove_tokens(&mut self, hostname: &str) {
        self.tokens.remove(hostname);
    }

    pub fn cleanup_expired(&mut self) {
        for list in self.tokens.values_mut() {
            list.retain(|t| !t.is_expired());
        }
        self.tokens.retain(|_, l| !l.is_empty());
    }

    pub fn token_count(&self) -> usize {
        self.tokens.values().map(|l| l.len()).sum()
    }

    pub fn token_count_for(&self, hostname: &str) -> usize {
        self.tokens.get(hostname).map(|l| l.len()).unwrap_or(0)
    }

    /// Whether an 0-RTT attempt toward `hostname` is permitted: policy
    /// on, a usable token (or permission to mint one), binding intact.
    pub fn is_zero_rtt_possible(&mut self, hostname: &str, config: &ZeroRttConfig) -> bool {
        if !config.enabled {
            return false;
        }
        match self.token_for(hostname) {
            Some(token) => {
                !config.require_token_binding || self.validate_token(&token, hostname)
            }
            None => {
                if config.reject_if_no_token {
                    return false;
                }
                let token = self.generate_token(hostname, config);
                self.store_token(token, config);
                true
            }
        }
    }
}

impl Default for ZeroRttManager {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Process-wide manager; the master key lives for the process
    /// lifetime unless overridden via `set_master_key`.
    pub static ref ZERO_RTT: Mutex<ZeroRttManager> = Mutex::new(ZeroRttManager::new());
}
