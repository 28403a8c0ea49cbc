//! Unified TOML configuration.
//!
//! Optional file with `[stealth]`, `[burst]`, `[fec]` and `[zero_rtt]`
//! sections; every key falls back to the library default so a partial
//! file is fine.

use serde::Deserialize;
use std::path::Path;

use crate::burst::{BurstConfig, BurstFrameType};
use crate::core::ZeroRttConfig;
use crate::stealth::{BrowserFingerprint, RotationStrategy};

#[derive(Clone)]
pub struct StealthSettings {
    pub fingerprint: BrowserFingerprint,
    pub rotation: Vec<BrowserFingerprint>,
    pub rotation_strategy: RotationStrategy,
    pub rotation_interval_s: u64,
}

impl Default for StealthSettings {
    fn default() -> Self {
        Self {
            fingerprint: BrowserFingerprint::ChromeLatest,
            rotation: Vec::new(),
            rotation_strategy: RotationStrategy::Sequential,
            rotation_interval_s: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct FecSettings {
    pub enabled: bool,
    pub redundancy_rate: Option<f64>,
}

/// Everything a client run needs beyond the CLI flags.
#[derive(Clone, Default)]
pub struct AppConfig {
    pub stealth: StealthSettings,
    pub burst: Option<BurstConfig>,
    pub fec: FecSettings,
    pub zero_rtt: ZeroRttConfig,
}

#[derive(Deserialize)]
struct Root {
    stealth: Option<StealthSection>,
    burst: Option<BurstSection>,
    fec: Option<FecSection>,
    zero_rtt: Option<ZeroRttSection>,
}

#[derive(Deserialize)]
struct StealthSection {
    fingerprint: Option<String>,
    rotation: Option<Vec<String>>,
    rotation_strategy: Option<String>,
    rotation_interval_s: Option<u64>,
}

#[derive(Deserialize)]
struct BurstSection {
    enabled: Option<bool>,
    min_interval_ms: Option<u64>,
    max_interval_ms: Option<u64>,
    min_size: Option<usize>,
    max_size: Option<usize>,
    optimal_size: Option<usize>,
    max_buffer_bytes: Option<usize>,
    frame_type: Option<String>,
    adaptive_timing: Option<bool>,
    adaptive_sizing: Option<bool>,
    mimic_realistic_patterns: Option<bool>,
    jitter_factor: Option<f64>,
    target_latency_ms: Option<f64>,
}

#[derive(Deserialize)]
struct FecSection {
    enabled: Option<bool>,
    redundancy_rate: Option<f64>,
}

#[derive(Deserialize)]
struct ZeroRttSection {
    enabled: Option<bool>,
    max_early_data: Option<u32>,
    max_tokens_per_host: Option<u32>,
    max_token_lifetime_s: Option<u32>,
    reject_if_no_token: Option<bool>,
    require_token_binding: Option<bool>,
}

fn parse_fingerprint(name: &str) -> Result<BrowserFingerprint, String> {
    BrowserFingerprint::from_cli_name(name)
        .ok_or_else(|| format!("unknown fingerprint '{}'", name))
}

fn parse_frame_type(name: &str) -> Result<BurstFrameType, String> {
    match name.to_ascii_lowercase().as_str() {
        "http3" | "http3_chunked" => Ok(BurstFrameType::Http3Chunked),
        "websocket" | "ws" => Ok(BurstFrameType::WebSocket),
        "media" | "media_streaming" => Ok(BurstFrameType::MediaStreaming),
        "interactive" => Ok(BurstFrameType::Interactive),
        "random" | "randomized" => Ok(BurstFrameType::Randomized),
        other => Err(format!("unknown frame type '{}'", other)),
    }
}

fn parse_strategy(name: &str) -> Result<RotationStrategy, String> {
    match name.to_ascii_lowercase().as_str() {
        "sequential" => Ok(RotationStrategy::Sequential),
        "random" => Ok(RotationStrategy::Random),
        "time_based" | "time" => Ok(RotationStrategy::TimeBased),
        "connection_based" | "connection" => Ok(RotationStrategy::ConnectionBased),
        other => Err(format!("unknown rotation strategy '{}'", other)),
    }
}

impl AppConfig {
    pub fn from_toml(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let root: Root = toml::from_str(s)?;
        let mut cfg = AppConfig::default();

        if let Some(sec) = root.stealth {
            if let Some(v) = sec.fingerprint {
                cfg.stealth.fingerprint = parse_fingerprint(&v)?;
            }
            if let Some(list) = sec.rotation {
                cfg.stealth.rotation = list
                    .iter()
                    .map(|s| parse_fingerprint(s))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            if let Some(v) = sec.rotation_strategy {
                cfg.stealth.rotation_strategy = parse_strategy(&v)?;
            }
            if let Some(v) = sec.rotation_interval_s {
                cfg.stealth.rotation_interval_s = v;
            }
        }

        if let Some(sec) = root.burst {
            if sec.enabled.unwrap_or(true) {
                let mut burst = BurstConfig::default();
                if let Some(v) = sec.min_interval_ms {
                    burst.min_interval_ms = v;
                }
                if let Some(v) = sec.max_interval_ms {
                    burst.max_interval_ms = v;
                }
                if let Some(v) = sec.min_size {
                    burst.min_size = v;
                }
                if let Some(v) = sec.max_size {
                    burst.max_size = v;
                }
                if let Some(v) = sec.optimal_size {
                    burst.optimal_size = v;
                }
                if let Some(v) = sec.max_buffer_bytes {
                    burst.max_buffer_bytes = v;
                }
                if let Some(v) = sec.frame_type {
                    burst.frame_type = parse_frame_type(&v)?;
                }
                if let Some(v) = sec.adaptive_timing {
                    burst.adaptive_timing = v;
                }
                if let Some(v) = sec.adaptive_sizing {
                    burst.adaptive_sizing = v;
                }
                if let Some(v) = sec.mimic_realistic_patterns {
                    burst.mimic_realistic_patterns = v;
                }
                if let Some(v) = sec.jitter_factor {
                    burst.jitter_factor = v;
                }
                if let Some(v) = sec.target_latency_ms {
                    burst.target_latency_ms = v;
                }
                cfg.burst = Some(burst);
            }
        }

        if let Some(sec) = root.fec {
            cfg.fec.enabled = sec.enabled.unwrap_or(false);
            cfg.fec.redundancy_rate = sec.redundancy_rate;
        }

        if let Some(sec) = root.zero_rtt {
            if let Some(v) = sec.enabled {
                cfg.zero_rtt.enabled = v;
            }
            if let Some(v) = sec.max_early_data {
                cfg.zero_rtt.max_early_data = v;
            }
            if let Some(v) = sec.max_tokens_per_host {
                cfg.zero_rtt.max_tokens_per_host = v;
            }
            if let Some(v) = sec.max_token_lifetime_s {
                cfg.zero_rtt.max_token_lifetime_s = v;
            }
            if let Some(v) = sec.reject_if_no_token {
                cfg.zero_rtt.reject_if_no_token = v;
            }
            if let Some(v) = sec.require_token_binding {
                cfg.zero_rtt.require_token_binding = v;
            }
        }

        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(burst) = &self.burst {
            if burst.min_interval_ms > burst.max_interval_ms {
                return Err("burst min_interval_ms exceeds max_interval_ms".into());
            }
            if burst.min_size > burst.max_size {
                return Err("burst min_size exceeds max_size".into());
            }
            if burst.optimal_size < burst.min_size || burst.optimal_size > burst.max_size {
                return Err("burst optimal_size outside [min_size, max_size]".into());
            }
        }
        if let Some(rate) = self.fec.redundancy_rate {
            if !(crate::fec::MIN_REDUNDANCY..=crate::fec::MAX_REDUNDANCY).contains(&rate) {
                return Err(format!(
                    "fec redundancy_rate {} outside [{}, {}]",
                    rate,
                    crate::fec::MIN_REDUNDANCY,
                    crate::fec::MAX_REDUNDANCY
                ));
            }
        }
        if !self.stealth.rotation.is_empty() && self.stealth.rotation_interval_s == 0 {
            return Err("rotation list set but rotation_interval_s is 0".into());
        }
        Ok(())
    }
}
