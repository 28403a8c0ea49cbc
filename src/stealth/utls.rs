//! # uTLS Configurator
//!
//! Turns a catalog fingerprint into a usable wire configuration: the
//! synthesized ClientHello image for the chosen browser plus a
//! `quiche::Config` whose ALPN and transport parameters match that
//! browser. Profile application never hard-fails a connection attempt;
//! anything that cannot be applied degrades to the minimal fallback
//! profile with a log line, because a detectable-but-working connection
//! beats no connection.

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

use super::fingerprint::{
    fallback_profile, profile, randomized_profile, BrowserFingerprint, FingerprintProfile,
    SessionTicketMode,
};
use super::hello::{build_client_hello, ja3_hash, ja3_string};
use super::tickets::SESSION_TICKETS;
use crate::error::ConnectionError;

pub struct UtlsConfigurator {
    fingerprint: BrowserFingerprint,
    profile: FingerprintProfile,
    hostname: String,
    client_hello: Vec<u8>,
    config: quiche::Config,
    ca_file: Option<PathBuf>,
    use_session_tickets: bool,
    rng: StdRng,
}

impl UtlsConfigurator {
    /// Builds a configurator for `fingerprint` and `hostname`. On
    /// profile-application failure the minimal fallback profile is
    /// installed and initialization still succeeds; only a wire
    /// configuration that cannot be constructed at all is an error.
    pub fn initialize(
        fingerprint: BrowserFingerprint,
        hostname: &str,
        ca_file: Option<&Path>,
        use_session_tickets: bool,
    ) -> Result<Self, ConnectionError> {
        Self::initialize_with_rng(
            fingerprint,
            hostname,
            ca_file,
            use_session_tickets,
            StdRng::from_entropy(),
        )
    }

    /// Deterministic variant for tests.
    pub fn initialize_with_seed(
        fingerprint: BrowserFingerprint,
        hostname: &str,
        ca_file: Option<&Path>,
        use_session_tickets: bool,
        seed: u64,
    ) -> Result<Self, ConnectionError> {
        Self::initialize_with_rng(
            fingerprint,
            hostname,
            ca_file,
            use_session_tickets,
            StdRng::seed_from_u64(seed),
        )
    }

    fn initialize_with_rng(
        fingerprint: BrowserFingerprint,
        hostname: &str,
        ca_file: Option<&Path>,
        use_session_tickets: bool,
        mut rng: StdRng,
    ) -> Result<Self, ConnectionError> {
        let mut resolved = match fingerprint {
            BrowserFingerprint::Randomized => randomized_profile(&mut rng),
            BrowserFingerprint::Custom => fallback_profile(),
            id => profile(id),
        };
        if !use_session_tickets {
            resolved.session_tickets = SessionTicketMode::Off;
        }

        let config = match Self::build_config(&resolved, ca_file) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    "Failed to apply fingerprint {}: {}; installing fallback profile",
                    resolved.name, e
                );
                resolved = fallback_profile();
                Self::build_config(&resolved, ca_file)
                    .map_err(|e| ConnectionError::Config(e.to_string()))?
            }
        };

        let client_hello = build_client_hello(&resolved, hostname, &mut rng);
        info!(
            "uTLS profile {} for {} (JA3 {})",
            resolved.name,
            hostname,
            ja3_hash(&resolved)
        );

        Ok(Self {
            fingerprint,
            profile: resolved,
            hostname: hostname.to_string(),
            client_hello,
            config,
            ca_file: ca_file.map(|p| p.to_path_buf()),
            use_session_tickets,
            rng,
        })
    }

    /// ALPN identifiers usable on the QUIC path. A profile whose ALPN
    /// list has no h3 entry still has to negotiate something.
    fn quic_alpn(profile: &FingerprintProfile) -> Vec<Vec<u8>> {
        let h3: Vec<Vec<u8>> = profile
            .alpn
            .iter()
            .filter(|p| p.starts_with("h3"))
            .map(|p| p.as_bytes().to_vec())
            .collect();
        if h3.is_empty() {
            vec![b"h3".to_vec()]
        } else {
            h3
        }
    }

    fn build_config(
        profile: &FingerprintProfile,
        ca_file: Option<&Path>,
    ) -> Result<quiche::Config, quiche::Error> {
        let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION)?;

        let alpn = Self::quic_alpn(profile);
        let alpn_refs: Vec<&[u8]> = alpn.iter().map(|p| p.as_slice()).collect();
        config.set_application_protos(&alpn_refs)?;

        // GREASE placement belongs to the profile, not the engine.
        config.grease(false);
        config.verify_peer(false);
        if let Some(path) = ca_file {
            if let Some(p) = path.to_str() {
                config.load_verify_locations_from_file(p)?;
                config.verify_peer(true);
            }
        }

        let t = &profile.transport;
        config.set_max_idle_timeout(t.max_idle_timeout_ms);
        config.set_initial_max_data(t.initial_max_data);
        config.set_initial_max_stream_data_bidi_local(t.initial_max_stream_data);
        config.set_initial_max_stream_data_bidi_remote(t.initial_max_stream_data);
        config.set_initial_max_stream_data_uni(t.initial_max_stream_data);
        config.set_initial_max_streams_bidi(t.initial_max_streams_bidi);
        config.set_initial_max_streams_uni(t.initial_max_streams_uni);
        config.set_max_recv_udp_payload_size(1460);
        config.set_max_send_udp_payload_size(1200);
        config.set_cc_algorithm(quiche::CongestionControlAlgorithm::BBR2);
        config.set_active_connection_id_limit(4);
        config.enable_dgram(true, 1024, 1024);
        if profile.zero_rtt_allowed {
            config.enable_early_data();
        }

        Ok(config)
    }

    /// Re-resolves `fingerprint` and rebuilds the wire configuration
    /// and hello image, keeping the CA and ticket settings. Used by the
    /// rotator between connections.
    pub fn reinitialize(
        &mut self,
        fingerprint: BrowserFingerprint,
        hostname: &str,
    ) -> Result<(), ConnectionError> {
        let mut resolved = match fingerprint {
            BrowserFingerprint::Randomized => randomized_profile(&mut self.rng),
            BrowserFingerprint::Custom => fallback_profile(),
            id => profile(id),
        };
        if !self.use_session_tickets {
            resolved.session_tickets = SessionTicketMode::Off;
        }
        match Self::build_config(&resolved, self.ca_file.as_deref()) {
            Ok(config) => {
                self.config = config;
                self.profile = resolved;
                self.fingerprint = fingerprint;
            }
            Err(e) => {
                error!(
                    "Failed to apply fingerprint {}: {}; installing fallback profile",
                    resolved.name, e
                );
                self.profile = fallback_profile();
                self.fingerprint = BrowserFingerprint::Custom;
                self.config = Self::build_config(&self.profile, self.ca_file.as_deref())
                    .map_err(|e| ConnectionError::Config(e.to_string()))?;
            }
        }
        self.hostname = hostname.to_string();
        self.client_hello = build_client_hello(&self.profile, hostname, &mut self.rng);
        Ok(())
    }

    /// Sets the SNI the next hello will carry. Idempotent; must happen
    /// before the first flight if the hostname changed.
    pub fn set_sni(&mut self, hostname: &str) -> Result<(), ConnectionError> {
        if self.hostname == hostname {
            return Ok(());
        }
        self.hostname = hostname.to_string();
        self.client_hello = build_client_hello(&self.profile, hostname, &mut self.rng);
        Ok(())
    }

    /// Replaces the active profile with a caller-supplied one and
    /// rebuilds the wire configuration; falls back on failure.
    pub fn apply_custom_fingerprint(
        &mut self,
        profile: FingerprintProfile,
    ) -> Result<(), ConnectionError> {
        match Self::build_config(&profile, self.ca_file.as_deref()) {
            Ok(config) => {
                self.config = config;
                self.profile = profile;
                self.fingerprint = BrowserFingerprint::Custom;
            }
            Err(e) => {
                warn!(
                    "Custom fingerprint {} rejected ({}); keeping fallback profile",
                    profile.name, e
                );
                self.profile = fallback_profile();
                self.config = Self::build_config(&self.profile, self.ca_file.as_deref())
                    .map_err(|e| ConnectionError::Config(e.to_string()))?;
            }
        }
        self.client_hello = build_client_hello(&self.profile, &self.hostname, &mut self.rng);
        Ok(())
    }

    /// Configures `config` with 0-RTT transport-parameter defaults and
    /// ALPN consistent with `fingerprint`'s resumption behavior.
    pub fn apply_zero_rtt_extensions(
        config: &mut quiche::Config,
        fingerprint: BrowserFingerprint,
    ) -> Result<(), ConnectionError> {
        let p = match fingerprint {
            BrowserFingerprint::Randomized | BrowserFingerprint::Custom => fallback_profile(),
            id => profile(id),
        };
        if !p.zero_rtt_allowed {
            return Err(ConnectionError::Config(format!(
                "profile {} does not resume with early data",
                p.name
            )));
        }
        let alpn = Self::quic_alpn(&p);
        let alpn_refs: Vec<&[u8]> = alpn.iter().map(|a| a.as_slice()).collect();
        config
            .set_application_protos(&alpn_refs)
            .map_err(|e| ConnectionError::Config(e.to_string()))?;
        config.enable_early_data();
        let t = &p.transport;
        config.set_initial_max_data(t.initial_max_data);
        config.set_initial_max_stream_data_bidi_local(t.initial_max_stream_data);
        config.set_initial_max_stream_data_bidi_remote(t.initial_max_stream_data);
        config.set_initial_max_streams_bidi(t.initial_max_streams_bidi);
        config.set_max_idle_timeout(t.max_idle_timeout_ms);
        Ok(())
    }

    /// Caches `session` (as returned by the wire library once the
    /// handshake finished) for later resumption to `hostname`.
    pub fn store_current_session(&self, hostname: &str, session: &[u8]) {
        if self.use_session_tickets
            && self.profile.session_tickets != SessionTicketMode::Off
        {
            SESSION_TICKETS
                .lock()
                .unwrap()
                .store(hostname, session, self.fingerprint);
            debug!("Stored session ticket for {}", hostname);
        }
    }

    /// Raw session bytes for `hostname` if a live ticket exists.
    pub fn restore_session(&self, hostname: &str) -> Option<Vec<u8>> {
        if !self.use_session_tickets {
            return None;
        }
        SESSION_TICKETS.lock().unwrap().get_raw(hostname)
    }

    pub fn verify_peer(&mut self, verify: bool) {
        self.config.verify_peer(verify);
    }

    pub fn log_keys(&mut self) {
        self.config.log_keys();
    }

    pub fn quic_config_mut(&mut self) -> &mut quiche::Config {
        &mut self.config
    }

    pub fn client_hello(&self) -> &[u8] {
        &self.client_hello
    }

    pub fn current_fingerprint(&self) -> BrowserFingerprint {
        self.fingerprint
    }

    pub fn profile(&self) -> &FingerprintProfile {
        &self.profile
    }

    pub fn sni(&self) -> &str {
        &self.hostname
    }

    pub fn ja3(&self) -> String {
        ja3_string(&self.profile)
    }

    pub fn ja3_hash(&self) -> String {
        ja3_hash(&self.profile)
    }
}
