//! Telemetry metrics used throughout quicsand.
//!
//! Currently exported metrics:
//! - `bytes_sent_total` / `bytes_received_total`: UDP bytes through the core.
//! - `bursts_sent_total` / `burst_bytes_total`: shaped bursts emitted.
//! - `path_migrations_total`: successful connection migrations.
//! - `zero_rtt_attempts_total` / `zero_rtt_accepted_total`: 0-RTT outcomes.
//! - `session_tickets_stored_total`: tickets cached for resumption.
//! - `fec_recovered_total`: payloads reconstructed by the FEC shim.
//! - `dns_errors_total`: name resolution failures.

use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};
use std::sync::atomic::AtomicBool;

pub static TELEMETRY_ENABLED: AtomicBool = AtomicBool::new(false);

/// Records a metric only when telemetry has been enabled, so the
/// disabled path costs a single atomic load.
#[macro_export]
macro_rules! telemetry {
    ($e:expr) => {
        if $crate::telemetry::TELEMETRY_ENABLED.load(std::sync::atomic::Ordering::Relaxed) {
            $e;
        }
    };
}

lazy_static! {
    pub static ref BYTES_SENT: IntCounter =
        register_int_counter!("bytes_sent_total", "Total UDP bytes sent").unwrap();
    pub static ref BYTES_RECEIVED: IntCounter =
        register_int_counter!("bytes_received_total", "Total UDP bytes received").unwrap();
    pub static ref BURSTS_SENT: IntCounter =
        register_int_counter!("bursts_sent_total", "Shaped bursts emitted").unwrap();
    pub static ref BURST_BYTES: IntCounter =
        register_int_counter!("burst_bytes_total", "Bytes emitted inside shaped bursts").unwrap();
    pub static ref PATH_MIGRATIONS: IntCounter =
        register_int_counter!("path_migrations_total", "Successful connection migrations").unwrap();
    pub static ref ZERO_RTT_ATTEMPTS: IntCounter =
        register_int_counter!("zero_rtt_attempts_total", "0-RTT handshake attempts").unwrap();
    pub static ref ZERO_RTT_ACCEPTED: IntCounter =
        register_int_counter!("zero_rtt_accepted_total", "0-RTT handshakes accepted").unwrap();
    pub static ref TICKETS_STORED: IntCounter =
        register_int_counter!("session_tickets_stored_total", "Session tickets cached").unwrap();
    pub static ref FEC_RECOVERED: IntCounter =
        register_int_counter!("fec_recovered_total", "Payloads recovered by FEC").unwrap();
    pub static ref DNS_ERRORS: IntCounter =
        register_int_counter!("dns_errors_total", "Number of DNS resolution errors").unwrap();
}

/// Serves the metrics as plaintext on a background thread.
pub fn serve(addr: &str) {
    use std::io::Write;
    use std::net::TcpListener;
    let listener = match TcpListener::bind(addr) {
        Ok(l) => l,
        Err(e) => {
            log::error!("Failed to bind metrics endpoint {}: {}", addr, e);
            return;
        }
    };
    std::thread::spawn(move || {
        let encoder = TextEncoder::new();
        for stream in listener.incoming() {
            if let Ok(mut s) = stream {
                let metrics = prometheus::gather();
                let mut buf = Vec::new();
                if encoder.encode(&metrics, &mut buf).is_ok() {
                    let _ = s.write_all(&buf);
                }
            }
        }
    });
}

pub fn flush() {
    let encoder = TextEncoder::new();
    let metrics = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&metrics, &mut buf).is_ok() {
        log::info!("\n{}", String::from_utf8_lossy(&buf));
    }
}
