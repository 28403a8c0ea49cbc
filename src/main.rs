use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quicsand::app_config::AppConfig;
use quicsand::core::{ClientConfig, QuicConnection};
use quicsand::stealth::{
    profile, ja3_hash, BrowserFingerprint, FingerprintRotator,
};
use quicsand::telemetry;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Stealth QUIC client", long_about = None)]
struct Cli {
    /// Server hostname
    #[clap(short, long, default_value = "example.com")]
    server: String,

    /// Server UDP port
    #[clap(short, long, default_value_t = 443)]
    port: u16,

    /// Browser fingerprint (chrome, firefox, safari, edge, brave,
    /// opera, chrome_android, safari_ios, random)
    #[clap(short, long, default_value = "chrome")]
    fingerprint: String,

    /// Disable uTLS and use the library default TLS configuration
    #[clap(long)]
    no_utls: bool,

    /// Enable peer certificate verification
    #[clap(long)]
    verify_peer: bool,

    /// CA trust store for peer verification
    #[clap(long, value_name = "PATH")]
    ca_file: Option<PathBuf>,

    /// Enable verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// Show TLS debug information (JA3, key log)
    #[clap(long)]
    debug_tls: bool,

    /// List available browser fingerprints and exit
    #[clap(long)]
    list_fingerprints: bool,

    /// Enable telemetry metrics on 0.0.0.0:9898
    #[clap(long)]
    telemetry: bool,

    /// Path to a unified TOML configuration file
    #[clap(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
    if cli.telemetry {
        telemetry::TELEMETRY_ENABLED.store(true, Ordering::Relaxed);
        telemetry::serve("0.0.0.0:9898");
    }

    if cli.list_fingerprints {
        println!("Available browser fingerprints:");
        for id in BrowserFingerprint::catalog() {
            let p = profile(*id);
            println!("- {} (JA3 {})", id, ja3_hash(&p));
        }
        println!("- randomized");
        return ExitCode::SUCCESS;
    }

    let Some(fingerprint) = BrowserFingerprint::from_cli_name(&cli.fingerprint) else {
        eprintln!("Unknown fingerprint '{}'", cli.fingerprint);
        return ExitCode::FAILURE;
    };

    let app_config = match &cli.config {
        Some(path) => match AppConfig::from_file(path) {
            Ok(cfg) => {
                if let Err(e) = cfg.validate() {
                    error!("Config validation failed: {}", e);
                }
                cfg
            }
            Err(e) => {
                error!("Failed to load config {}: {}", path.display(), e);
                AppConfig::default()
            }
        },
        None => AppConfig::default(),
    };

    let config = ClientConfig {
        fingerprint,
        use_utls: !cli.no_utls,
        verify_peer: cli.verify_peer,
        ca_file: cli.ca_file.clone(),
        debug_tls: cli.debug_tls,
        zero_rtt: app_config.zero_rtt,
        burst: app_config.burst.clone(),
        enable_fec: app_config.fec.enabled,
        ..ClientConfig::default()
    };

    match run_client(&cli, config, &app_config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_client(
    cli: &Cli,
    config: ClientConfig,
    app_config: &AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rotator = if !app_config.stealth.rotation.is_empty() {
        let mut r = FingerprintRotator::new(
            app_config.stealth.rotation.clone(),
            app_config.stealth.rotation_strategy,
            Duration::from_secs(app_config.stealth.rotation_interval_s.max(1)),
        );
        r.start_rotation();
        Some(r)
    } else {
        None
    };

    let mut conn = QuicConnection::new(config, None)?;
    if let Some(rate) = app_config.fec.redundancy_rate {
        conn.set_fec_redundancy_rate(rate);
    }

    conn.connect(&cli.server, cli.port).await?;

    let stats = conn.get_stats();
    info!(
        "Connected: RTT {:.1} ms, pacing {:.0} bps, cwnd {} bytes",
        stats.rtt_ms, stats.pacing_rate_bps, stats.congestion_window
    );

    tokio::select! {
        result = conn.drive() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    conn.disconnect(0x0).await?;
    if let Some(rotator) = rotator.as_mut() {
        rotator.shutdown().await;
    }
    if telemetry::TELEMETRY_ENABLED.load(Ordering::Relaxed) {
        telemetry::flush();
    }
    Ok(())
}
