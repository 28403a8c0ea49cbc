use quicsand::app_config::AppConfig;
use quicsand::burst::BurstFrameType;
use quicsand::stealth::{BrowserFingerprint, RotationStrategy};

#[test]
fn empty_config_uses_defaults() {
    let cfg = AppConfig::from_toml("").unwrap();
    assert_eq!(cfg.stealth.fingerprint, BrowserFingerprint::ChromeLatest);
    assert!(cfg.burst.is_none());
    assert!(!cfg.fec.enabled);
    assert!(!cfg.zero_rtt.enabled);
    assert!(cfg.validate().is_ok());
}

#[test]
fn full_config_parses_every_section() {
    let toml = r#"
        [stealth]
        fingerprint = "firefox"
        rotation = ["chrome", "safari"]
        rotation_strategy = "time_based"
        rotation_interval_s = 120

        [burst]
        min_interval_ms = 20
        max_interval_ms = 80
        frame_type = "websocket"
        jitter_factor = 0.2

        [fec]
        enabled = true
        redundancy_rate = 0.25

        [zero_rtt]
        enabled = true
        reject_if_no_token = true
        max_early_data = 8192
    "#;
    let cfg = AppConfig::from_toml(toml).unwrap();
    assert_eq!(cfg.stealth.fingerprint, BrowserFingerprint::FirefoxLatest);
    assert_eq!(
        cfg.stealth.rotation,
        vec![
            BrowserFingerprint::ChromeLatest,
            BrowserFingerprint::SafariLatest
        ]
    );
    assert_eq!(cfg.stealth.rotation_strategy, RotationStrategy::TimeBased);

    let burst = cfg.burst.as_ref().unwrap();
    assert_eq!(burst.min_interval_ms, 20);
    assert_eq!(burst.max_interval_ms, 80);
    assert_eq!(burst.frame_type, BurstFrameType::WebSocket);

    assert!(cfg.fec.enabled);
    assert_eq!(cfg.fec.redundancy_rate, Some(0.25));
    assert!(cfg.zero_rtt.enabled);
    assert!(cfg.zero_rtt.reject_if_no_token);
    assert_eq!(cfg.zero_rtt.max_early_data, 8192);
    assert!(cfg.validate().is_ok());
}

#[test]
fn unknown_fingerprint_is_an_error() {
    let toml = "[stealth]\nfingerprint = \"netscape\"\n";
    assert!(AppConfig::from_toml(toml).is_err());
}

#[test]
fn validate_rejects_inverted_burst_bounds() {
    let toml = "[burst]\nmin_interval_ms = 300\nmax_interval_ms = 100\n";
    let cfg = AppConfig::from_toml(toml).unwrap();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_out_of_range_fec_rate() {
    let toml = "[fec]\nenabled = true\nredundancy_rate = 0.9\n";
    let cfg = AppConfig::from_toml(toml).unwrap();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_rotation_without_interval() {
    let toml = "[stealth]\nrotation = [\"chrome\", \"firefox\"]\n";
    let cfg = AppConfig::from_toml(toml).unwrap();
    assert!(cfg.validate().is_err());
}
