use quicsand::core::{ClientConfig, QuicConnection, ZeroRttConfig, ZeroRttManager};

fn config_with_lifetime(lifetime_s: u32) -> ZeroRttConfig {
    ZeroRttConfig {
        enabled: true,
        max_token_lifetime_s: lifetime_s,
        ..ZeroRttConfig::default()
    }
}

#[test]
fn token_round_trip_validates_for_its_host() {
    let mut mgr = ZeroRttManager::new();
    let cfg = config_with_lifetime(7200);
    let token = mgr.generate_token("a.example", &cfg);
    assert!(mgr.validate_token(&token, "a.example"));
}

#[test]
fn token_does_not_validate_for_another_host() {
    let mut mgr = ZeroRttManager::new();
    let cfg = config_with_lifetime(7200);
    let token = mgr.generate_token("a.example", &cfg);
    assert!(!mgr.validate_token(&token, "b.example"));
}

#[test]
fn expired_token_fails_validation() {
    let mut mgr = ZeroRttManager::new();
    let cfg = config_with_lifetime(0);
    let token = mgr.generate_token("a.example", &cfg);
    assert!(token.is_expired());
    assert!(!mgr.validate_token(&token, "a.example"));
}

#[test]
fn tampered_token_fails_validation() {
    let mut mgr = ZeroRttManager::new();
    let cfg = config_with_lifetime(7200);
    let mut token = mgr.generate_token("a.example", &cfg);
    token.token_data[0] ^= 0x01;
    assert!(!mgr.validate_token(&token, "a.example"));
}

#[test]
fn master_key_rotation_invalidates_existing_tokens() {
    let mut mgr = ZeroRttManager::new();
    let cfg = config_with_lifetime(7200);
    let token = mgr.generate_token("a.example", &cfg);
    assert!(mgr.validate_token(&token, "a.example"));
    mgr.set_master_key([0x42; 32]);
    assert!(!mgr.validate_token(&token, "a.example"));
}

#[test]
fn per_host_token_cap_evicts_oldest() {
    let mut mgr = ZeroRttManager::new();
    let cfg = config_with_lifetime(7200);
    for _ in 0..6 {
        let token = mgr.generate_token("cap.example", &cfg);
        mgr.store_token(token, &cfg);
    }
    assert_eq!(mgr.token_count_for("cap.example"), 4);
}

#[test]
fn refused_without_token_when_policy_requires_one() {
    let mut mgr = ZeroRttManager::new();
    let cfg = ZeroRttConfig {
        enabled: true,
        reject_if_no_token: true,
        ..ZeroRttConfig::default()
    };
    assert!(!mgr.is_zero_rtt_possible("host-b.example", &cfg));
    assert_eq!(mgr.token_count_for("host-b.example"), 0);
}

#[test]
fn permitted_without_token_when_minting_is_allowed() {
    let mut mgr = ZeroRttManager::new();
    let cfg = config_with_lifetime(7200);
    assert!(mgr.is_zero_rtt_possible("host-c.example", &cfg));
    assert_eq!(mgr.token_count_for("host-c.example"), 1, "token was minted");
}

#[test]
fn disabled_policy_never_permits() {
    let mut mgr = ZeroRttManager::new();
    let cfg = ZeroRttConfig::default();
    assert!(!cfg.enabled);
    assert!(!mgr.is_zero_rtt_possible("host-d.example", &cfg));
}

#[test]
fn cleanup_drops_expired_tokens() {
    let mut mgr = ZeroRttManager::new();
    let cfg = config_with_lifetime(0);
    let token = mgr.generate_token("gone.example", &cfg);
    mgr.store_token(token, &cfg);
    mgr.cleanup_expired();
    assert_eq!(mgr.token_count_for("gone.example"), 0);
}

#[tokio::test]
async fn engine_refuses_zero_rtt_without_ticket() {
    let config = ClientConfig {
        zero_rtt: ZeroRttConfig {
            enabled: true,
            reject_if_no_token: true,
            ..ZeroRttConfig::default()
        },
        ..ClientConfig::default()
    };
    let mut conn = QuicConnection::new(config, None).expect("socket bind");
    assert!(
        !conn.attempt_zero_rtt_handshake("host-b.example"),
        "no ticket and reject_if_no_token set: attempt must refuse"
    );
    let stats = conn.get_stats();
    assert!(!stats.zero_rtt_attempted, "no early data may be emitted");
}
