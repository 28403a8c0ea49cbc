use quicsand::stealth::{
    fallback_profile, ja3_string, profile, BrowserFingerprint, UtlsConfigurator,
};

#[test]
fn initialize_produces_hello_and_wire_config() {
    let mut configurator = UtlsConfigurator::initialize_with_seed(
        BrowserFingerprint::ChromeLatest,
        "example.com",
        None,
        true,
        1,
    )
    .expect("initialize never hard-fails on a catalog profile");

    assert_eq!(
        configurator.current_fingerprint(),
        BrowserFingerprint::ChromeLatest
    );
    assert_eq!(configurator.sni(), "example.com");
    assert!(!configurator.client_hello().is_empty());
    assert_eq!(
        configurator.ja3(),
        ja3_string(&profile(BrowserFingerprint::ChromeLatest))
    );
    // The wire config handle is usable.
    let _ = configurator.quic_config_mut();
}

#[test]
fn set_sni_is_idempotent_and_rebuilds_on_change() {
    let mut configurator = UtlsConfigurator::initialize_with_seed(
        BrowserFingerprint::FirefoxLatest,
        "one.example",
        None,
        true,
        2,
    )
    .unwrap();
    let before = configurator.client_hello().to_vec();

    configurator.set_sni("one.example").unwrap();
    assert_eq!(configurator.client_hello(), &before[..], "same host, same hello");

    configurator.set_sni("two.example").unwrap();
    assert_eq!(configurator.sni(), "two.example");
    assert_ne!(configurator.client_hello(), &before[..]);
    assert_eq!(configurator.client_hello()[0], 0x01, "still a client_hello");
}

#[test]
fn reinitialize_switches_the_active_profile() {
    let mut configurator = UtlsConfigurator::initialize_with_seed(
        BrowserFingerprint::ChromeLatest,
        "example.com",
        None,
        true,
        3,
    )
    .unwrap();
    let chrome_ja3 = configurator.ja3();

    configurator
        .reinitialize(BrowserFingerprint::SafariLatest, "example.com")
        .unwrap();
    assert_eq!(
        configurator.current_fingerprint(),
        BrowserFingerprint::SafariLatest
    );
    assert_ne!(configurator.ja3(), chrome_ja3);
}

#[test]
fn custom_profile_application() {
    let mut configurator = UtlsConfigurator::initialize_with_seed(
        BrowserFingerprint::ChromeLatest,
        "example.com",
        None,
        true,
        4,
    )
    .unwrap();
    configurator
        .apply_custom_fingerprint(fallback_profile())
        .unwrap();
    assert_eq!(
        configurator.current_fingerprint(),
        BrowserFingerprint::Custom
    );
    assert_eq!(configurator.ja3(), ja3_string(&fallback_profile()));
}

#[test]
fn randomized_fingerprint_resolves_to_a_concrete_profile() {
    let configurator = UtlsConfigurator::initialize_with_seed(
        BrowserFingerprint::Randomized,
        "example.com",
        None,
        true,
        5,
    )
    .unwrap();
    assert!(configurator.profile().name.starts_with("randomized"));
    assert!(!configurator.profile().cipher_suites.is_empty());
}

#[test]
fn zero_rtt_extensions_follow_profile_policy() {
    let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION).unwrap();
    UtlsConfigurator::apply_zero_rtt_extensions(
        &mut config,
        BrowserFingerprint::ChromeLatest,
    )
    .expect("Chrome resumes with early data");

    let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION).unwrap();
    let refused =
        UtlsConfigurator::apply_zero_rtt_extensions(&mut config, BrowserFingerprint::Curl);
    assert!(refused.is_err(), "curl profile never offers early data");
}

#[test]
fn session_store_integration_respects_ticket_setting() {
    let with_tickets = UtlsConfigurator::initialize_with_seed(
        BrowserFingerprint::ChromeLatest,
        "utls-tickets.example",
        None,
        true,
        6,
    )
    .unwrap();
    with_tickets.store_current_session("utls-tickets.example", b"session-state");
    assert_eq!(
        with_tickets.restore_session("utls-tickets.example").unwrap(),
        b"session-state"
    );

    let without_tickets = UtlsConfigurator::initialize_with_seed(
        BrowserFingerprint::ChromeLatest,
        "utls-no-tickets.example",
        None,
        false,
        7,
    )
    .unwrap();
    without_tickets.store_current_session("utls-no-tickets.example", b"session-state");
    assert!(without_tickets
        .restore_session("utls-no-tickets.example")
        .is_none());
}
