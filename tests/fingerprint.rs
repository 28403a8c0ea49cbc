use quicsand::stealth::fingerprint::codes;
use quicsand::stealth::{
    build_client_hello, fallback_profile, is_grease, ja3_hash, ja3_string, profile,
    randomized_profile, BrowserFingerprint,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const TLS13_SUITES: [u16; 3] = [0x1301, 0x1302, 0x1303];

#[test]
fn catalog_covers_every_named_client() {
    assert_eq!(BrowserFingerprint::catalog().len(), 16);
    for id in BrowserFingerprint::catalog() {
        let p = profile(*id);
        assert!(!p.cipher_suites.is_empty(), "{} has no ciphers", id);
        assert!(!p.named_groups.is_empty(), "{} has no groups", id);
        assert!(!p.extensions.is_empty(), "{} has no extensions", id);
        assert_eq!(p.compression_methods, vec![0x00]);
        assert!(p.version_min <= p.version_max);
        assert_eq!(
            p.extensions[0],
            codes::EXT_SERVER_NAME,
            "{} must lead with SNI",
            id
        );
    }
}

#[test]
fn cli_names_resolve_case_insensitively() {
    assert_eq!(
        BrowserFingerprint::from_cli_name("ChRoMe"),
        Some(BrowserFingerprint::ChromeLatest)
    );
    assert_eq!(
        BrowserFingerprint::from_cli_name("SAFARI_IOS"),
        Some(BrowserFingerprint::SafariIos)
    );
    assert_eq!(
        BrowserFingerprint::from_cli_name("random"),
        Some(BrowserFingerprint::Randomized)
    );
    assert_eq!(BrowserFingerprint::from_cli_name("netscape"), None);
}

#[test]
fn chrome_ja3_string_is_pinned() {
    let p = profile(BrowserFingerprint::ChromeLatest);
    assert_eq!(
        ja3_string(&p),
        "771,4865-4866-4867-49195-49199-49196-49200-52393-52392-158-159,\
         0-5-10-11-13-16-18-34-35-51-43-45-23-41-21-17513,\
         29-23-24-25-256-257,0"
    );
}

#[test]
fn ja3_hash_is_stable_lowercase_md5() {
    let a = ja3_hash(&profile(BrowserFingerprint::FirefoxLatest));
    let b = ja3_hash(&profile(BrowserFingerprint::FirefoxLatest));
    assert_eq!(a, b);
    assert_eq!(a.len(), 32);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_ne!(a, ja3_hash(&profile(BrowserFingerprint::SafariLatest)));
}

#[test]
fn ja3_excludes_grease_values() {
    let p = profile(BrowserFingerprint::ChromeLatest);
    let ja3 = ja3_string(&p);
    for field in ja3.split(',').skip(1).take(3) {
        for token in field.split('-').filter(|t| !t.is_empty()) {
            let value: u16 = token.parse().expect("numeric JA3 token");
            assert!(!is_grease(value), "GREASE value {} leaked into JA3", value);
        }
    }
}

#[test]
fn grease_values_match_rfc8701_shape() {
    for i in 0..16 {
        assert!(is_grease(codes::grease_value(i)));
    }
    assert!(!is_grease(0x1301));
    assert!(!is_grease(0x0a1a));
}

#[test]
fn hello_has_valid_structure_and_padding() {
    let p = profile(BrowserFingerprint::ChromeLatest);
    let mut rng = StdRng::seed_from_u64(1);
    let hello = build_client_hello(&p, "example.com", &mut rng);

    assert_eq!(hello[0], 0x01, "client_hello handshake type");
    let body_len =
        ((hello[1] as usize) << 16) | ((hello[2] as usize) << 8) | hello[3] as usize;
    assert_eq!(body_len, hello.len() - 4, "handshake length field");
    assert_eq!(&hello[4..6], &[0x03, 0x03], "legacy version pins TLS 1.2");
    // Chrome pads the hello to a 64-byte multiple.
    assert_eq!(hello.len() % 64, 0, "padding multiple violated");
}

#[test]
fn hello_cipher_list_matches_profile_plus_grease() {
    let p = profile(BrowserFingerprint::ChromeLatest);
    let mut rng = StdRng::seed_from_u64(2);
    let hello = build_client_hello(&p, "example.com", &mut rng);

    // type(1) + len(3) + version(2) + random(32) + sid_len(1) + sid(32)
    let cipher_len_at = 1 + 3 + 2 + 32 + 1 + 32;
    let cipher_len =
        ((hello[cipher_len_at] as usize) << 8) | hello[cipher_len_at + 1] as usize;
    assert_eq!(
        cipher_len / 2,
        p.cipher_suites.len() + 1,
        "one GREASE value leads the cipher list"
    );
    let first =
        u16::from_be_bytes([hello[cipher_len_at + 2], hello[cipher_len_at + 3]]);
    assert!(is_grease(first));
    let second =
        u16::from_be_bytes([hello[cipher_len_at + 4], hello[cipher_len_at + 5]]);
    assert_eq!(second, p.cipher_suites[0]);
}

#[test]
fn firefox_hello_has_no_grease() {
    let p = profile(BrowserFingerprint::FirefoxLatest);
    let mut rng = StdRng::seed_from_u64(3);
    let hello = build_client_hello(&p, "example.com", &mut rng);
    let cipher_len_at = 1 + 3 + 2 + 32 + 1 + 32;
    let cipher_len =
        ((hello[cipher_len_at] as usize) << 8) | hello[cipher_len_at + 1] as usize;
    assert_eq!(cipher_len / 2, p.cipher_suites.len());
    let first =
        u16::from_be_bytes([hello[cipher_len_at + 2], hello[cipher_len_at + 3]]);
    assert_eq!(first, p.cipher_suites[0]);
}

#[test]
fn randomized_profile_keeps_the_compatibility_floor() {
    for seed in 0..32u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let p = randomized_profile(&mut rng);
        assert_eq!(p.id, BrowserFingerprint::Randomized);
        for suite in &p.cipher_suites[..3] {
            assert!(
                TLS13_SUITES.contains(suite),
                "leading suite {:#06x} perturbed (seed {})",
                suite,
                seed
            );
        }
        if p.record_size_limit > 0 {
            // Perturbation stays within 10% of the catalog values.
            assert!((14_000..=18_100).contains(&p.record_size_limit));
        }
    }
}

#[test]
fn fallback_profile_is_minimal_tls13() {
    let p = fallback_profile();
    assert_eq!(
        p.cipher_suites,
        vec![0x1301, 0x1302, 0x1303],
        "fallback carries exactly the TLS 1.3 suites"
    );
    assert_eq!(p.named_groups, vec![0x001d, 0x0017]);
    assert_eq!(p.supported_versions(), vec![0x0304]);
    assert!(!p.grease.any());
}

#[test]
fn mobile_profiles_advertise_smaller_windows() {
    let desktop = profile(BrowserFingerprint::ChromeLatest);
    let mobile = profile(BrowserFingerprint::ChromeAndroid);
    assert!(mobile.transport.initial_max_data < desktop.transport.initial_max_data);
    assert!(
        mobile.transport.initial_max_stream_data < desktop.transport.initial_max_stream_data
    );
}
