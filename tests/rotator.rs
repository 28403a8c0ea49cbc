use quicsand::stealth::rotator::time_based_pool;
use quicsand::stealth::{BrowserFingerprint, FingerprintRotator, RotationStrategy};
use std::time::Duration;

use BrowserFingerprint::{ChromeLatest, FirefoxLatest, SafariLatest};

#[test]
fn sequential_rotation_walks_the_list() {
    let rotator = FingerprintRotator::with_seed(
        vec![ChromeLatest, FirefoxLatest, SafariLatest],
        RotationStrategy::Sequential,
        Duration::from_secs(60),
        1,
    );
    assert_eq!(rotator.current_fingerprint(), ChromeLatest);

    let observed: Vec<_> = (0..5).map(|_| rotator.rotate_to_next()).collect();
    assert_eq!(
        observed,
        vec![
            FirefoxLatest,
            SafariLatest,
            ChromeLatest,
            FirefoxLatest,
            SafariLatest
        ]
    );
}

#[test]
fn random_rotation_avoids_repeating_the_current() {
    let rotator = FingerprintRotator::with_seed(
        vec![ChromeLatest, FirefoxLatest, SafariLatest],
        RotationStrategy::Random,
        Duration::from_secs(60),
        2,
    );
    let mut previous = rotator.current_fingerprint();
    for _ in 0..50 {
        let next = rotator.rotate_to_next();
        assert_ne!(next, previous, "RANDOM never repeats the current entry");
        previous = next;
    }
}

#[test]
fn connection_based_rotation_advances_per_call() {
    let rotator = FingerprintRotator::with_seed(
        vec![ChromeLatest, FirefoxLatest],
        RotationStrategy::ConnectionBased,
        Duration::from_secs(60),
        3,
    );
    assert_eq!(rotator.rotate_to_next(), FirefoxLatest);
    assert_eq!(rotator.rotate_to_next(), ChromeLatest);
    assert_eq!(rotator.rotate_to_next(), FirefoxLatest);
}

#[test]
fn time_based_pools_follow_the_clock() {
    use BrowserFingerprint::*;
    assert_eq!(time_based_pool(10), &[ChromeLatest, EdgeChromium]);
    assert_eq!(time_based_pool(20), &[FirefoxLatest, SafariLatest]);
    assert_eq!(time_based_pool(3), &[ChromeAndroid, SafariIos, FirefoxMobile]);
}

#[test]
fn time_based_rotation_stays_inside_the_configured_list() {
    let list = vec![ChromeLatest, FirefoxLatest, SafariLatest];
    let rotator = FingerprintRotator::with_seed(
        list.clone(),
        RotationStrategy::TimeBased,
        Duration::from_secs(60),
        4,
    );
    for _ in 0..20 {
        let next = rotator.rotate_to_next();
        assert!(list.contains(&next));
    }
}

#[test]
fn membership_updates_apply() {
    let rotator = FingerprintRotator::with_seed(
        vec![ChromeLatest],
        RotationStrategy::Sequential,
        Duration::from_secs(60),
        5,
    );
    rotator.add_fingerprint(FirefoxLatest);
    rotator.add_fingerprint(FirefoxLatest); // duplicate is ignored
    assert_eq!(rotator.rotate_to_next(), FirefoxLatest);
    rotator.remove_fingerprint(FirefoxLatest);
    assert_eq!(rotator.rotate_to_next(), ChromeLatest);
}

#[tokio::test]
async fn background_task_stops_within_one_wake() {
    let mut rotator = FingerprintRotator::with_seed(
        vec![ChromeLatest, FirefoxLatest],
        RotationStrategy::Sequential,
        Duration::from_secs(3600),
        6,
    );
    rotator.start_rotation();
    let stopped = tokio::time::timeout(Duration::from_secs(2), rotator.shutdown()).await;
    assert!(stopped.is_ok(), "rotation task must stop within one wake");
}
