//! # Fingerprint Rotator
//!
//! Chooses which fingerprint the next connection presents. Rotation
//! can be sequential, random, keyed to the time of day (office hours
//! look like Chrome/Edge, evenings like Firefox/Safari, nights like
//! mobile), or advanced on every new connection.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::fingerprint::BrowserFingerprint;
use super::utls::UtlsConfigurator;
use crate::error::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    Sequential,
    Random,
    TimeBased,
    ConnectionBased,
}

struct RotatorState {
    fingerprints: Vec<BrowserFingerprint>,
    index: usize,
    current: BrowserFingerprint,
    strategy: RotationStrategy,
    interval: Duration,
    last_rotation: Instant,
    rng: StdRng,
}

impl RotatorState {
    fn select_next(&mut self) -> BrowserFingerprint {
        if self.fingerprints.is_empty() {
            return self.current;
        }
        let next = match self.strategy {
            RotationStrategy::Sequential | RotationStrategy::ConnectionBased => {
                self.index = (self.index + 1) % self.fingerprints.len();
                self.fingerprints[self.index]
            }
            RotationStrategy::Random => {
                let current = self.current;
                let pool: Vec<BrowserFingerprint> = self
                    .fingerprints
                    .iter()
                    .copied()
                    .filter(|f| *f != current)
                    .collect();
                *pool.choose(&mut self.rng).unwrap_or(&current)
            }
            RotationStrategy::TimeBased => {
                let pool = time_based_pool(current_hour());
                let available: Vec<BrowserFingerprint> = self
                    .fingerprints
                    .iter()
                    .copied()
                    .filter(|f| pool.contains(f))
                    .collect();
                let candidates = if available.is_empty() {
                    &self.fingerprints
                } else {
                    &available
                };
                *candidates.choose(&mut self.rng).unwrap_or(&self.current)
            }
        };
        self.current = next;
        self.last_rotation = Instant::now();
        next
    }
}

/// Hour-of-day bucket → plausible client population.
pub fn time_based_pool(hour: u8) -> &'static [BrowserFingerprint] {
    use BrowserFingerprint::*;
    match hour {
        9..=17 => &[ChromeLatest, EdgeChromium],
        18..=23 => &[FirefoxLatest, SafariLatest],
        _ => &[ChromeAndroid, SafariIos, FirefoxMobile],
    }
}

fn current_hour() -> u8 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    ((secs / 3600) % 24) as u8
}

pub struct FingerprintRotator {
    state: Arc<Mutex<RotatorState>>,
    running: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl FingerprintRotator {
    pub fn new(
        fingerprints: Vec<BrowserFingerprint>,
        strategy: RotationStrategy,
        interval: Duration,
    ) -> Self {
        Self::with_rng(fingerprints, strategy, interval, StdRng::from_entropy())
    }

    /// Deterministic rotator for tests.
    pub fn with_seed(
        fingerprints: Vec<BrowserFingerprint>,
        strategy: RotationStrategy,
        interval: Duration,
        seed: u64,
    ) -> Self {
        Self::with_rng(
            fingerprints,
            strategy,
            interval,
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(
        fingerprints: Vec<BrowserFingerprint>,
        strategy: RotationStrategy,
        interval: Duration,
        rng: StdRng,
    ) -> Self {
        let current = fingerprints
            .first()
            .copied()
            .unwrap_or(BrowserFingerprint::ChromeLatest);
        Self {
            state: Arc::new(Mutex::new(RotatorState {
                fingerprints,
                index: 0,
                current,
                strategy,
                interval,
                last_rotation: Instant::now(),
                rng,
            })),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Launches the background rotation task for strategies that need
    /// one; RANDOM and CONNECTION_BASED rotate only on demand.
    pub fn start_rotation(&mut self) {
        let needs_task = {
            let state = self.state.lock().unwrap();
            matches!(
                state.strategy,
                RotationStrategy::Sequential | RotationStrategy::TimeBased
            )
        };
        if !needs_task || self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        self.task = Some(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let mut s = state.lock().unwrap();
                if s.last_rotation.elapsed() >= s.interval {
                    let next = s.select_next();
                    info!("Rotated fingerprint to {}", next);
                }
            }
            debug!("Fingerprint rotation task stopped");
        }));
    }

    /// Signals the task to stop; it terminates within one wake cycle.
    pub fn stop_rotation(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.take();
    }

    /// Stops and waits for the rotation task to finish.
    pub async fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn rotate_to_next(&self) -> BrowserFingerprint {
        self.state.lock().unwrap().select_next()
    }

    pub fn current_fingerprint(&self) -> BrowserFingerprint {
        self.state.lock().unwrap().current
    }

    pub fn add_fingerprint(&self, fingerprint: BrowserFingerprint) {
        let mut s = self.state.lock().unwrap();
        if !s.fingerprints.contains(&fingerprint) {
            s.fingerprints.push(fingerprint);
        }
    }

    pub fn remove_fingerprint(&self, fingerprint: BrowserFingerprint) {
        let mut s = self.state.lock().unwrap();
        s.fingerprints.retain(|f| *f != fingerprint);
        s.index = s.index.min(s.fingerprints.len().saturating_sub(1));
    }

    pub fn set_fingerprints(&self, fingerprints: Vec<BrowserFingerprint>) {
        let mut s = self.state.lock().unwrap();
        s.index = 0;
        if let Some(first) = fingerprints.first() {
            s.current = *first;
        }
        s.fingerprints = fingerprints;
    }

    pub fn set_strategy(&self, strategy: RotationStrategy) {
        self.state.lock().unwrap().strategy = strategy;
    }

    pub fn set_rotation_interval(&self, interval: Duration) {
        self.state.lock().unwrap().interval = interval;
    }

    /// Re-initializes `configurator` with the rotator's current
    /// fingerprint for `hostname`.
    pub fn apply(
        &self,
        configurator: &mut UtlsConfigurator,
        hostname: &str,
    ) -> Result<(), ConnectionError> {
        let fingerprint = self.current_fingerprint();
        configurator.reinitialize(fingerprint, hostname)
    }
}

impl Drop for FingerprintRotator {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
