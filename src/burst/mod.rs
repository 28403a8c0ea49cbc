// Copyright (c) 2024, The QuicSand Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Burst Buffer
//!
//! Collects outbound bytes and releases them as framed bursts whose
//! sizes, inter-arrival timing and byte framing mimic a chosen cover
//! traffic class, adapting online to observed latency, loss and
//! bandwidth. FIFO order of application bytes is preserved.

pub mod envelope;
pub mod shaping;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use self::envelope::EnvelopeWriter;

/// Cover traffic class a burst imitates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstFrameType {
    Http3Chunked,
    WebSocket,
    MediaStreaming,
    Interactive,
    Randomized,
}

#[derive(Debug, Clone)]
pub struct BurstConfig {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub min_size: usize,
    pub max_size: usize,
    pub optimal_size: usize,
    pub max_buffer_bytes: usize,
    pub frame_type: BurstFrameType,
    pub adaptive_timing: bool,
    pub adaptive_sizing: bool,
    pub mimic_realistic_patterns: bool,
    pub jitter_factor: f64,
    pub target_latency_ms: f64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 50,
            max_interval_ms: 200,
            min_size: 512,
            max_size: 4096,
            optimal_size: 1400,
            max_buffer_bytes: 1024 * 1024,
            frame_type: BurstFrameType::Http3Chunked,
            adaptive_timing: true,
            adaptive_sizing: true,
            mimic_realistic_patterns: true,
            jitter_factor: 0.1,
            target_latency_ms: 100.0,
        }
    }
}

/// Observed network state and burst statistics.
#[derive(Debug, Clone, Default)]
pub struct BurstMetrics {
    pub observed_latency_ms: f64,
    pub packet_loss_rate: f64,
    /// Bits per second, as reported by the congestion controller.
    pub bandwidth_estimate_bps: f64,
    pub total_bursts: u64,
    pub total_bytes: u64,
    pub buffer_high_watermark: usize,
    pub average_burst_interval_ms: f64,
    pub adaptation_score: f64,
}

pub type BurstHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

struct Inner {
    config: BurstConfig,
    metrics: BurstMetrics,
    queue: VecDeque<Vec<u8>>,
    buffered: usize,
    handler: Option<BurstHandler>,
    writer: EnvelopeWriter,
    rng: StdRng,
    last_factor: f64,
}

impl Inner {
    /// Dequeues up to `target` payload bytes, keeping offer order and
    /// splitting a chunk when it straddles the boundary.
    fn take_payload(&mut self, target: usize) -> Vec<u8> {
        let mut burst = Vec::with_capacity(target.min(self.buffered));
        while burst.len() < target {
            let Some(mut chunk) = self.queue.pop_front() else {
                break;
            };
            let room = target - burst.len();
            if chunk.len() > room {
                let rest = chunk.split_off(room);
                self.queue.push_front(rest);
            }
            self.buffered -= chunk.len();
            burst.extend_from_slice(&chunk);
        }
        burst
    }

    /// Assembles one framed burst of at most the adaptive optimal size.
    fn next_burst(&mut self, interval_ms: u64) -> Option<Vec<u8>> {
        if self.buffered == 0 {
            return None;
        }
        let target = shaping::optimal_burst_size(&self.config, &self.metrics, interval_ms);
        let payload = self.take_payload(target);
        if payload.is_empty() {
            return None;
        }
        self.metrics.total_bursts += 1;
        self.metrics.total_bytes += payload.len() as u64;
        crate::telemetry!(crate::telemetry::BURSTS_SENT.inc());
        crate::telemetry!(crate::telemetry::BURST_BYTES.inc_by(payload.len() as u64));
        Some(self.writer.apply(self.config.frame_type, &payload))
    }

    /// Drains everything queued into framed bursts, none carrying more
    /// than `max_size` payload bytes.
    fn drain_all(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while self.buffered > 0 {
            let payload = self.take_payload(self.config.max_size);
            if payload.is_empty() {
                break;
            }
            self.metrics.total_bursts += 1;
            self.metrics.total_bytes += payload.len() as u64;
            crate::telemetry!(crate::telemetry::BURSTS_SENT.inc());
            crate::telemetry!(crate::telemetry::BURST_BYTES.inc_by(payload.len() as u64));
            out.push(self.writer.apply(self.config.frame_type, &payload));
        }
        out
    }

    fn record_interval(&mut self, interval_ms: u64) {
        let n = self.metrics.total_bursts.max(1) as f64;
        let avg = self.metrics.average_burst_interval_ms;
        self.metrics.average_burst_interval_ms =
            (avg * (n - 1.0) + interval_ms as f64) / n;
    }
}

/// Producer side buffers writes; a cooperative timer task releases
/// them as shaped bursts through the registered handler. The lock is
/// never held across a sleep or a handler invocation.
pub struct BurstBuffer {
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl BurstBuffer {
    pub fn new(config: BurstConfig) -> Self {
        Self::with_parts(config, EnvelopeWriter::new(), StdRng::from_entropy())
    }

    /// Deterministic buffer for tests: seeds both the shaping jitter
    /// and the envelope writer.
    pub fn with_seed(config: BurstConfig, seed: u64) -> Self {
        Self::with_parts(
            config,
            EnvelopeWriter::with_seed(seed),
            StdRng::seed_from_u64(seed ^ 0x5eed),
        )
    }

    fn with_parts(config: BurstConfig, writer: EnvelopeWriter, rng: StdRng) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                metrics: BurstMetrics {
                    adaptation_score: 1.0,
                    ..Default::default()
                },
                queue: VecDeque::new(),
                buffered: 0,
                handler: None,
                writer,
                rng,
                last_factor: 1.0,
            })),
            running: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Queues bytes for the next bursts. Fails when the buffer bound
    /// would be exceeded; the caller decides whether to back off or
    /// send unshaped.
    pub fn add_data(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.buffered + data.len() > inner.config.max_buffer_bytes {
            warn!(
                "Burst buffer full ({} bytes queued), rejecting {} bytes",
                inner.buffered,
                data.len()
            );
            return false;
        }
        inner.buffered += data.len();
        if inner.buffered > inner.metrics.buffer_high_watermark {
            inner.metrics.buffer_high_watermark = inner.buffered;
        }
        inner.queue.push_back(data.to_vec());
        true
    }

    /// Must be called before `start`.
    pub fn set_data_handler<F>(&self, handler: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().handler = Some(Arc::new(handler));
    }

    /// Launches the burst task. Returns false if no handler is set or
    /// the task is already running.
    pub fn start(&mut self) -> bool {
        {
            let inner = self.inner.lock().unwrap();
            if inner.handler.is_none() {
                warn!("Burst buffer started without a data handler");
                return false;
            }
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let running = Arc::clone(&self.running);
        let notify = Arc::clone(&self.notify);
        self.task = Some(tokio::spawn(async move {
            let mut last_interval_ms = 0u64;
            while running.load(Ordering::SeqCst) {
                let (interval_ms, handler) = {
                    let mut guard = inner.lock().unwrap();
                    let factor = if guard.config.adaptive_timing {
                        let f = shaping::interval_factor(
                            &guard.config,
                            &guard.metrics,
                            guard.buffered,
                            guard.last_factor,
                        );
                        guard.last_factor = f;
                        f
                    } else {
                        1.0
                    };
                    let Inner {
                        ref config,
                        ref mut rng,
                        ..
                    } = *guard;
                    let ms = shaping::burst_interval_ms(config, factor, rng);
                    (ms, guard.handler.clone())
                };

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                    _ = notify.notified() => {}
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let burst = {
                    let mut guard = inner.lock().unwrap();
                    guard.record_interval(interval_ms);
                    guard.next_burst(interval_ms)
                };
                if let (Some(handler), Some(burst)) = (handler, burst) {
                    handler(burst);
                }

                {
                    let mut guard = inner.lock().unwrap();
                    if guard.config.adaptive_timing || guard.config.adaptive_sizing {
                        let Inner {
                            ref mut config,
                            ref mut metrics,
                            ..
                        } = *guard;
                        shaping::adapt_to_network_conditions(config, metrics);
                    }
                }
                last_interval_ms = interval_ms;
            }
            debug!("Burst task stopped (last interval {} ms)", last_interval_ms);
        }));
        info!("Burst buffer started");
        true
    }

    /// Stops the burst task (the next wake returns without emitting),
    /// joins it, then drains whatever is still queued through the
    /// handler.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.flush();
    }

    /// Synchronously emits all queued bytes, split into bursts of at
    /// most `max_size` payload each.
    pub fn flush(&self) {
        let (bursts, handler) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.drain_all(), inner.handler.clone())
        };
        if let Some(handler) = handler {
            for burst in bursts {
                handler(burst);
            }
        }
    }

    /// Called after ACK processing with the latest path observations.
    /// Bandwidth is in bits per second.
    pub fn update_network_conditions(&self, latency_ms: f64, loss_rate: f64, bandwidth_bps: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.metrics.observed_latency_ms = latency_ms;
        inner.metrics.packet_loss_rate = loss_rate;
        inner.metrics.bandwidth_estimate_bps = bandwidth_bps;
    }

    pub fn metrics(&self) -> BurstMetrics {
        self.inner.lock().unwrap().metrics.clone()
    }

    pub fn config(&self) -> BurstConfig {
        self.inner.lock().unwrap().config.clone()
    }

    pub fn set_config(&self, config: BurstConfig) {
        self.inner.lock().unwrap().config = config;
    }

    pub fn buffered_bytes(&self) -> usize {
        self.inner.lock().unwrap().buffered
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for BurstBuffer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
