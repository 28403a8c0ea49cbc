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

//! # BBRv2 Congestion Controller
//!
//! Bandwidth/RTT-probing congestion control after Google's BBRv2
//! draft. Produces a pacing rate and congestion window from observed
//! delivery rate, RTT, inflight and loss; the burst shaper and the
//! connection stats read the derived quantities.

use std::sync::Mutex;

/// Gain cycle applied to the pacing rate while probing bandwidth.
pub const PACING_GAIN_CYCLE: [f64; 8] = [1.25, 0.75, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];

/// RTT samples below this are clamped up; measurement artifacts, not
/// real paths.
const MIN_PLAUSIBLE_RTT_US: u64 = 500;
/// RTT samples above this are discarded outright.
const MAX_PLAUSIBLE_RTT_US: u64 = 15_000_000;

const BW_FILTER_LEN: usize = 10;
const RTT_FILTER_LEN: usize = 10;

/// Consecutive flat bandwidth samples before STARTUP declares the pipe
/// full.
const STARTUP_FULL_BW_ROUNDS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbrMode {
    Startup,
    Drain,
    ProbeBw,
    ProbeRtt,
}

/// Tunables. Defaults follow the BBRv2 draft values.
#[derive(Debug, Clone, Copy)]
pub struct BbrParams {
    pub startup_gain: f64,
    pub drain_gain: f64,
    pub probe_rtt_gain: f64,
    pub cwnd_gain: f64,
    pub startup_cwnd_gain: f64,
    pub probe_rtt_interval_ms: u64,
    pub probe_rtt_duration_ms: u64,
    pub min_rtt_window_ms: u64,
    pub min_pipe_cwnd: u64,
}

impl Default for BbrParams {
    fn default() -> Self {
        Self {
            startup_gain: 2.885,
            drain_gain: 0.75,
            probe_rtt_gain: 0.75,
            cwnd_gain: 2.0,
            startup_cwnd_gain: 2.885,
            probe_rtt_interval_ms: 10_000,
            probe_rtt_duration_ms: 200,
            min_rtt_window_ms: 10_000,
            min_pipe_cwnd: 4 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BwSample {
    bandwidth_bps: f64,
    timestamp_us: u64,
}

#[derive(Debug, Clone, Copy)]
struct RttSample {
    rtt_us: u64,
    timestamp_us: u64,
}

/// Copy-out snapshot of the derived quantities.
#[derive(Debug, Clone, Copy)]
pub struct BbrSnapshot {
    pub mode: BbrMode,
    pub bottleneck_bandwidth_bps: f64,
    pub min_rtt_us: u64,
    pub pacing_rate_bps: f64,
    pub congestion_window: u64,
    pub pacing_gain: f64,
    pub cwnd_gain: f64,
    pub cycle_index: usize,
    pub filled_pipe: bool,
}

struct BbrState {
    params: BbrParams,
    mode: BbrMode,

    bw_samples: Vec<BwSample>,
    rtt_samples: Vec<RttSample>,

    bottleneck_bw_bps: f64,
    min_rtt_us: u64,
    last_bw_update_us: u64,
    last_rtt_update_us: u64,

    pacing_gain: f64,
    cwnd_gain: f64,

    cycle_index: usize,
    cycle_start_us: u64,

    probe_rtt_done_time_us: u64,
    probe_rtt_round_done_time_us: u64,
    next_probe_rtt_time_us: u64,
    probe_rtt_round_done: bool,

    filled_pipe: bool,
    flat_bw_rounds: u32,
}

impl BbrState {
    fn new(params: BbrParams) -> Self {
        Self {
            mode: BbrMode::Startup,
            bw_samples: Vec::with_capacity(BW_FILTER_LEN),
            rtt_samples: Vec::with_capacity(RTT_FILTER_LEN),
            bottleneck_bw_bps: 0.0,
            min_rtt_us: u64::MAX,
            last_bw_update_us: 0,
            last_rtt_update_us: 0,
            pacing_gain: params.startup_gain,
            cwnd_gain: params.startup_cwnd_gain,
            cycle_index: 0,
            cycle_start_us: 0,
            probe_rtt_done_time_us: 0,
            probe_rtt_round_done_time_us: 0,
            next_probe_rtt_time_us: 0,
            probe_rtt_round_done: false,
            filled_pipe: false,
            flat_bw_rounds: 0,
            params,
        }
    }

    fn enter_startup(&mut self) {
        self.mode = BbrMode::Startup;
        self.pacing_gain = self.params.startup_gain;
        self.cwnd_gain = self.params.startup_cwnd_gain;
    }

    fn enter_drain(&mut self) {
        self.mode = BbrMode::Drain;
        self.pacing_gain = self.params.drain_gain;
        self.cwnd_gain = self.params.cwnd_gain;
    }

    fn enter_probe_bw(&mut self, now_us: u64) {
        self.mode = BbrMode::ProbeBw;
        self.cycle_index = 0;
        self.cycle_start_us = now_us;
        self.pacing_gain = PACING_GAIN_CYCLE[0];
        self.cwnd_gain = self.params.cwnd_gain;
        if self.next_probe_rtt_time_us == 0 {
            self.next_probe_rtt_time_us = now_us + self.params.probe_rtt_interval_ms * 1000;
        }
    }

    fn enter_probe_rtt(&mut self, now_us: u64) {
        self.mode = BbrMode::ProbeRtt;
        self.pacing_gain = self.params.probe_rtt_gain;
        self.cwnd_gain = self.params.probe_rtt_gain;
        self.probe_rtt_done_time_us = now_us + self.params.probe_rtt_duration_ms * 1000;
        self.probe_rtt_round_done = false;
        self.probe_rtt_round_done_time_us = 0;
    }

    fn bdp_bytes(&self) -> u64 {
        if self.min_rtt_us == u64::MAX {
            return 0;
        }
        // bits/s * s / 8 = bytes in flight at the estimated operating
        // point.
        (self.bottleneck_bw_bps * self.min_rtt_us as f64 / 8_000_000.0) as u64
    }

    fn probe_rtt_cwnd(&self) -> u64 {
        self.params.min_pipe_cwnd.max(self.bdp_bytes() / 2)
    }

    /// Robust windowed-max estimator: the upper 80% of the window is
    /// blended between max and mean by a variance-driven weight, then
    /// hysteresis keeps the estimate from oscillating.
    fn update_bandwidth_filter(&mut self, bandwidth_bps: f64, now_us: u64) {
        if bandwidth_bps <= 0.0 {
            return;
        }
        if self.bw_samples.len() >= BW_FILTER_LEN {
            self.bw_samples.remove(0);
        }
        self.bw_samples.push(BwSample {
            bandwidth_bps,
            timestamp_us: now_us,
        });

        let mut values: Vec<f64> = self.bw_samples.iter().map(|s| s.bandwidth_bps).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let start = (values.len() as f64 * 0.2) as usize;
        let start = start.max(1).min(values.len().saturating_sub(1));
        let upper = &values[start..];
        let (max_bw, sum): (f64, f64) = upper
            .iter()
            .fold((0.0, 0.0), |(m, s), v| (m.max(*v), s + v));
        let count = upper.len().max(1) as f64;
        let avg_bw = sum / count;

        let variance = upper
            .iter()
            .map(|v| (v - avg_bw) * (v - avg_bw))
            .sum::<f64>()
            / count;
        let norm_variance = (variance / (avg_bw * avg_bw + 1e-10)).min(1.0);
        let max_weight = (0.8 - norm_variance * 0.3).max(0.5);
        let weighted = max_bw * max_weight + avg_bw * (1.0 - max_weight);

        let raise = weighted > self.bottleneck_bw_bps * 1.05;
        let lower = weighted < self.bottleneck_bw_bps * 0.75;
        let stale = now_us.saturating_sub(self.last_bw_update_us)
            > self.params.min_rtt_window_ms * 1000;
        if raise || lower || stale {
            let transition = (0.1 + norm_variance * 0.4).min(0.5);
            if self.bottleneck_bw_bps > 0.0 {
                self.bottleneck_bw_bps =
                    self.bottleneck_bw_bps * (1.0 - transition) + weighted * transition;
            } else {
                self.bottleneck_bw_bps = weighted;
            }
            self.last_bw_update_us = now_us;
        }
    }

    /// 10th-percentile min filter with windowed refresh. Samples below
    /// 500 µs are clamped up, above 15 s discarded.
    fn update_rtt_filter(&mut self, rtt_us: u64, now_us: u64) {
        if rtt_us == 0 {
            return;
        }
        if rtt_us > MAX_PLAUSIBLE_RTT_US {
            log::warn!("Discarding implausible RTT sample of {} us", rtt_us);
            return;
        }
        let rtt_us = rtt_us.max(MIN_PLAUSIBLE_RTT_US);

        if self.rtt_samples.len() >= RTT_FILTER_LEN {
            self.rtt_samples.remove(0);
        }
        self.rtt_samples.push(RttSample {
            rtt_us,
            timestamp_us: now_us,
        });

        let window_floor = now_us.saturating_sub(self.params.min_rtt_window_ms * 1000);
        self.rtt_samples.retain(|s| s.timestamp_us >= window_floor);

        let mut rtts: Vec<u64> = self.rtt_samples.iter().map(|s| s.rtt_us).collect();
        rtts.sort_unstable();

        let filtered = if rtts.len() >= 5 {
            rtts[rtts.len() / 10]
        } else {
            rtts[0]
        };

        if filtered < self.min_rtt_us {
            self.min_rtt_us = filtered;
            self.last_rtt_update_us = now_us;
        } else if now_us.saturating_sub(self.last_rtt_update_us)
            > self.params.min_rtt_window_ms * 1000
        {
            // Window expired without a smaller sample: refresh toward
            // the mean of the lower 20% so a shifted path does not pin
            // a stale minimum forever.
            let lower_count = (rtts.len() / 5).max(1).min(rtts.len());
            let lower_mean: u64 =
                rtts[..lower_count].iter().sum::<u64>() / lower_count as u64;
            if self.min_rtt_us != u64::MAX {
                self.min_rtt_us = (self.min_rtt_us * 7 + lower_mean * 3) / 10;
            } else {
                self.min_rtt_us = lower_mean;
            }
            self.last_rtt_update_us = now_us;
        }
    }

    fn handle_startup(&mut self) {
        if self.filled_pipe || self.bw_samples.len() < STARTUP_FULL_BW_ROUNDS as usize {
            return;
        }
        let latest = self.bw_samples[self.bw_samples.len() - 1].bandwidth_bps;
        let prev_max = self.bw_samples[..self.bw_samples.len() - 1]
            .iter()
            .map(|s| s.bandwidth_bps)
            .fold(0.0f64, f64::max);
        if prev_max > 0.0 && latest < prev_max * 1.25 {
            self.flat_bw_rounds += 1;
        } else {
            self.flat_bw_rounds = 0;
        }
        if self.flat_bw_rounds >= STARTUP_FULL_BW_ROUNDS {
            self.filled_pipe = true;
            self.enter_drain();
        }
    }

    fn handle_drain(&mut self, bytes_in_flight: u64, now_us: u64) {
        if bytes_in_flight <= self.bdp_bytes() {
            self.enter_probe_bw(now_us);
        }
    }

    fn probe_rtt_due(&self, now_us: u64) -> bool {
        self.next_probe_rtt_time_us != 0 && now_us >= self.next_probe_rtt_time_us
    }

    fn handle_probe_bw(&mut self, now_us: u64) {
        if self.probe_rtt_due(now_us) {
            self.enter_probe_rtt(now_us);
            return;
        }
        let cycle_len_us = if self.min_rtt_us == u64::MAX {
            0
        } else {
            self.min_rtt_us * 2
        };
        if cycle_len_us > 0 && now_us.saturating_sub(self.cycle_start_us) > cycle_len_us {
            self.cycle_index = (self.cycle_index + 1) % PACING_GAIN_CYCLE.len();
            self.cycle_start_us = now_us;
            self.pacing_gain = PACING_GAIN_CYCLE[self.cycle_index];
        }
    }

    fn handle_probe_rtt(&mut self, bytes_in_flight: u64, now_us: u64) {
        let target = self.probe_rtt_cwnd();
        if !self.probe_rtt_round_done && bytes_in_flight <= target {
            // One full RTT round has to elapse at the reduced window.
            self.probe_rtt_round_done = true;
            let round = if self.min_rtt_us == u64::MAX {
                0
            } else {
                self.min_rtt_us
            };
            self.probe_rtt_round_done_time_us = now_us + round;
        }
        if self.probe_rtt_round_done
            && now_us > self.probe_rtt_done_time_us
            && now_us > self.probe_rtt_round_done_time_us
        {
            self.next_probe_rtt_time_us = now_us + self.params.probe_rtt_interval_ms * 1000;
            self.enter_probe_bw(now_us);
        }
    }

    fn pacing_rate_bps(&self) -> f64 {
        let floor = if self.min_rtt_us == 0 || self.min_rtt_us == u64::MAX {
            0.0
        } else {
            // Bits per second needed to keep min_pipe_cwnd in flight.
            self.params.min_pipe_cwnd as f64 * 8.0 * 1_000_000.0 / self.min_rtt_us as f64
        };
        (self.bottleneck_bw_bps * self.pacing_gain).max(floor)
    }

    fn congestion_window(&self) -> u64 {
        if self.mode == BbrMode::ProbeRtt {
            return self.probe_rtt_cwnd();
        }
        let cwnd = (self.bdp_bytes() as f64 * self.cwnd_gain) as u64;
        cwnd.max(self.params.min_pipe_cwnd)
    }

    fn snapshot(&self) -> BbrSnapshot {
        BbrSnapshot {
            mode: self.mode,
            bottleneck_bandwidth_bps: self.bottleneck_bw_bps,
            min_rtt_us: if self.min_rtt_us == u64::MAX {
                0
            } else {
                self.min_rtt_us
            },
            pacing_rate_bps: self.pacing_rate_bps(),
            congestion_window: self.congestion_window(),
            pacing_gain: self.pacing_gain,
            cwnd_gain: self.cwnd_gain,
            cycle_index: self.cycle_index,
            filled_pipe: self.filled_pipe,
        }
    }
}

/// Thread-safe BBRv2 controller. All public methods lock; derived
/// quantities are read as copy-out snapshots.
pub struct BbrV2Controller {
    state: Mutex<BbrState>,
}

impl Default for BbrV2Controller {
    fn default() -> Self {
        Self::new(BbrParams::default())
    }
}

impl BbrV2Controller {
    pub fn new(params: BbrParams) -> Self {
        Self {
            state: Mutex::new(BbrState::new(params)),
        }
    }

    /// Feeds one ACK-derived measurement into the model and advances
    /// the state machine.
    pub fn update(
        &self,
        rtt_us: u64,
        delivery_rate_bps: f64,
        bytes_in_flight: u64,
        _bytes_acked: u64,
        _bytes_lost: u64,
        now_us: u64,
    ) {
        let mut s = self.state.lock().unwrap();
        s.update_bandwidth_filter(delivery_rate_bps, now_us);
        s.update_rtt_filter(rtt_us, now_us);
        match s.mode {
            BbrMode::Startup => s.handle_startup(),
            BbrMode::Drain => s.handle_drain(bytes_in_flight, now_us),
            BbrMode::ProbeBw => s.handle_probe_bw(now_us),
            BbrMode::ProbeRtt => s.handle_probe_rtt(bytes_in_flight, now_us),
        }
    }

    pub fn pacing_rate_bps(&self) -> f64 {
        self.state.lock().unwrap().pacing_rate_bps()
    }

    pub fn congestion_window(&self) -> u64 {
        self.state.lock().unwrap().congestion_window()
    }

    pub fn mode(&self) -> BbrMode {
        self.state.lock().unwrap().mode
    }

    pub fn bottleneck_bandwidth_bps(&self) -> f64 {
        self.state.lock().unwrap().bottleneck_bw_bps
    }

    /// Minimum RTT estimate in microseconds; 0 until an ACK arrives.
    pub fn min_rtt_us(&self) -> u64 {
        let s = self.state.lock().unwrap();
        if s.min_rtt_us == u64::MAX {
            0
        } else {
            s.min_rtt_us
        }
    }

    pub fn cycle_index(&self) -> usize {
        self.state.lock().unwrap().cycle_index
    }

    /// True while PROBE_BW runs a gain above 1.0 against a filled pipe.
    pub fn is_probing_bandwidth(&self) -> bool {
        let s = self.state.lock().unwrap();
        s.mode == BbrMode::ProbeBw && s.pacing_gain > 1.0 && s.filled_pipe
    }

    pub fn snapshot(&self) -> BbrSnapshot {
        self.state.lock().unwrap().snapshot()
    }

    pub fn set_params(&self, params: BbrParams) {
        let mut s = self.state.lock().unwrap();
        s.params = params;
    }

    pub fn params(&self) -> BbrParams {
        self.state.lock().unwrap().params
    }

    /// Resets the model to STARTUP, keeping the configured params.
    pub fn reset(&self) {
        let mut s = self.state.lock().unwrap();
        let params = s.params;
        *s = BbrState::new(params);
        s.enter_startup();
    }
}
