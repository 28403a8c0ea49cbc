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

//! # FEC Shim
//!
//! Optional redundancy layer over the datagram path. The codec itself
//! is a black box behind [`FecCodec`]; the shim's job is the adaptive
//! part: deriving the redundancy rate from observed loss and feeding
//! payloads through whatever codec is installed. A windowed XOR parity
//! codec is provided as the stock implementation.

use log::debug;
use std::collections::HashMap;

/// Redundancy rate bounds: below 0.1 the repair packets are too sparse
/// to matter, above 0.5 the overhead exceeds the goodput.
pub const MIN_REDUNDANCY: f64 = 0.1;
pub const MAX_REDUNDANCY: f64 = 0.5;

/// The rate is recomputed after this many sent packets.
const RATE_UPDATE_INTERVAL: u64 = 50;

/// Groups tracked on the receive side before the oldest is dropped.
const MAX_TRACKED_GROUPS: usize = 64;

const PACKET_DATA: u8 = 0;
const PACKET_REPAIR: u8 = 1;

/// Black-box encode/decode pair over opaque datagram payloads.
pub trait FecCodec: Send {
    /// Wraps one outbound payload; may return additional repair
    /// packets alongside it.
    fn encode(&mut self, payload: &[u8]) -> Vec<Vec<u8>>;

    /// Feeds one received packet in; returns any payloads now
    /// deliverable (the packet's own, plus recovered ones).
    fn add_received_packet(&mut self, packet: &[u8]) -> Vec<Vec<u8>>;

    /// Data packets per repair packet.
    fn set_window(&mut self, window: usize);
}

struct RecvGroup {
    window: usize,
    data: HashMap<u8, Vec<u8>>,
    repair: Option<Vec<u8>>,
    recovered: bool,
}

/// Windowed XOR parity: every `window` data packets emit one repair
/// packet carrying their XOR, enough to rebuild any single loss per
/// group.
pub struct XorFec {
    window: usize,
    group: u32,
    index: u8,
    pending: Vec<Vec<u8>>,
    groups: HashMap<u32, RecvGroup>,
    order: Vec<u32>,
}

impl XorFec {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            group: 0,
            index: 0,
            pending: Vec::new(),
            groups: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Length-prefixed payload image, the unit the XOR runs over.
    fn image(payload: &[u8]) -> Vec<u8> {
        let mut img = Vec::with_capacity(payload.len() + 2);
        img.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        img.extend_from_slice(payload);
        img
    }

    fn payload_from_image(image: &[u8]) -> Option<Vec<u8>> {
        if image.len() < 2 {
            return None;
        }
        let len = u16::from_be_bytes([image[0], image[1]]) as usize;
        if image.len() < 2 + len {
            return None;
        }
        Some(image[2..2 + len].to_vec())
    }

    fn header(kind: u8, group: u32, index: u8, window: u8) -> Vec<u8> {
        let mut h = Vec::with_capacity(7);
        h.push(kind);
        h.extend_from_slice(&group.to_be_bytes());
        h.push(index);
        h.push(window);
        h
    }

    fn track(&mut self, group: u32) -> &mut RecvGroup {
        if !self.groups.contains_key(&group) {
            self.groups.insert(
                group,
                RecvGroup {
                    window: self.window,
                    data: HashMap::new(),
                    repair: None,
                    recovered: false,
                },
            );
            self.order.push(group);
            while self.order.len() > MAX_TRACKED_GROUPS {
                let oldest = self.order.remove(0);
                self.groups.remove(&oldest);
            }
        }
        self.groups.get_mut(&group).unwrap()
    }

    /// One data image is missing and the repair is here: XOR the rest
    /// back out of it.
    fn try_recover(group: &mut RecvGroup) -> Option<Vec<u8>> {
        if group.recovered {
            return None;
        }
        let repair = group.repair.as_ref()?;
        if group.data.len() + 1 != group.window {
            return None;
        }
        let mut image = repair.clone();
        for img in group.data.values() {
            for (i, b) in img.iter().enumerate() {
                if i < image.len() {
                    image[i] ^= b;
                } else {
                    break;
                }
            }
        }
        group.recovered = true;
        crate::telemetry!(crate::telemetry::FEC_RECOVERED.inc());
        Self::payload_from_image(&image)
    }
}

impl FecCodec for XorFec {
    fn encode(&mut self, payload: &[u8]) -> Vec<Vec<u8>> {
        let image = Self::image(payload);
        let mut packet = Self::header(PACKET_DATA, self.group, self.index, self.window as u8);
        packet.extend_from_slice(&image);
        self.pending.push(image);
        self.index += 1;

        let mut out = vec![packet];
        if self.pending.len() >= self.window {
            let max_len = self.pending.iter().map(|p| p.len()).max().unwrap_or(0);
            let mut parity = vec![0u8; max_len];
            for img in &self.pending {
                for (i, b) in img.iter().enumerate() {
                    parity[i] ^= b;
                }
            }
            let mut repair =
                Self::header(PACKET_REPAIR, self.group, self.index, self.window as u8);
            repair.extend_from_slice(&parity);
            out.push(repair);
            self.pending.clear();
            self.group = self.group.wrapping_add(1);
            self.index = 0;
        }
        out
    }

    fn add_received_packet(&mut self, packet: &[u8]) -> Vec<Vec<u8>> {
        if packet.len() < 7 {
            return Vec::new();
        }
        let kind = packet[0];
        let group_id = u32::from_be_bytes([packet[1], packet[2], packet[3], packet[4]]);
        let index = packet[5];
        let window = packet[6].max(2) as usize;
        let body = &packet[7..];

        let group = self.track(group_id);
        group.window = window;

        let mut delivered = Vec::new();
        match kind {
            PACKET_DATA => {
                if let Some(payload) = Self::payload_from_image(body) {
                    if group.data.insert(index, body.to_vec()).is_none() {
                        delivered.push(payload);
                    }
                }
            }
            PACKET_REPAIR => {
                group.repair = Some(body.to_vec());
            }
            _ => return Vec::new(),
        }
        if let Some(recovered) = Self::try_recover(group) {
            debug!("FEC recovered a payload in group {}", group_id);
            delivered.push(recovered);
        }
        delivered
    }

    fn set_window(&mut self, window: usize) {
        self.window = window.max(2);
    }
}

/// Adaptive redundancy wrapper: owns the codec, tracks observed loss
/// and re-derives the redundancy rate every 50 packets as
/// `clamp(1.5 * loss, 0.1, 0.5)`.
pub struct AdaptiveFec {
    codec: Box<dyn FecCodec>,
    redundancy: f64,
    packets_since_update: u64,
    lost: u64,
    sent: u64,
}

impl AdaptiveFec {
    pub fn new(codec: Box<dyn FecCodec>, initial_rate: f64) -> Self {
        let mut shim = Self {
            codec,
            redundancy: 0.0,
            packets_since_update: 0,
            lost: 0,
            sent: 0,
        };
        shim.set_redundancy_rate(initial_rate);
        shim
    }

    pub fn with_default_codec() -> Self {
        Self::new(Box::new(XorFec::new(5)), 0.2)
    }

    pub fn on_send(&mut self, payload: &[u8]) -> Vec<Vec<u8>> {
        self.packets_since_update += 1;
        if self.packets_since_update >= RATE_UPDATE_INTERVAL {
            let loss = self.observed_loss();
            self.update_redundancy_rate(loss);
        }
        self.codec.encode(payload)
    }

    pub fn on_receive(&mut self, packet: &[u8]) -> Vec<Vec<u8>> {
        self.codec.add_received_packet(packet)
    }

    /// Loss feedback from the transport's ACK accounting.
    pub fn report_loss(&mut self, lost: u64, sent: u64) {
        self.lost = lost;
        self.sent = sent;
    }

    pub fn observed_loss(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }

    /// Applies `rate = clamp(1.5 * loss, 0.1, 0.5)` and resizes the
    /// codec window accordingly.
    pub fn update_redundancy_rate(&mut self, observed_loss: f64) {
        self.packets_since_update = 0;
        self.set_redundancy_rate(1.5 * observed_loss);
    }

    pub fn set_redundancy_rate(&mut self, rate: f64) {
        let clamped = rate.clamp(MIN_REDUNDANCY, MAX_REDUNDANCY);
        if (clamped - self.redundancy).abs() > f64::EPSILON {
            debug!("FEC redundancy rate set to {:.2}", clamped);
        }
        self.redundancy = clamped;
        // One repair packet per window: window = 1/rate data packets.
        let window = (1.0 / clamped).round() as usize;
        self.codec.set_window(window.clamp(2, 10));
    }

    pub fn redundancy_rate(&self) -> f64 {
        self.redundancy
    }
}
