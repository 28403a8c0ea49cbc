//! Frame envelopes for shaped bursts.
//!
//! Size and timing alone do not survive a DPI box that parses the
//! first bytes of a flow, so every burst is wrapped in a syntactically
//! valid record of the cover protocol: HTTP/3 frames, masked WebSocket
//! frames, media container structures or remote-desktop/VoIP records.
//! Sequence counters live on the writer, one per buffer, so concurrent
//! connections do not share visible state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

use super::BurstFrameType;

/// Current wall-clock millisecond counter; media timestamps derive
/// from it.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

const MPEG_TS_PACKET: usize = 188;

pub struct EnvelopeWriter {
    rng: StdRng,
    ts_continuity: u8,
    ts_pid: u16,
    fmp4_sequence: u32,
    rtp_sequence: u16,
    rtp_ssrc: u32,
    game_sequence: u16,
}

impl EnvelopeWriter {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let ts_pid = 0x1000 + rng.gen_range(0..0x0fff);
        let rtp_sequence = rng.gen();
        let rtp_ssrc = rng.gen();
        Self {
            rng,
            ts_continuity: 0,
            ts_pid,
            fmp4_sequence: 1,
            rtp_sequence,
            rtp_ssrc,
            game_sequence: 0,
        }
    }

    /// Wraps `payload` in the outer framing of `frame_type`.
    pub fn apply(&mut self, frame_type: BurstFrameType, payload: &[u8]) -> Vec<u8> {
        if payload.is_empty() {
            return Vec::new();
        }
        match frame_type {
            BurstFrameType::Http3Chunked => self.http3_chunked(payload),
            BurstFrameType::WebSocket => self.websocket(payload),
            BurstFrameType::MediaStreaming => self.media_streaming(payload),
            BurstFrameType::Interactive => self.interactive(payload),
            BurstFrameType::Randomized => {
                let pick = match self.rng.gen_range(0..4) {
                    0 => BurstFrameType::Http3Chunked,
                    1 => BurstFrameType::WebSocket,
                    2 => BurstFrameType::MediaStreaming,
                    _ => BurstFrameType::Interactive,
                };
                self.apply(pick, payload)
            }
        }
    }

    // --- HTTP/3 ---

    const H3_DATA: u8 = 0x00;
    const H3_HEADERS: u8 = 0x01;
    const H3_SETTINGS: u8 = 0x04;

    fn h3_frame_header(out: &mut Vec<u8>, frame_type: u8, len: usize) {
        // Variable-length prefix: the two top bits of the type byte
        // select a 1-, 2- or 3-byte big-endian length.
        if len < 64 {
            out.push(frame_type);
            out.push(len as u8);
        } else if len < 16_384 {
            out.push((1 << 6) | frame_type);
            out.push((len >> 8) as u8);
            out.push((len & 0xff) as u8);
        } else {
            out.push((2 << 6) | frame_type);
            out.push((len >> 16) as u8);
            out.push(((len >> 8) & 0xff) as u8);
            out.push((len & 0xff) as u8);
        }
    }

    fn http3_chunked(&mut self, payload: &[u8]) -> Vec<u8> {
        let multiple =
            payload.len() > 1400 || (payload.len() > 800 && self.rng.gen_range(0..3) == 0);
        let mut out = Vec::with_capacity(payload.len() + 64);

        if multiple {
            // A fresh exchange usually opens with HEADERS, sometimes a
            // SETTINGS frame.
            if self.rng.gen_range(0..10) < 8 {
                let len = 30 + self.rng.gen_range(0..70);
                Self::h3_frame_header(&mut out, Self::H3_HEADERS, len);
                for _ in 0..len {
                    out.push(self.rng.gen());
                }
            }
            if self.rng.gen_range(0..20) < 3 {
                let len = 10 + self.rng.gen_range(0..10);
                Self::h3_frame_header(&mut out, Self::H3_SETTINGS, len);
                for _ in 0..len {
                    out.push(self.rng.gen());
                }
            }
            let mut offset = 0;
            while offset < payload.len() {
                let chunk = (1200 + self.rng.gen_range(0..400)).min(payload.len() - offset);
                Self::h3_frame_header(&mut out, Self::H3_DATA, chunk);
                out.extend_from_slice(&payload[offset..offset + chunk]);
                offset += chunk;
            }
        } else {
            Self::h3_frame_header(&mut out, Self::H3_DATA, payload.len());
            out.extend_from_slice(payload);
        }
        out
    }

    // --- WebSocket (RFC 6455, client side) ---

    fn ws_frame(&mut self, out: &mut Vec<u8>, flags: u8, data: &[u8]) {
        out.push(flags);
        let mask_bit = 0x80u8; // clients always mask
        if data.len() < 126 {
            out.push(mask_bit | data.len() as u8);
        } else if data.len() < 65_536 {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(data.len() as u64).to_be_bytes());
        }
        let mask: [u8; 4] = self.rng.gen();
        out.extend_from_slice(&mask);
        for (i, b) in data.iter().enumerate() {
            out.push(b ^ mask[i % 4]);
        }
    }

    fn websocket(&mut self, payload: &[u8]) -> Vec<u8> {
        let fragment =
            payload.len() > 4000 || (payload.len() > 1000 && self.rng.gen_range(0..4) == 0);
        let mut out = Vec::with_capacity(payload.len() + 64);

        if fragment {
            let mut offset = 0;
            let mut first = true;
            while offset < payload.len() {
                let remaining = payload.len() - offset;
                let size = if remaining < 1000 {
                    remaining
                } else {
                    (1000 + self.rng.gen_range(0..3000)).min(remaining)
                };
                let last = offset + size == payload.len();
                let flags = if first {
                    0x02 // non-final binary
                } else if last {
                    0x80 // final continuation
                } else {
                    0x00
                };
                first = false;
                self.ws_frame(&mut out, flags, &payload[offset..offset + size]);
                offset += size;
            }
        } else {
            let opcode = if self.rng.gen_range(0..10) < 8 {
                0x02 // binary, by far the most common
            } else {
                0x01
            };
            self.ws_frame(&mut out, 0x80 | opcode, payload);
        }
        out
    }

    // --- Media streaming ---

    fn media_streaming(&mut self, payload: &[u8]) -> Vec<u8> {
        let pick = if payload.len() > 10_000 {
            self.rng.gen_range(0..2)
        } else if payload.len() < 1500 {
            2
        } else {
            self.rng.gen_range(0..4)
        };
        match pick {
            0 => self.hls_segment(payload),
            1 => self.dash_fragment(payload),
            2 => self.rtp_packet(payload, false),
            _ => self.flv_tag(payload),
        }
    }

    /// MPEG-TS segment: 188-byte packets, sync byte 0x47, shared PID,
    /// continuity counter, PES header with a 90 kHz PTS up front.
    fn hls_segment(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + payload.len() / 180 * 8 + MPEG_TS_PACKET);
        let mut offset = 0;
        let mut first = true;

        while offset < payload.len() || first {
            let mut packet = Vec::with_capacity(MPEG_TS_PACKET);
            packet.push(0x47);
            let pusi = if first { 0x40 } else { 0x00 };
            packet.push(pusi | ((self.ts_pid >> 8) as u8 & 0x1f));
            packet.push((self.ts_pid & 0xff) as u8);

            // A quarter of the lead packets carry an adaptation field,
            // as encoders do for PCR placement.
            let adaptation = first && self.rng.gen_range(0..4) == 0;
            let adaptation_ctrl = if adaptation { 0x30 } else { 0x10 };
            packet.push(adaptation_ctrl | (self.ts_continuity & 0x0f));
            self.ts_continuity = (self.ts_continuity + 1) % 16;

            if adaptation {
                let length = self.rng.gen_range(1..=16u8);
                packet.push(length);
                let mut flags = 0u8;
                if self.rng.gen_range(0..2) == 0 {
                    flags |= 0x10; // PCR
                }
                if self.rng.gen_range(0..5) == 0 {
                    flags |= 0x08; // OPCR
                }
                packet.push(flags);
                for _ in 1..length {
                    packet.push(self.rng.gen());
                }
            }

            if first {
                // PES header: start code, video/audio stream id, length,
                // flags, PTS (half the time a DTS trails it).
                packet.extend_from_slice(&[0x00, 0x00, 0x01]);
                let stream_id = if self.rng.gen_range(0..3) == 0 { 0xc0 } else { 0xe0 };
                packet.push(stream_id);
                let pes_len = payload.len().min(0xffff) as u16;
                packet.extend_from_slice(&pes_len.to_be_bytes());
                packet.push(0x80);
                let with_dts = self.rng.gen_range(0..2) == 0;
                packet.push(if with_dts { 0xc0 } else { 0x80 });
                packet.push(if with_dts { 10 } else { 5 });
                let pts = (now_millis() & 0x1_ffff_ffff) * 90;
                let marker = if with_dts { 0x30 } else { 0x20 };
                packet.push(marker | ((pts >> 29) as u8 & 0x0e) | 0x01);
                packet.push((pts >> 22) as u8);
                packet.push(((pts >> 14) as u8 & 0xfe) | 0x01);
                packet.push((pts >> 7) as u8);
                packet.push(((pts << 1) as u8 & 0xfe) | 0x01);
                if with_dts {
                    let dts = pts.saturating_sub(self.rng.gen_range(0..1000) * 90);
                    packet.push(0x10 | ((dts >> 29) as u8 & 0x0e) | 0x01);
                    packet.push((dts >> 22) as u8);
                    packet.push(((dts >> 14) as u8 & 0xfe) | 0x01);
                    packet.push((dts >> 7) as u8);
                    packet.push(((dts << 1) as u8 & 0xfe) | 0x01);
                }
                first = false;
            }

            let room = MPEG_TS_PACKET - packet.len();
            let take = room.min(payload.len() - offset);
            packet.extend_from_slice(&payload[offset..offset + take]);
            offset += take;
            packet.resize(MPEG_TS_PACKET, 0xff); // stuffing
            out.extend_from_slice(&packet);
        }
        out
    }

    /// fMP4 fragment: moof(mfhd, traf(tfhd)) + mdat with a monotone
    /// fragment sequence number.
    fn dash_fragment(&mut self, payload: &[u8]) -> Vec<u8> {
        fn push_box_header(out: &mut Vec<u8>, size: u32, kind: &[u8; 4]) {
            out.extend_from_slice(&size.to_be_bytes());
            out.extend_from_slice(kind);
        }

        let mfhd_size = 16u32;
        let tfhd_size = 16u32;
        let traf_size = 8 + tfhd_size;
        let moof_size = 8 + mfhd_size + traf_size;
        let mdat_size = 8 + payload.len() as u32;

        let mut out = Vec::with_capacity(payload.len() + moof_size as usize + 8);
        push_box_header(&mut out, moof_size, b"moof");

        push_box_header(&mut out, mfhd_size, b"mfhd");
        out.extend_from_slice(&[0, 0, 0, 0]); // version + flags
        out.extend_from_slice(&self.fmp4_sequence.to_be_bytes());
        self.fmp4_sequence = self.fmp4_sequence.wrapping_add(1);

        push_box_header(&mut out, traf_size, b"traf");
        push_box_header(&mut out, tfhd_size, b"tfhd");
        out.extend_from_slice(&[0, 0, 0, 0x20]); // default-base-is-moof
        out.extend_from_slice(&1u32.to_be_bytes()); // track id

        push_box_header(&mut out, mdat_size, b"mdat");
        out.extend_from_slice(payload);
        out
    }

    /// RTP v2 packet with incrementing sequence number, 90 kHz
    /// timestamp and the writer's SSRC. `audio` forces an Opus-style
    /// payload type.
    fn rtp_packet(&mut self, payload: &[u8], audio: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 13);
        let mut first = 0x80u8;
        if self.rng.gen_range(0..10) == 0 {
            first |= 0x20; // marker, e.g. keyframe boundary
        }
        out.push(first);
        let payload_type = if audio {
            111 // Opus
        } else {
            match self.rng.gen_range(0..5) {
                0 => 96,  // VP8
                1 => 97,  // H264
                2 => 98,  // VP9
                3 => 111, // Opus
                _ => 110, // AAC
            }
        };
        out.push(payload_type);
        out.extend_from_slice(&self.rtp_sequence.to_be_bytes());
        self.rtp_sequence = self.rtp_sequence.wrapping_add(1);
        let timestamp = (now_millis() as u32).wrapping_mul(90);
        out.extend_from_slice(&timestamp.to_be_bytes());
        out.extend_from_slice(&self.rtp_ssrc.to_be_bytes());
        match payload_type {
            96 | 98 => out.push(0x10), // VP8/VP9 descriptor: start of partition
            97 => out.push(if self.rng.gen_range(0..10) == 0 { 0x05 } else { 0x01 }),
            _ => {}
        }
        out.extend_from_slice(payload);
        out
    }

    /// FLV tag (video or audio) with the previous-tag-size trailer.
    fn flv_tag(&mut self, payload: &[u8]) -> Vec<u8> {
        let is_video = self.rng.gen_range(0..4) != 0;
        let body_len = payload.len() as u32 + if is_video { 5 } else { 2 };
        let mut out = Vec::with_capacity(payload.len() + 20);

        out.push(if is_video { 0x09 } else { 0x08 });
        out.extend_from_slice(&body_len.to_be_bytes()[1..]); // 24-bit size
        let ts = now_millis();
        out.push((ts >> 16) as u8);
        out.push((ts >> 8) as u8);
        out.push(ts as u8);
        out.push((ts >> 24) as u8); // extended timestamp
        out.extend_from_slice(&[0, 0, 0]); // stream id

        if is_video {
            let frame_type = if self.rng.gen_range(0..10) == 0 { 0x10 } else { 0x20 };
            out.push(frame_type | 0x07); // AVC
            out.push(0x01); // NALU
            let composition: i32 = self.rng.gen_range(-1000..1000);
            out.extend_from_slice(&composition.to_be_bytes()[1..]);
        } else {
            out.push(0xaf); // AAC, 44 kHz, 16-bit stereo
            out.push(0x01); // raw
        }
        out.extend_from_slice(payload);

        let prev_tag_size = body_len + 11;
        out.extend_from_slice(&prev_tag_size.to_be_bytes());
        out
    }

    // --- Interactive ---

    fn interactive(&mut self, payload: &[u8]) -> Vec<u8> {
        let pick = if payload.len() < 100 {
            // Input events and keepalives
            2 + self.rng.gen_range(0..2)
        } else if payload.len() > 4000 {
            // Screen updates
            self.rng.gen_range(0..2)
        } else {
            self.rng.gen_range(0..4)
        };
        match pick {
            0 => self.rdp_tpkt(payload),
            1 => self.vnc_update(payload),
            2 => self.game_packet(payload),
            _ => self.rtp_packet(payload, true),
        }
    }

    /// RDP transport: TPKT header (RFC 1006) plus an X.224 data TPDU.
    fn rdp_tpkt(&mut self, payload: &[u8]) -> Vec<u8> {
        let total = (payload.len() + 7).min(0xffff) as u16;
        let mut out = Vec::with_capacity(payload.len() + 7);
        out.push(0x03);
        out.push(0x00);
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&[0x02, 0xf0, 0x80]);
        out.extend_from_slice(payload);
        out
    }

    /// VNC RFB framebuffer update with a single raw-encoded rectangle.
    fn vnc_update(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 16);
        out.push(0x00); // FramebufferUpdate
        out.push(0x00); // padding
        out.extend_from_slice(&1u16.to_be_bytes()); // one rectangle
        let w: u16 = 64 + self.rng.gen_range(0..960);
        let h: u16 = 16 + self.rng.gen_range(0..240);
        out.extend_from_slice(&self.rng.gen_range(0..1024u16).to_be_bytes());
        out.extend_from_slice(&self.rng.gen_range(0..768u16).to_be_bytes());
        out.extend_from_slice(&w.to_be_bytes());
        out.extend_from_slice(&h.to_be_bytes());
        out.extend_from_slice(&0i32.to_be_bytes()); // raw encoding
        out.extend_from_slice(payload);
        out
    }

    /// Compact game-style datagram header: magic, channel, sequence,
    /// length.
    fn game_packet(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 6);
        out.push(0xa7);
        out.push(self.rng.gen_range(0..4)); // channel
        out.extend_from_slice(&self.game_sequence.to_be_bytes());
        self.game_sequence = self.game_sequence.wrapping_add(1);
        out.extend_from_slice(&(payload.len().min(0xffff) as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }
}

impl Default for EnvelopeWriter {
    fn default() -> Self {
        Self::new()
    }
}
