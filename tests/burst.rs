use quicsand::burst::envelope::EnvelopeWriter;
use quicsand::burst::{shaping, BurstBuffer, BurstConfig, BurstFrameType, BurstMetrics};
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

// --- envelope parsers used by the assertions ---

/// Walks the HTTP/3-style framing: type byte with a 2-bit length
/// class, then a 1/2/3-byte big-endian length.
fn parse_h3_frames(buf: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        let class = buf[i] >> 6;
        let frame_type = buf[i] & 0x3f;
        let (len, header) = match class {
            0 => (buf[i + 1] as usize, 2),
            1 => (((buf[i + 1] as usize) << 8) | buf[i + 2] as usize, 3),
            2 => (
                ((buf[i + 1] as usize) << 16)
                    | ((buf[i + 2] as usize) << 8)
                    | buf[i + 3] as usize,
                4,
            ),
            _ => panic!("unknown length class at offset {}", i),
        };
        assert!(i + header + len <= buf.len(), "frame overruns the burst");
        frames.push((frame_type, buf[i + header..i + header + len].to_vec()));
        i += header + len;
    }
    frames
}

/// Walks RFC 6455 frames, checks the mask bit and unmasks payloads.
fn parse_ws_frames(buf: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        let flags = buf[i];
        let masked = buf[i + 1] & 0x80 != 0;
        assert!(masked, "client frames must be masked");
        let mut len = (buf[i + 1] & 0x7f) as usize;
        let mut j = i + 2;
        if len == 126 {
            len = ((buf[j] as usize) << 8) | buf[j + 1] as usize;
            j += 2;
        } else if len == 127 {
            len = 0;
            for k in 0..8 {
                len = (len << 8) | buf[j + k] as usize;
            }
            j += 8;
        }
        let mask = [buf[j], buf[j + 1], buf[j + 2], buf[j + 3]];
        j += 4;
        assert!(j + len <= buf.len(), "length field exceeds the burst");
        let payload: Vec<u8> = buf[j..j + len]
            .iter()
            .enumerate()
            .map(|(k, b)| b ^ mask[k % 4])
            .collect();
        frames.push((flags, payload));
        i = j + len;
    }
    frames
}

fn payload_of(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 251) as u8).collect()
}

// --- envelope shape ---

#[test]
fn http3_small_burst_is_one_data_frame() {
    let mut writer = EnvelopeWriter::with_seed(7);
    let payload = payload_of(900);
    let framed = writer.apply(BurstFrameType::Http3Chunked, &payload);
    let frames = parse_h3_frames(&framed);
    let data: Vec<u8> = frames
        .iter()
        .filter(|(t, _)| *t == 0x00)
        .flat_map(|(_, p)| p.clone())
        .collect();
    assert_eq!(data, payload, "DATA frames must carry the payload intact");
}

#[test]
fn http3_large_burst_chunks_decode_to_payload() {
    let mut writer = EnvelopeWriter::with_seed(11);
    let payload = payload_of(5_000);
    let framed = writer.apply(BurstFrameType::Http3Chunked, &payload);
    let frames = parse_h3_frames(&framed);
    assert!(frames.len() > 1, "large bursts use multiple frames");
    let data: Vec<u8> = frames
        .iter()
        .filter(|(t, _)| *t == 0x00)
        .flat_map(|(_, p)| p.clone())
        .collect();
    assert_eq!(data, payload);
}

#[test]
fn websocket_single_frame_roundtrip() {
    let mut writer = EnvelopeWriter::with_seed(3);
    let payload = payload_of(600);
    let framed = writer.apply(BurstFrameType::WebSocket, &payload);
    let frames = parse_ws_frames(&framed);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0 & 0x80, 0x80, "single frame carries FIN");
    assert_eq!(frames[0].1, payload);
}

#[test]
fn websocket_fragments_large_messages() {
    let mut writer = EnvelopeWriter::with_seed(5);
    let payload = payload_of(9_000);
    let framed = writer.apply(BurstFrameType::WebSocket, &payload);
    let frames = parse_ws_frames(&framed);
    assert!(frames.len() > 1, "messages above 4000 bytes fragment");
    assert_eq!(frames[0].0 & 0x0f, 0x02, "first fragment is binary");
    assert_eq!(frames[0].0 & 0x80, 0, "first fragment is non-final");
    let last = frames.last().unwrap();
    assert_eq!(last.0 & 0x80, 0x80, "last fragment is final");
    let data: Vec<u8> = frames.into_iter().flat_map(|(_, p)| p).collect();
    assert_eq!(data, payload);
}

#[test]
fn media_small_payload_is_rtp() {
    let mut writer = EnvelopeWriter::with_seed(13);
    let a = writer.apply(BurstFrameType::MediaStreaming, &payload_of(800));
    let b = writer.apply(BurstFrameType::MediaStreaming, &payload_of(800));
    assert_eq!(a[0] >> 6, 2, "RTP version 2");
    assert_eq!(b[0] >> 6, 2);
    let seq_a = u16::from_be_bytes([a[2], a[3]]);
    let seq_b = u16::from_be_bytes([b[2], b[3]]);
    assert_eq!(seq_b, seq_a.wrapping_add(1), "sequence numbers increment");
    // SSRC stays stable for the stream.
    assert_eq!(&a[8..12], &b[8..12]);
}

#[test]
fn media_large_payload_is_ts_or_fmp4() {
    let mut writer = EnvelopeWriter::with_seed(17);
    let framed = writer.apply(BurstFrameType::MediaStreaming, &payload_of(20_000));
    let mpeg_ts = framed[0] == 0x47 && framed.len() % 188 == 0;
    let fmp4 = &framed[4..8] == b"moof";
    assert!(mpeg_ts || fmp4, "large media bursts look like HLS or DASH");
    if mpeg_ts {
        for packet in framed.chunks(188) {
            assert_eq!(packet[0], 0x47, "every TS packet leads with sync");
        }
    } else {
        // Box walk: sizes must tile the fragment exactly.
        let mut i = 0;
        while i < framed.len() {
            let size = u32::from_be_bytes([
                framed[i],
                framed[i + 1],
                framed[i + 2],
                framed[i + 3],
            ]) as usize;
            assert!(size >= 8 && i + size <= framed.len());
            i += size;
        }
    }
}

#[test]
fn interactive_small_payload_looks_like_input_traffic() {
    let mut writer = EnvelopeWriter::with_seed(19);
    let framed = writer.apply(BurstFrameType::Interactive, &payload_of(40));
    let game = framed[0] == 0xa7;
    let rtp_audio = framed[0] & 0xc0 == 0x80 && framed[1] == 111;
    assert!(game || rtp_audio, "small interactive bursts are game or VoIP");
}

#[test]
fn interactive_large_payload_looks_like_screen_update() {
    let mut writer = EnvelopeWriter::with_seed(23);
    let payload = payload_of(6_000);
    let framed = writer.apply(BurstFrameType::Interactive, &payload);
    if framed[0] == 0x03 {
        // TPKT: version 3, reserved 0, 16-bit length capped.
        assert_eq!(framed[1], 0x00);
        let len = u16::from_be_bytes([framed[2], framed[3]]) as usize;
        assert_eq!(len, (payload.len() + 7).min(0xffff));
    } else {
        assert_eq!(framed[0], 0x00, "otherwise an RFB framebuffer update");
        assert_eq!(u16::from_be_bytes([framed[2], framed[3]]), 1);
    }
}

#[test]
fn randomized_frame_type_produces_nonempty_envelope() {
    let mut writer = EnvelopeWriter::with_seed(29);
    for _ in 0..16 {
        let framed = writer.apply(BurstFrameType::Randomized, &payload_of(500));
        assert!(framed.len() > 500, "an envelope always adds framing");
    }
}

// --- shaping bounds ---

#[test]
fn interval_always_within_configured_bounds() {
    let config = BurstConfig::default();
    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    let conditions = [
        (0.0, 0.0, 0.0),
        (500.0, 0.2, 100_000.0),
        (5.0, 0.0, 100_000_000.0),
        (1_000.0, 0.5, 10_000.0),
    ];
    for (latency, loss, bw) in conditions {
        let metrics = BurstMetrics {
            observed_latency_ms: latency,
            packet_loss_rate: loss,
            bandwidth_estimate_bps: bw,
            ..Default::default()
        };
        for buffered in [0usize, 400_000, 1_000_000] {
            let factor = shaping::interval_factor(&config, &metrics, buffered, 1.0);
            let interval = shaping::burst_interval_ms(&config, factor, &mut rng);
            assert!(
                (config.min_interval_ms..=config.max_interval_ms).contains(&interval),
                "interval {} out of bounds for ({}, {}, {})",
                interval,
                latency,
                loss,
                bw
            );
        }
    }
}

#[test]
fn burst_size_always_within_configured_bounds() {
    let config = BurstConfig::default();
    let conditions = [
        (0.0, 0.0, 0.0),
        (400.0, 0.3, 50_000.0),
        (10.0, 0.0, 1_000_000_000.0),
    ];
    for (latency, loss, bw) in conditions {
        let metrics = BurstMetrics {
            observed_latency_ms: latency,
            packet_loss_rate: loss,
            bandwidth_estimate_bps: bw,
            ..Default::default()
        };
        let size = shaping::optimal_burst_size(&config, &metrics, 100);
        assert!(
            (config.min_size..=config.max_size).contains(&size),
            "size {} out of bounds for ({}, {}, {})",
            size,
            latency,
            loss,
            bw
        );
    }
}

#[test]
fn adaptation_respects_floors_and_caps() {
    let mut config = BurstConfig::default();
    let mut metrics = BurstMetrics {
        observed_latency_ms: 10_000.0,
        packet_loss_rate: 0.5,
        ..Default::default()
    };
    for _ in 0..100 {
        shaping::adapt_to_network_conditions(&mut config, &mut metrics);
    }
    assert!(config.min_interval_ms >= 10);
    assert!(config.max_interval_ms >= 50);
    assert!(config.optimal_size >= config.min_size);
    assert!((0.0..=1.0).contains(&metrics.adaptation_score));
}

// --- buffer behavior ---

fn capture_handler(buffer: &BurstBuffer) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    buffer.set_data_handler(move |burst| {
        sink.lock().unwrap().push(burst);
    });
    captured
}

#[test]
fn flush_preserves_fifo_order() {
    let config = BurstConfig {
        frame_type: BurstFrameType::WebSocket,
        ..Default::default()
    };
    let buffer = BurstBuffer::with_seed(config, 41);
    let captured = capture_handler(&buffer);

    assert!(buffer.add_data(b"the quick "));
    assert!(buffer.add_data(b"brown fox "));
    assert!(buffer.add_data(b"jumps over"));
    buffer.flush();

    let bursts = captured.lock().unwrap();
    let mut recovered = Vec::new();
    for burst in bursts.iter() {
        for (_, payload) in parse_ws_frames(burst) {
            recovered.extend_from_slice(&payload);
        }
    }
    assert_eq!(recovered, b"the quick brown fox jumps over");
}

#[test]
fn oversized_input_splits_into_bounded_bursts() {
    let config = BurstConfig {
        frame_type: BurstFrameType::WebSocket,
        max_size: 1_000,
        optimal_size: 800,
        min_size: 100,
        ..Default::default()
    };
    let buffer = BurstBuffer::with_seed(config, 43);
    let captured = capture_handler(&buffer);

    let payload = payload_of(2_500);
    assert!(buffer.add_data(&payload));
    buffer.flush();

    let bursts = captured.lock().unwrap();
    assert!(bursts.len() >= 3, "2500 bytes at 1000 max needs 3 bursts");
    let mut recovered = Vec::new();
    for burst in bursts.iter() {
        let payload_len: usize = parse_ws_frames(burst)
            .into_iter()
            .map(|(_, p)| {
                recovered.extend_from_slice(&p);
                p.len()
            })
            .sum();
        assert!(payload_len <= 1_000, "burst payload exceeds max_size");
    }
    assert_eq!(recovered, payload);
}

#[test]
fn add_data_rejects_past_buffer_bound() {
    let config = BurstConfig {
        max_buffer_bytes: 1_000,
        ..Default::default()
    };
    let buffer = BurstBuffer::with_seed(config, 47);
    assert!(buffer.add_data(&payload_of(900)));
    assert!(!buffer.add_data(&payload_of(200)), "bound must be enforced");
    assert_eq!(buffer.buffered_bytes(), 900);
}

#[test]
fn metrics_track_bursts_and_watermark() {
    let config = BurstConfig {
        frame_type: BurstFrameType::Http3Chunked,
        ..Default::default()
    };
    let buffer = BurstBuffer::with_seed(config, 53);
    let _captured = capture_handler(&buffer);
    buffer.add_data(&payload_of(2_000));
    buffer.flush();
    let metrics = buffer.metrics();
    assert!(metrics.total_bursts >= 1);
    assert_eq!(metrics.total_bytes, 2_000);
    assert_eq!(metrics.buffer_high_watermark, 2_000);
}

#[tokio::test]
async fn timer_task_emits_and_stops_cleanly() {
    let config = BurstConfig {
        min_interval_ms: 10,
        max_interval_ms: 20,
        frame_type: BurstFrameType::WebSocket,
        mimic_realistic_patterns: false,
        adaptive_timing: false,
        ..Default::default()
    };
    let mut buffer = BurstBuffer::with_seed(config, 59);
    let captured = capture_handler(&buffer);

    assert!(buffer.start());
    assert!(!buffer.start(), "second start is a no-op");
    buffer.add_data(&payload_of(1_000));
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    buffer.stop().await;

    let bursts = captured.lock().unwrap().len();
    assert!(bursts >= 1, "timer task should have emitted at least once");
    assert!(!buffer.is_running());
}

#[test]
fn start_without_handler_refuses() {
    // No tokio runtime needed: the refusal happens before spawn.
    let mut buffer = BurstBuffer::with_seed(BurstConfig::default(), 61);
    assert!(!buffer.start());
}
