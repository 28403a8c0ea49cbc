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

//! # Connection Engine
//!
//! Owns the QUIC connection handle, the UDP socket and the drive loop,
//! and wires the uTLS configurator, the BBRv2 model, the burst shaper
//! and the FEC shim together. The wire-library handle is only touched
//! under the core lock from the drive task and stream handles; the
//! socket is swapped only by the migration path.

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::bbr::{BbrMode, BbrParams, BbrV2Controller};
use super::migration::{
    self, MigrationEvent, MigrationState, PATH_CHALLENGE_FRAME,
};
use super::stream::{ConnCore, StreamDirection, StreamHandle, StreamState};
use super::zero_rtt::{ZeroRttConfig, ZERO_RTT};
use crate::burst::{BurstBuffer, BurstConfig};
use crate::error::ConnectionError;
use crate::fec::AdaptiveFec;
use crate::stealth::{BrowserFingerprint, UtlsConfigurator};
use crate::telemetry;

/// ASCII marker leading every source connection id this client mints.
const SCID_PREFIX: &[u8; 8] = b"QuicSand";

const MAX_DATAGRAM_BUF: usize = 65_535;

/// How long a probed path may stay unvalidated before rollback.
const MIGRATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub fingerprint: BrowserFingerprint,
    pub use_utls: bool,
    pub verify_peer: bool,
    pub ca_file: Option<PathBuf>,
    pub debug_tls: bool,
    pub use_session_tickets: bool,
    pub connect_timeout: Duration,
    pub zero_rtt: ZeroRttConfig,
    /// Burst shaping for the datagram path; `None` sends unshaped.
    pub burst: Option<BurstConfig>,
    pub enable_fec: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fingerprint: BrowserFingerprint::ChromeLatest,
            use_utls: true,
            verify_peer: false,
            ca_file: None,
            debug_tls: false,
            use_session_tickets: true,
            connect_timeout: Duration::from_secs(15),
            zero_rtt: ZeroRttConfig::default(),
            burst: None,
            enable_fec: false,
        }
    }
}

/// Coarse per-connection statistics, copy-out.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub rtt_ms: f64,
    pub loss_rate: f64,
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub pacing_rate_bps: f64,
    pub congestion_window: u64,
    pub migrations: u64,
    pub zero_rtt_attempted: bool,
    pub zero_rtt_accepted: bool,
}

struct PendingMigration {
    old_interface: Option<String>,
    new_interface: String,
    challenge: [u8; 8],
    deadline: Instant,
}

pub struct QuicConnection {
    config: ClientConfig,
    configurator: Option<UtlsConfigurator>,
    core: Option<Arc<Mutex<ConnCore>>>,

    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    remote_endpoint: Option<SocketAddr>,
    sni: String,

    // Migration cell: the socket is only replaced here, with the old
    // path pushed for rollback.
    migration: MigrationState,
    current_interface: Option<String>,
    previous_paths: Vec<(Arc<UdpSocket>, SocketAddr, Option<String>)>,
    pending_migration: Option<PendingMigration>,
    migration_listeners: Vec<mpsc::UnboundedSender<MigrationEvent>>,

    bbr: Arc<BbrV2Controller>,
    bbr_enabled: bool,

    burst: Option<BurstBuffer>,
    burst_out: Arc<Mutex<VecDeque<Vec<u8>>>>,
    stream_shapers: HashMap<u64, BurstBuffer>,

    fec: Option<AdaptiveFec>,
    fec_enabled: bool,

    dgram_in: VecDeque<Vec<u8>>,

    epoch: Instant,
    migrations: u64,
    established: bool,
    zero_rtt_attempted: bool,
    early_data_seen: bool,
    inflight_estimate: u64,
    prev_lost: u64,
    prev_acked_bytes: u64,
    rng: StdRng,
}

impl QuicConnection {
    /// Binds an ephemeral UDP socket and prepares the wire
    /// configuration. Must run inside the async runtime.
    pub fn new(
        config: ClientConfig,
        fingerprint: Option<BrowserFingerprint>,
    ) -> Result<Self, ConnectionError> {
        let mut config = config;
        if let Some(fp) = fingerprint {
            config.fingerprint = fp;
        }

        let std_socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        std_socket.set_nonblocking(true)?;
        let local_addr = std_socket.local_addr()?;
        let socket = UdpSocket::from_std(std_socket)?;

        let burst = config.burst.clone().map(BurstBuffer::new);
        let fec = if config.enable_fec {
            Some(AdaptiveFec::with_default_codec())
        } else {
            None
        };

        Ok(Self {
            fec_enabled: config.enable_fec,
            config,
            configurator: None,
            core: None,
            socket: Arc::new(socket),
            local_addr,
            remote_endpoint: None,
            sni: String::new(),
            migration: MigrationState::default(),
            current_interface: None,
            previous_paths: Vec::new(),
            pending_migration: None,
            migration_listeners: Vec::new(),
            bbr: Arc::new(BbrV2Controller::default()),
            bbr_enabled: true,
            burst,
            burst_out: Arc::new(Mutex::new(VecDeque::new())),
            stream_shapers: HashMap::new(),
            fec,
            dgram_in: VecDeque::new(),
            epoch: Instant::now(),
            migrations: 0,
            established: false,
            zero_rtt_attempted: false,
            early_data_seen: false,
            inflight_estimate: 0,
            prev_lost: 0,
            prev_acked_bytes: 0,
            rng: StdRng::from_entropy(),
        })
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn make_scid(&mut self) -> Vec<u8> {
        let mut scid = vec![0u8; quiche::MAX_CONN_ID_LEN];
        scid[..SCID_PREFIX.len()].copy_from_slice(SCID_PREFIX);
        self.rng.fill(&mut scid[SCID_PREFIX.len()..]);
        scid
    }

    /// Resolves, sends the first flight and drives the handshake to
    /// completion or to the connect timeout. This future is the
    /// single-fire connect completion.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), ConnectionError> {
        let remote = match (host, port).to_socket_addrs() {
            Ok(mut addrs) => addrs.next().ok_or_else(|| {
                telemetry!(telemetry::DNS_ERRORS.inc());
                ConnectionError::Resolution(host.to_string())
            })?,
            Err(e) => {
                telemetry!(telemetry::DNS_ERRORS.inc());
                warn!("DNS resolution for {} failed: {}", host, e);
                return Err(ConnectionError::Resolution(host.to_string()));
            }
        };
        self.remote_endpoint = Some(remote);
        self.sni = host.to_string();
        info!("Connecting to {} at {}", host, remote);

        let mut configurator = if self.config.use_utls {
            UtlsConfigurator::initialize(
                self.config.fingerprint,
                host,
                self.config.ca_file.as_deref(),
                self.config.use_session_tickets,
            )?
        } else {
            // Library-default TLS: the minimal profile, no imitation.
            UtlsConfigurator::initialize(
                BrowserFingerprint::Custom,
                host,
                self.config.ca_file.as_deref(),
                self.config.use_session_tickets,
            )?
        };
        if self.config.verify_peer {
            configurator.verify_peer(true);
        }
        if self.config.debug_tls {
            configurator.log_keys();
            info!("ClientHello JA3: {}", configurator.ja3());
            info!("ClientHello JA3 hash: {}", configurator.ja3_hash());
            debug!(
                "Synthesized ClientHello: {} bytes",
                configurator.client_hello().len()
            );
        }

        let scid_bytes = self.make_scid();
        let scid = quiche::ConnectionId::from_ref(&scid_bytes);

        // Progressively weaker construction: full profile first, the
        // fallback profile second. The engine always ends up with a
        // usable connection value or aborts the attempt.
        let quic = match quiche::connect(
            Some(host),
            &scid,
            self.local_addr,
            remote,
            configurator.quic_config_mut(),
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!("Connection construction failed ({}); retrying with fallback", e);
                configurator
                    .apply_custom_fingerprint(crate::stealth::fallback_profile())?;
                quiche::connect(
                    Some(host),
                    &scid,
                    self.local_addr,
                    remote,
                    configurator.quic_config_mut(),
                )
                .map_err(|e| {
                    ConnectionError::Handshake(format!("connection aborted: {}", e))
                })?
            }
        };

        debug!("Created connection, trace id {}", quic.trace_id());
        self.core = Some(Arc::new(Mutex::new(ConnCore {
            quic,
            streams: HashMap::new(),
            next_stream_index: 0,
        })));
        self.configurator = Some(configurator);
        self.epoch = Instant::now();

        if self.config.zero_rtt.enabled {
            let attempted = self.attempt_zero_rtt_handshake(host);
            if !attempted {
                debug!("0-RTT not attempted for {}; full handshake", host);
            }
        }

        self.start_burst_task();
        self.flush_egress().await?;

        let deadline = Instant::now() + self.config.connect_timeout;
        while !self.established {
            if Instant::now() >= deadline {
                let _ = self.close_quic(0x0, b"connect timeout");
                return Err(ConnectionError::Timeout(self.config.connect_timeout));
            }
            if let Some(reason) = self.peer_close_reason() {
                return Err(ConnectionError::Handshake(reason));
            }
            if self.is_closed() {
                return Err(ConnectionError::Handshake(
                    "connection closed during handshake".to_string(),
                ));
            }
            self.drive_once(deadline).await?;
        }

        // Handshake is done: capture the resumption ticket and account
        // for the 0-RTT outcome.
        if let (Some(configurator), Some(core)) = (&self.configurator, &self.core) {
            let core = core.lock().unwrap();
            if let Some(session) = core.quic.session() {
                configurator.store_current_session(&self.sni, session);
            }
        }
        if self.zero_rtt_attempted && !self.early_data_seen {
            warn!("{}", ConnectionError::ZeroRttRejected);
        }
        info!("Handshake with {} completed", host);
        Ok(())
    }

    /// Installs a cached session for `hostname` and enables early
    /// data. Returns false (and leaves the handshake untouched) when
    /// policy or ticket state forbids the attempt.
    pub fn attempt_zero_rtt_handshake(&mut self, hostname: &str) -> bool {
        if !self.config.zero_rtt.enabled {
            return false;
        }
        let possible = ZERO_RTT
            .lock()
            .unwrap()
            .is_zero_rtt_possible(hostname, &self.config.zero_rtt);
        if !possible {
            info!("0-RTT refused for {} by token policy", hostname);
            return false;
        }
        let Some(ticket) = self
            .configurator
            .as_ref()
            .and_then(|c| c.restore_session(hostname))
        else {
            debug!("No resumable ticket for {}", hostname);
            return false;
        };
        let Some(core) = self.core.as_ref().map(Arc::clone) else {
            return false;
        };
        let mut core = core.lock().unwrap();
        match core.quic.set_session(&ticket) {
            Ok(()) => {
                telemetry!(telemetry::ZERO_RTT_ATTEMPTS.inc());
                self.zero_rtt_attempted = true;
                info!(
                    "0-RTT attempt for {} ({} ticket bytes, early data cap {})",
                    hostname,
                    ticket.len(),
                    self.config.zero_rtt.max_early_data
                );
                true
            }
            Err(e) => {
                warn!(
                    "{}",
                    ConnectionError::TicketInvalid(format!("{} rejected by engine: {}", hostname, e))
                );
                false
            }
        }
    }

    /// Allocates a client-initiated bidirectional stream, subject to
    /// peer capacity.
    pub fn create_stream(&mut self) -> Result<StreamHandle, ConnectionError> {
        let core = self
            .core
            .as_ref()
            .ok_or(ConnectionError::Protocol(quiche::Error::InvalidState))?;
        let mut guard = core.lock().unwrap();
        if !guard.quic.is_established() && !guard.quic.is_in_early_data() {
            return Err(ConnectionError::Protocol(quiche::Error::InvalidState));
        }
        if guard.quic.peer_streams_left_bidi() == 0 {
            return Err(ConnectionError::Protocol(quiche::Error::StreamLimit));
        }
        // Client-initiated bidi ids carry type bits 00.
        let id = guard.next_stream_index << 2;
        guard.next_stream_index += 1;
        guard
            .streams
            .insert(id, StreamState::new(id, StreamDirection::Bidirectional));
        debug!("Opened stream {}", id);
        Ok(StreamHandle::new(id, Arc::downgrade(core)))
    }

    /// Opens a bidirectional stream with its own burst shaper: bytes
    /// offered through [`Self::shaped_stream_send`] leave as framed
    /// bursts on that stream instead of immediately.
    pub fn create_shaped_stream(
        &mut self,
        config: BurstConfig,
    ) -> Result<StreamHandle, ConnectionError> {
        let handle = self.create_stream()?;
        let id = handle.id();
        let core = self
            .core
            .as_ref()
            .ok_or(ConnectionError::Protocol(quiche::Error::InvalidState))?;
        let weak = Arc::downgrade(core);

        let mut shaper = BurstBuffer::new(config);
        shaper.set_data_handler(move |framed| {
            if let Some(core) = weak.upgrade() {
                let mut guard = core.lock().unwrap();
                if let Err(e) = guard.quic.stream_send(id, &framed, false) {
                    if e != quiche::Error::Done {
                        debug!("Shaped write on stream {} failed: {}", id, e);
                    }
                }
            }
        });
        shaper.start();
        self.stream_shapers.insert(id, shaper);
        Ok(handle)
    }

    /// Queues bytes into the shaper attached to `stream_id`. Returns
    /// false when the shaper's buffer bound rejects the write.
    pub fn shaped_stream_send(
        &mut self,
        stream_id: u64,
        data: &[u8],
    ) -> Result<bool, ConnectionError> {
        match self.stream_shapers.get(&stream_id) {
            Some(shaper) => Ok(shaper.add_data(data)),
            None => Err(ConnectionError::Protocol(quiche::Error::InvalidStreamState(
                stream_id,
            ))),
        }
    }

    /// Sends application bytes on the unreliable datagram path,
    /// FEC-encoded when the shim is enabled.
    pub fn send_datagram(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let core = Arc::clone(
            self.core
                .as_ref()
                .ok_or(ConnectionError::Protocol(quiche::Error::InvalidState))?,
        );
        let mut guard = core.lock().unwrap();
        if self.fec_enabled {
            if let Some(fec) = self.fec.as_mut() {
                for packet in fec.on_send(data) {
                    guard.quic.dgram_send(&packet)?;
                }
                return Ok(());
            }
        }
        guard.quic.dgram_send(data)?;
        Ok(())
    }

    /// Shaped datagram send: queued into the burst buffer unless
    /// `urgent` or shaping is disabled.
    pub fn send_datagram_burst(&mut self, data: &[u8], urgent: bool) -> Result<(), ConnectionError> {
        if !urgent {
            if let Some(burst) = &self.burst {
                if burst.is_running() {
                    if burst.add_data(data) {
                        return Ok(());
                    }
                    warn!("Burst buffer rejected {} bytes; sending direct", data.len());
                }
            }
        }
        self.send_datagram(data)
    }

    /// Next datagram payload surfaced by the drive loop (after FEC
    /// decode when enabled).
    pub fn recv_datagram(&mut self) -> Option<Vec<u8>> {
        self.dgram_in.pop_front()
    }

    /// Runs the recv/send loop until the peer closes or an
    /// unrecoverable error occurs.
    pub async fn drive(&mut self) -> Result<(), ConnectionError> {
        let mut last_stats = Instant::now();
        loop {
            if self.is_closed() {
                if let Some(reason) = self.peer_close_reason() {
                    info!("Connection closed by peer: {}", reason);
                }
                return Ok(());
            }
            let deadline = Instant::now() + Duration::from_secs(60);
            self.drive_once(deadline).await?;

            if last_stats.elapsed() >= Duration::from_secs(1) {
                let stats = self.get_stats();
                info!(
                    "stats: RTT {:.0} ms, loss {:.2}%, pacing {:.0} kbps, cwnd {}",
                    stats.rtt_ms,
                    stats.loss_rate * 100.0,
                    stats.pacing_rate_bps / 1000.0,
                    stats.congestion_window
                );
                last_stats = Instant::now();
            }
        }
    }

    /// One pump iteration: wait for a datagram or the QUIC timer,
    /// feed the engine, then flush egress and post-process.
    async fn drive_once(&mut self, deadline: Instant) -> Result<(), ConnectionError> {
        let Some(core) = self.core.as_ref().map(Arc::clone) else {
            return Ok(());
        };
        let timeout = {
            let guard = core.lock().unwrap();
            guard.quic.timeout().unwrap_or(Duration::from_millis(100))
        };
        let wake = Instant::now() + timeout;
        let wake = if wake > deadline { deadline } else { wake };

        let socket = Arc::clone(&self.socket);
        let mut buf = [0u8; MAX_DATAGRAM_BUF];

        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, from)) => {
                        telemetry!(telemetry::BYTES_RECEIVED.inc_by(len as u64));
                        self.note_possible_path_response(&buf[..len]);
                        let recv_info = quiche::RecvInfo {
                            from,
                            to: self.local_addr,
                        };
                        let mut guard = core.lock().unwrap();
                        match guard.quic.recv(&mut buf[..len], recv_info) {
                            Ok(_) | Err(quiche::Error::Done) => {}
                            Err(e) => {
                                error!("Wire library rejected packet: {}", e);
                                drop(guard);
                                let _ = self.close_quic(0x1, b"protocol error");
                                return Err(ConnectionError::Protocol(e));
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        error!("Socket receive failed: {}", e);
                        let _ = self.close_quic(0x1, b"socket error");
                        return Err(ConnectionError::Transport(e));
                    }
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {
                core.lock().unwrap().quic.on_timeout();
            }
        }

        self.after_recv();
        self.pump_bursts()?;
        self.flush_egress().await?;
        self.check_migration_deadline();
        Ok(())
    }

    /// Post-ingest bookkeeping: congestion model, shaper feedback,
    /// stream surfacing, datagrams, path events, 0-RTT accounting.
    fn after_recv(&mut self) {
        let Some(core) = self.core.as_ref().map(Arc::clone) else {
            return;
        };
        let mut guard = core.lock().unwrap();

        let stats = guard.quic.stats();
        let path = guard.quic.path_stats().next();

        if let Some(path) = path {
            let rtt_us = path.rtt.as_micros() as u64;
            let delivery_bps = path.delivery_rate as f64 * 8.0;
            let lost_delta = (stats.lost as u64).saturating_sub(self.prev_lost);
            self.prev_lost = stats.lost as u64;

            // First-order inflight estimate: the wire library does not
            // expose per-path bytes in flight, so treat each inbound
            // datagram round as clearing roughly a cwnd share.
            self.inflight_estimate = self.inflight_estimate.min(path.cwnd as u64);

            if self.bbr_enabled {
                self.bbr.update(
                    rtt_us,
                    delivery_bps,
                    self.inflight_estimate,
                    stats.recv_bytes.saturating_sub(self.prev_acked_bytes),
                    lost_delta,
                    self.now_us(),
                );
            }
            self.prev_acked_bytes = stats.recv_bytes;

            let loss_rate = if stats.sent > 0 {
                stats.lost as f64 / stats.sent as f64
            } else {
                0.0
            };
            if let Some(burst) = &self.burst {
                let bw = if self.bbr_enabled {
                    self.bbr.bottleneck_bandwidth_bps()
                } else {
                    delivery_bps
                };
                burst.update_network_conditions(
                    path.rtt.as_secs_f64() * 1000.0,
                    loss_rate,
                    bw,
                );
            }
            if let Some(fec) = self.fec.as_mut() {
                fec.report_loss(stats.lost as u64, stats.sent as u64);
            }
        }

        // Surface readable stream bytes into the per-stream buffers.
        let readable: Vec<u64> = guard.quic.readable().collect();
        for id in readable {
            let mut chunk = [0u8; 4096];
            loop {
                match guard.quic.stream_recv(id, &mut chunk) {
                    Ok((n, fin)) => {
                        let state = guard.streams.entry(id).or_insert_with(|| {
                            let direction = if id & 0x02 == 0 {
                                StreamDirection::Bidirectional
                            } else {
                                StreamDirection::Unidirectional
                            };
                            StreamState::new(id, direction)
                        });
                        state.recv_buf.extend_from_slice(&chunk[..n]);
                        state.bytes_received += n as u64;
                        state.fin_received |= fin;
                        if fin {
                            break;
                        }
                    }
                    Err(quiche::Error::Done) => break,
                    Err(e) => {
                        debug!("Stream {} read error: {}", id, e);
                        break;
                    }
                }
            }
        }

        // Datagram path, through the FEC shim when enabled.
        let mut dbuf = [0u8; MAX_DATAGRAM_BUF];
        loop {
            match guard.quic.dgram_recv(&mut dbuf) {
                Ok(len) => {
                    if self.fec_enabled {
                        if let Some(fec) = self.fec.as_mut() {
                            for payload in fec.on_receive(&dbuf[..len]) {
                                self.dgram_in.push_back(payload);
                            }
                            continue;
                        }
                    }
                    self.dgram_in.push_back(dbuf[..len].to_vec());
                }
                Err(quiche::Error::Done) => break,
                Err(e) => {
                    debug!("Datagram read error: {}", e);
                    break;
                }
            }
        }

        if self.zero_rtt_attempted && !self.early_data_seen && guard.quic.is_in_early_data() {
            self.early_data_seen = true;
            telemetry!(telemetry::ZERO_RTT_ACCEPTED.inc());
            info!("Early data accepted by {}", self.sni);
        }

        if !self.established && guard.quic.is_established() {
            self.established = true;
        }

        // Path events decide migration outcomes.
        while let Some(event) = guard.quic.path_event_next() {
            match event {
                quiche::PathEvent::New(local, peer) => {
                    info!("New path observed: {} -> {}", local, peer);
                }
                quiche::PathEvent::Validated(local, peer) => {
                    info!("Path validated: {} -> {}", local, peer);
                    self.finish_migration_success(&mut guard);
                }
                quiche::PathEvent::FailedValidation(local, peer) => {
                    warn!("Path validation failed: {} -> {}", local, peer);
                    drop(guard);
                    self.rollback_migration("path validation failed");
                    return;
                }
                quiche::PathEvent::Closed(local, peer) => {
                    info!("Path closed: {} -> {}", local, peer);
                }
                quiche::PathEvent::ReusedSourceConnectionId(seq, old, new) => {
                    debug!("CID {} reused from {:?} to {:?}", seq, old, new);
                }
                quiche::PathEvent::PeerMigrated(local, peer) => {
                    info!("Peer migrated: {} -> {}", local, peer);
                }
            }
        }
    }

    /// Drains shaped bursts produced by the burst task onto the
    /// datagram path.
    fn pump_bursts(&mut self) -> Result<(), ConnectionError> {
        loop {
            let burst = { self.burst_out.lock().unwrap().pop_front() };
            let Some(burst) = burst else {
                break;
            };
            if let Err(e) = self.send_datagram(&burst) {
                match e {
                    ConnectionError::Protocol(quiche::Error::Done) => {
                        // Datagram queue full: requeue and retry next tick.
                        self.burst_out.lock().unwrap().push_front(burst);
                        break;
                    }
                    e => {
                        debug!("Dropping shaped burst: {}", e);
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes pending QUIC packets to the socket. Transient socket
    /// errors are logged and retried on the next loop; wire-library
    /// errors abort.
    async fn flush_egress(&mut self) -> Result<(), ConnectionError> {
        let Some(core) = self.core.as_ref().map(Arc::clone) else {
            return Ok(());
        };
        let mut out = [0u8; MAX_DATAGRAM_BUF];
        loop {
            let (len, to) = {
                let mut guard = core.lock().unwrap();
                match guard.quic.send(&mut out) {
                    Ok((len, info)) => (len, info.to),
                    Err(quiche::Error::Done) => break,
                    Err(e) => {
                        error!("Wire library send failed: {}", e);
                        return Err(ConnectionError::Protocol(e));
                    }
                }
            };
            match self.socket.send_to(&out[..len], to).await {
                Ok(sent) => {
                    telemetry!(telemetry::BYTES_SENT.inc_by(sent as u64));
                    self.inflight_estimate += sent as u64;
                }
                Err(e) => {
                    warn!("Socket send to {} failed: {}; will retry", to, e);
                    break;
                }
            }
        }
        Ok(())
    }

    fn start_burst_task(&mut self) {
        let Some(burst) = self.burst.as_mut() else {
            return;
        };
        let queue = Arc::clone(&self.burst_out);
        burst.set_data_handler(move |framed| {
            queue.lock().unwrap().push_back(framed);
        });
        burst.start();
    }

    // --- Migration ---

    /// Enables migration and snapshots the interface set.
    pub fn enable_migration(&mut self, enable: bool) -> Result<(), ConnectionError> {
        if enable {
            let interfaces = migration::enumerate_interfaces();
            if interfaces.is_empty() {
                return Err(ConnectionError::Migration(
                    "no non-loopback interfaces available".to_string(),
                ));
            }
            info!("Migration enabled; interfaces: {:?}", interfaces);
            self.migration.available_interfaces = interfaces;
        }
        self.migration.enabled = enable;
        Ok(())
    }

    /// Records the interface the next migration should target. The
    /// interface set is refreshed; a currently missing name is kept
    /// (interfaces come and go) but flagged.
    pub fn set_preferred_interface(&mut self, name: &str) {
        self.migration.available_interfaces = migration::enumerate_interfaces();
        if !self.migration.available_interfaces.iter().any(|i| i == name) {
            warn!("Preferred interface {} is not currently present", name);
        }
        self.migration.preferred_interface = Some(name.to_string());
    }

    /// Events carry exactly one entry per migration attempt.
    pub fn subscribe_migration(&mut self) -> mpsc::UnboundedReceiver<MigrationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.migration_listeners.push(tx);
        rx
    }

    fn emit_migration_event(&mut self, event: MigrationEvent) {
        self.migration_listeners
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Detects interface-set changes against the snapshot taken when
    /// migration was enabled; a change triggers a migration attempt.
    pub fn check_network_change(&mut self) -> bool {
        if !self.migration.enabled {
            return false;
        }
        let current = migration::enumerate_interfaces();
        if current != self.migration.available_interfaces {
            info!("Network change detected: {:?}", current);
            self.migration.available_interfaces = current;
            return true;
        }
        false
    }

    /// Moves the connection onto a new local path: bind to the target
    /// interface, push the old path for rollback and probe the peer.
    pub fn initiate_migration(&mut self) -> Result<(), ConnectionError> {
        if !self.migration.enabled {
            return Err(ConnectionError::Migration("migration not enabled".into()));
        }
        let old_interface = self.current_interface.clone();
        let target = match self.migration.preferred_interface.clone() {
            Some(name) => name,
            None => {
                let current = self.current_interface.clone().unwrap_or_default();
                match self
                    .migration
                    .available_interfaces
                    .iter()
                    .find(|i| **i != current)
                {
                    Some(name) => name.clone(),
                    None => {
                        let event = MigrationEvent {
                            success: false,
                            old_interface,
                            new_interface: None,
                            reason: Some("no alternative interface".into()),
                        };
                        self.emit_migration_event(event);
                        return Err(ConnectionError::Migration(
                            "no alternative interface available".into(),
                        ));
                    }
                }
            }
        };

        let socket = match migration::bind_to_interface(&target) {
            Ok(s) => s,
            Err(e) => {
                warn!("Migration to {} failed at bind: {}", target, e);
                self.emit_migration_event(MigrationEvent {
                    success: false,
                    old_interface,
                    new_interface: Some(target.clone()),
                    reason: Some(e.to_string()),
                });
                return Err(ConnectionError::Migration(format!(
                    "bind to {} failed: {}",
                    target, e
                )));
            }
        };

        let new_local = match socket.local_addr() {
            Ok(a) => a,
            Err(e) => {
                self.emit_migration_event(MigrationEvent {
                    success: false,
                    old_interface,
                    new_interface: Some(target.clone()),
                    reason: Some(e.to_string()),
                });
                return Err(ConnectionError::Migration(e.to_string()));
            }
        };
        let tokio_socket = UdpSocket::from_std(socket)
            .map_err(|e| ConnectionError::Migration(e.to_string()))?;

        let challenge = migration::new_challenge_data(&mut self.rng);
        let frame = migration::encode_path_challenge(&challenge);
        debug!(
            "PATH_CHALLENGE {:02x} || {}",
            PATH_CHALLENGE_FRAME,
            frame[1..]
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<String>()
        );

        // Swap the socket, keeping the old path for rollback. All
        // socket mutations happen here, serialized by &mut self.
        let old_socket = std::mem::replace(&mut self.socket, Arc::new(tokio_socket));
        self.previous_paths
            .push((old_socket, self.local_addr, self.current_interface.clone()));
        self.local_addr = new_local;
        self.current_interface = Some(target.clone());

        let core = self.core.as_ref().map(Arc::clone);
        if let (Some(core), Some(remote)) = (core, self.remote_endpoint) {
            let mut guard = core.lock().unwrap();
            let probed = guard
                .quic
                .probe_path(new_local, remote)
                .or_else(|_| guard.quic.migrate(new_local, remote));
            if let Err(e) = probed {
                drop(guard);
                self.pending_migration = Some(PendingMigration {
                    old_interface: old_interface.clone(),
                    new_interface: target.clone(),
                    challenge,
                    deadline: Instant::now(),
                });
                self.rollback_migration(&format!("wire library refused new path: {}", e));
                return Err(ConnectionError::Migration(e.to_string()));
            }
        }

        self.pending_migration = Some(PendingMigration {
            old_interface,
            new_interface: target,
            challenge,
            deadline: Instant::now() + MIGRATION_TIMEOUT,
        });
        Ok(())
    }

    fn note_possible_path_response(&mut self, payload: &[u8]) {
        if let Some(pending) = &self.pending_migration {
            if migration::find_path_response(payload, &pending.challenge) {
                debug!("Observed PATH_RESPONSE echo for pending migration");
            }
        }
    }

    fn finish_migration_success(&mut self, guard: &mut std::sync::MutexGuard<'_, ConnCore>) {
        let Some(pending) = self.pending_migration.take() else {
            return;
        };
        // Rotate the connection id so the new path does not share a
        // linkable identifier with the old one.
        let mut cid = vec![0u8; quiche::MAX_CONN_ID_LEN];
        self.rng.fill(&mut cid[..]);
        let reset_token: u128 = self.rng.gen();
        match guard
            .quic
            .new_scid(&quiche::ConnectionId::from_ref(&cid), reset_token, true)
        {
            Ok(seq) => debug!("Rotated connection id (seq {})", seq),
            Err(e) => debug!("Connection id rotation unavailable: {}", e),
        }

        telemetry!(telemetry::PATH_MIGRATIONS.inc());
        self.migrations += 1;
        info!(
            "Migration to {} validated (from {:?})",
            pending.new_interface, pending.old_interface
        );
        let event = MigrationEvent {
            success: true,
            old_interface: pending.old_interface,
            new_interface: Some(pending.new_interface),
            reason: None,
        };
        self.emit_migration_event(event);
    }

    fn check_migration_deadline(&mut self) {
        let expired = self
            .pending_migration
            .as_ref()
            .map(|p| Instant::now() >= p.deadline)
            .unwrap_or(false);
        if expired {
            self.rollback_migration("path validation timed out");
        }
    }

    /// Restores the previous endpoint and socket; the original path
    /// stays usable for receive.
    fn rollback_migration(&mut self, reason: &str) {
        let Some(pending) = self.pending_migration.take() else {
            return;
        };
        warn!("Migration rollback: {}", reason);
        if let Some((socket, local, interface)) = self.previous_paths.pop() {
            self.socket = socket;
            self.local_addr = local;
            self.current_interface = interface;
            if let (Some(core), Some(remote)) = (&self.core, self.remote_endpoint) {
                let mut guard = core.lock().unwrap();
                if let Err(e) = guard.quic.migrate(self.local_addr, remote) {
                    debug!("Return migration signal failed: {}", e);
                }
            }
        }
        let event = MigrationEvent {
            success: false,
            old_interface: pending.old_interface,
            new_interface: Some(pending.new_interface),
            reason: Some(reason.to_string()),
        };
        self.emit_migration_event(event);
    }

    // --- FEC / BBR / 0-RTT toggles ---

    pub fn enable_fec(&mut self, enable: bool) {
        self.fec_enabled = enable;
        if enable && self.fec.is_none() {
            self.fec = Some(AdaptiveFec::with_default_codec());
        }
    }

    pub fn set_fec_redundancy_rate(&mut self, rate: f64) {
        if let Some(fec) = self.fec.as_mut() {
            fec.set_redundancy_rate(rate);
        }
    }

    pub fn update_fec_redundancy_rate(&mut self, observed_loss: f64) {
        if let Some(fec) = self.fec.as_mut() {
            fec.update_redundancy_rate(observed_loss);
        }
    }

    pub fn enable_zero_rtt(&mut self, enable: bool) {
        self.config.zero_rtt.enabled = enable;
    }

    pub fn set_zero_rtt_config(&mut self, config: ZeroRttConfig) {
        self.config.zero_rtt = config;
    }

    pub fn enable_bbr_congestion_control(&mut self, enable: bool) {
        self.bbr_enabled = enable;
        if !enable {
            self.bbr.reset();
        }
    }

    pub fn set_bbr_params(&mut self, params: BbrParams) {
        self.bbr.set_params(params);
    }

    pub fn get_bbr_params(&self) -> BbrParams {
        self.bbr.params()
    }

    pub fn bbr_mode(&self) -> BbrMode {
        self.bbr.mode()
    }

    // --- Teardown and introspection ---

    fn close_quic(&mut self, code: u64, reason: &[u8]) -> Result<(), ConnectionError> {
        if let Some(core) = &self.core {
            let mut guard = core.lock().unwrap();
            match guard.quic.close(true, code, reason) {
                Ok(()) | Err(quiche::Error::Done) => {}
                Err(e) => return Err(ConnectionError::Protocol(e)),
            }
        }
        Ok(())
    }

    /// Emits CONNECTION_CLOSE, flushes the final flight and stops all
    /// background tasks before returning.
    pub async fn disconnect(&mut self, error_code: u64) -> Result<(), ConnectionError> {
        if let Some(burst) = self.burst.as_mut() {
            burst.stop().await;
        }
        for (_, mut shaper) in self.stream_shapers.drain() {
            shaper.stop().await;
        }
        self.pump_bursts()?;
        self.close_quic(error_code, b"client shutdown")?;
        self.flush_egress().await?;
        info!("Disconnected (code {:#x})", error_code);
        Ok(())
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn is_closed(&self) -> bool {
        self.core
            .as_ref()
            .map(|c| c.lock().unwrap().quic.is_closed())
            .unwrap_or(false)
    }

    fn peer_close_reason(&self) -> Option<String> {
        let core = self.core.as_ref()?;
        let guard = core.lock().unwrap();
        let err = guard.quic.peer_error()?;
        Some(format!(
            "peer closed (code {:#x}): {}",
            err.error_code,
            String::from_utf8_lossy(&err.reason)
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_endpoint
    }

    pub fn get_stats(&self) -> ConnectionStats {
        let mut out = ConnectionStats {
            migrations: self.migrations,
            zero_rtt_attempted: self.zero_rtt_attempted,
            zero_rtt_accepted: self.early_data_seen,
            pacing_rate_bps: self.bbr.pacing_rate_bps(),
            congestion_window: self.bbr.congestion_window(),
            ..Default::default()
        };
        if let Some(core) = &self.core {
            let guard = core.lock().unwrap();
            let stats = guard.quic.stats();
            out.packets_sent = stats.sent as u64;
            out.packets_lost = stats.lost as u64;
            out.bytes_sent = stats.sent_bytes;
            out.bytes_received = stats.recv_bytes;
            if stats.sent > 0 {
                out.loss_rate = stats.lost as f64 / stats.sent as f64;
            }
            let path = guard.quic.path_stats().next();
            if let Some(path) = path {
                out.rtt_ms = path.rtt.as_secs_f64() * 1000.0;
            }
        }
        out
    }
}
