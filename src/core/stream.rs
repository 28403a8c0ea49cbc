//! Stream handles.
//!
//! A handle keeps only a weak upward reference to the connection core
//! and re-acquires it on every operation, so a handle outliving its
//! connection fails cleanly instead of keeping the transport alive.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, Weak};

use crate::error::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Bidirectional,
    Unidirectional,
}

/// Book-keeping the engine maintains per stream.
#[derive(Debug)]
pub struct StreamState {
    pub id: u64,
    pub direction: StreamDirection,
    pub closed: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Bytes surfaced by the drive loop, not yet read by the handle.
    pub recv_buf: Vec<u8>,
    pub fin_received: bool,
}

impl StreamState {
    pub fn new(id: u64, direction: StreamDirection) -> Self {
        Self {
            id,
            direction,
            closed: false,
            bytes_sent: 0,
            bytes_received: 0,
            recv_buf: Vec::new(),
            fin_received: false,
        }
    }
}

/// Connection state shared between the drive task and stream handles.
pub struct ConnCore {
    pub quic: quiche::Connection,
    pub streams: HashMap<u64, StreamState>,
    pub next_stream_index: u64,
}

fn gone() -> ConnectionError {
    ConnectionError::Transport(io::Error::new(
        io::ErrorKind::NotConnected,
        "connection has been dropped",
    ))
}

pub struct StreamHandle {
    id: u64,
    core: Weak<Mutex<ConnCore>>,
}

impl StreamHandle {
    pub(crate) fn new(id: u64, core: Weak<Mutex<ConnCore>>) -> Self {
        Self { id, core }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Offers bytes to the stream. Bytes appear on the wire in offer
    /// order; a short write means the stream is flow-control blocked.
    pub fn send(&self, data: &[u8], fin: bool) -> Result<usize, ConnectionError> {
        let core = self.core.upgrade().ok_or_else(gone)?;
        let mut core = core.lock().unwrap();
        let written = core.quic.stream_send(self.id, data, fin)?;
        if let Some(state) = core.streams.get_mut(&self.id) {
            state.bytes_sent += written as u64;
            if fin {
                state.closed = true;
            }
        }
        Ok(written)
    }

    /// Reads surfaced bytes. Returns (bytes, fin).
    pub fn recv(&self, buf: &mut [u8]) -> Result<(usize, bool), ConnectionError> {
        let core = self.core.upgrade().ok_or_else(gone)?;
        let mut core = core.lock().unwrap();

        // Drain what the drive loop already surfaced before touching
        // the transport again.
        if let Some(state) = core.streams.get_mut(&self.id) {
            if !state.recv_buf.is_empty() {
                let n = buf.len().min(state.recv_buf.len());
                buf[..n].copy_from_slice(&state.recv_buf[..n]);
                state.recv_buf.drain(..n);
                let fin = state.fin_received && state.recv_buf.is_empty();
                return Ok((n, fin));
            }
            if state.fin_received {
                return Ok((0, true));
            }
        }

        match core.quic.stream_recv(self.id, buf) {
            Ok((n, fin)) => {
                if let Some(state) = core.streams.get_mut(&self.id) {
                    state.bytes_received += n as u64;
                    state.fin_received |= fin;
                }
                Ok((n, fin))
            }
            Err(quiche::Error::Done) => Ok((0, false)),
            Err(e) => Err(e.into()),
        }
    }

    /// Half-closes the send side.
    pub fn finish(&self) -> Result<(), ConnectionError> {
        let core = self.core.upgrade().ok_or_else(gone)?;
        let mut core = core.lock().unwrap();
        core.quic.stream_send(self.id, &[], true)?;
        if let Some(state) = core.streams.get_mut(&self.id) {
            state.closed = true;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        match self.core.upgrade() {
            Some(core) => {
                let core = core.lock().unwrap();
                core.streams
                    .get(&self.id)
                    .map(|s| s.closed && s.fin_received)
                    .unwrap_or(true)
            }
            None => true,
        }
    }
}
