//! Connection migration support: OS interface enumeration,
//! interface-bound socket construction and the PATH_CHALLENGE /
//! PATH_RESPONSE frame plumbing used to validate a new path.

use rand::Rng;
use std::io;
use std::net::UdpSocket;

/// QUIC frame types for path validation (RFC 9000 §19.17/§19.18).
pub const PATH_CHALLENGE_FRAME: u8 = 0x1a;
pub const PATH_RESPONSE_FRAME: u8 = 0x1b;

/// Outcome of one migration attempt, delivered on the migration event
/// channel exactly once per attempt.
#[derive(Debug, Clone)]
pub struct MigrationEvent {
    pub success: bool,
    pub old_interface: Option<String>,
    pub new_interface: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
pub struct MigrationState {
    pub enabled: bool,
    pub preferred_interface: Option<String>,
    pub available_interfaces: Vec<String>,
}

/// 0x1a followed by the eight challenge bytes.
pub fn encode_path_challenge(data: &[u8; 8]) -> [u8; 9] {
    let mut frame = [0u8; 9];
    frame[0] = PATH_CHALLENGE_FRAME;
    frame[1..].copy_from_slice(data);
    frame
}

pub fn new_challenge_data<R: Rng>(rng: &mut R) -> [u8; 8] {
    let mut data = [0u8; 8];
    rng.fill(&mut data[..]);
    data
}

/// Scans a decrypted payload for a PATH_RESPONSE echoing `expected`.
/// Frames may sit anywhere in the packet, so this is a windowed scan.
pub fn find_path_response(payload: &[u8], expected: &[u8; 8]) -> bool {
    if payload.len() < 9 {
        return false;
    }
    payload
        .windows(9)
        .any(|w| w[0] == PATH_RESPONSE_FRAME && &w[1..] == expected)
}

fn is_loopback_name(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.starts_with("loopback")
}

/// Non-loopback interfaces currently known to the OS.
pub fn enumerate_interfaces() -> Vec<String> {
    let networks = sysinfo::Networks::new_with_refreshed_list();
    let mut names: Vec<String> = networks
        .iter()
        .map(|(name, _)| name.clone())
        .filter(|name| !is_loopback_name(&name.to_ascii_lowercase()))
        .collect();
    names.sort();
    names
}

/// Binds a fresh UDP socket to `interface` on an ephemeral port. The
/// interface must exist; on Linux the socket is pinned with
/// SO_BINDTODEVICE, elsewhere only the existence check applies.
pub fn bind_to_interface(interface: &str) -> io::Result<UdpSocket> {
    if !enumerate_interfaces().iter().any(|i| i == interface) {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("interface {} not present", interface),
        ));
    }

    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    #[cfg(target_os = "linux")]
    socket.bind_device(Some(interface.as_bytes()))?;
    #[cfg(not(target_os = "linux"))]
    log::warn!(
        "Interface binding is best-effort on this platform (wanted {})",
        interface
    );

    let addr: std::net::SocketAddr = "0.0.0.0:0".parse().expect("literal address");
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
