//! Browser-imitation layer: fingerprint catalog, ClientHello
//! synthesis, wire configuration, rotation and session-ticket cache.

pub mod fingerprint;
pub mod hello;
pub mod rotator;
pub mod tickets;
pub mod utls;

pub use fingerprint::{
    fallback_profile, profile, randomized_profile, BrowserFingerprint, FingerprintProfile,
    GreasePolicy, SessionTicketMode, TransportProfile,
};
pub use hello::{build_client_hello, is_grease, ja3_hash, ja3_string};
pub use rotator::{FingerprintRotator, RotationStrategy};
pub use tickets::{SessionTicketStore, SESSION_TICKETS};
pub use utls::UtlsConfigurator;
