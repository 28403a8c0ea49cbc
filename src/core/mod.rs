//! Transport layer: connection engine, streams, congestion control,
//! migration and 0-RTT.

pub mod bbr;
pub mod connection;
pub mod migration;
pub mod stream;
pub mod zero_rtt;

pub use bbr::{BbrMode, BbrParams, BbrSnapshot, BbrV2Controller, PACING_GAIN_CYCLE};
pub use connection::{ClientConfig, ConnectionStats, QuicConnection};
pub use migration::{MigrationEvent, PATH_CHALLENGE_FRAME, PATH_RESPONSE_FRAME};
pub use stream::{StreamDirection, StreamHandle};
pub use zero_rtt::{ZeroRttConfig, ZeroRttManager, ZeroRttToken, ZERO_RTT};
