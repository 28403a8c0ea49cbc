// QuicSand Core Library
//
// A stealth QUIC client: user-space transport over UDP that imitates
// ordinary browser HTTPS/HTTP-3 traffic. The modules cover browser
// fingerprint synthesis, the connection engine with migration and
// 0-RTT, BBRv2 congestion control, burst shaping with protocol
// envelopes, and an adaptive FEC shim.

#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod telemetry;

pub mod app_config;
pub mod burst;
pub mod core;
pub mod error;
pub mod fec;
pub mod stealth;
