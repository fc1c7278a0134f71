//! HTTP middleware applied to normal (non-upgrade) requests.

pub mod access_gate;
pub mod shaping;

pub use access_gate::{access_gate_middleware, AccessGate};
pub use shaping::{negotiate_encoding, Encoding, Shaping};
