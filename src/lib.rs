//! modembridge - a Hayes modem emulator bridging a serial DTE to a Telnet
//! peer over TCP.
//!
//! The serial side sees a classic AT-command modem: command lines, result
//! codes, S-registers, the guarded `+++` escape. The network side speaks
//! RFC 854 Telnet with option negotiation. In between, two supervised
//! pipelines move bytes under a fair quantum scheduler with watermark
//! backpressure.

pub mod ansi;
pub mod bytepipe;
pub mod config;
pub mod errors;
pub mod events;
pub mod modem;
pub mod network;
pub mod pipeline;
pub mod serial;
pub mod stats;

pub use config::BridgeConfig;
pub use errors::{BridgeError, BridgeResult};
pub use pipeline::supervisor::{Bridge, ShutdownHandle};
pub use pipeline::state::SupervisorState;
