//! # wsrelay-core
//!
//! Transport-agnostic core of the WebSocket broadcast relay.
//!
//! - [`frame`]: frames read from and written to a peer
//! - [`channel`]: the receive/send halves an upgraded socket splits into
//! - [`registry`]: the shared directory of connected peers
//! - [`connection`]: per-peer entry plus its outbound writer task
//! - [`broadcast`]: fan-out of one frame to every other peer
//! - [`relay`]: the per-connection `Open → Draining → Closed` loop
//! - [`lifecycle`]: accept → register → relay → close → deregister
//!
//! ## Data Flow
//!
//! `lifecycle` registers the peer and spawns its writer, then `relay` reads
//! frames and hands each to `broadcast`, which enqueues it on every other
//! peer's outbound queue. Each peer's writer drains its own queue onto the
//! wire, so a slow peer only ever delays itself.

#![deny(unsafe_code)]

pub mod broadcast;
pub mod channel;
pub mod config;
pub mod connection;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod registry;
pub mod relay;

pub use broadcast::{Broadcaster, FanoutReport};
pub use channel::{FrameChannel, FrameSink, FrameSource};
pub use config::RelayConfig;
pub use connection::{ConnectionEntry, OutboundReceiver, WriterOptions, spawn_writer};
pub use errors::{CloseHandshakeError, DuplicateConnectionError, ReceiveError, RelayError, SendError};
pub use frame::{CloseFrame, DataKind, Frame};
pub use ids::ConnectionId;
pub use lifecycle::LifecycleController;
pub use registry::{ConnectionRegistry, Registration};
pub use relay::{CloseCause, RelayLoop, RelayReport};
