//! # wsrelay-server
//!
//! HTTP front end for the relay. Routes `GET {path}` upgrades into the
//! relay core and rejects same-path requests that are not upgrades with
//! `400`. Also serves `/health`, `/metrics` and, optionally, a static
//! directory for every other path.

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod socket;

pub use errors::ServerError;
pub use server::{AppState, RelayServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use socket::AxumChannel;
