//! `netsync_client`
//!
//! Client-side synchronization:
//! - Clock synchronization (ping/pong probing, clock offset)
//! - Tick estimation and 16-bit tick unwrapping
//! - Ring-buffer interpolation of replicated variables
//! - The dispatch loop applying remote messages to local entity state
//! - Length-prefixed TCP transport

pub mod client;
pub mod clock;
pub mod entity;
pub mod input;
pub mod interp;
pub mod rpc;
pub mod scene;
pub mod tick;
pub mod transport;

pub use client::SyncClient;
