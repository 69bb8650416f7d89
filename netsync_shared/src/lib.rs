//! `netsync_shared`
//!
//! Everything the client and the authoritative peer must agree on
//! byte-for-byte.
//!
//! Design goals:
//! - Deterministic class/variable numbering from shared declarations.
//! - Explicit, bounds-checked binary encoding; no reflection.
//! - Typed errors for every decode failure.
//! - No `unsafe`.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod event;
pub mod math;
pub mod protocol;
pub mod registry;
pub mod value;
