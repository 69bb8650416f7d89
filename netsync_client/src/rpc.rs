//! Remote procedure calls.
//!
//! The remote invokes local handlers by name. Each call carries an opaque,
//! length-prefixed payload that only the handler knows how to read.
//!
//! ```ignore
//! router.register("shake", |r| {
//!     let strength = r.read_f32()?;
//!     Ok(())
//! });
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use netsync_shared::codec::{CodecError, PacketReader};
use tracing::debug;

/// Handler for one named call.
pub type RpcHandler = Box<dyn FnMut(&mut PacketReader) -> Result<(), CodecError> + Send>;

/// What happened to a dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcOutcome {
    Handled,
    /// No handler is registered under that name.
    Unknown,
}

#[derive(Default)]
pub struct RpcRouter {
    handlers: HashMap<String, RpcHandler>,
}

impl RpcRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: FnMut(&mut PacketReader) -> Result<(), CodecError> + Send + 'static,
    {
        if self
            .handlers
            .insert(name.to_string(), Box::new(handler))
            .is_some()
        {
            debug!(rpc = name, "Replaced RPC handler");
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn dispatch(&mut self, name: &str, payload: Bytes) -> Result<RpcOutcome, CodecError> {
        let Some(handler) = self.handlers.get_mut(name) else {
            return Ok(RpcOutcome::Unknown);
        };
        let mut reader = PacketReader::new(payload);
        handler(&mut reader)?;
        if reader.has_more_data() {
            debug!(rpc = name, unread = reader.remaining(), "RPC handler left payload unread");
        }
        Ok(RpcOutcome::Handled)
    }
}

impl std::fmt::Debug for RpcRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("RpcRouter").field("handlers", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn dispatches_by_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut router = RpcRouter::new();
        let sink = Arc::clone(&seen);
        router.register("shake", move |r| {
            sink.lock().unwrap().push(r.read_u16()?);
            Ok(())
        });

        let outcome = router
            .dispatch("shake", Bytes::from_static(&[0x01, 0x02]))
            .unwrap();
        assert_eq!(outcome, RpcOutcome::Handled);
        assert_eq!(*seen.lock().unwrap(), vec![0x0102]);

        assert_eq!(
            router.dispatch("nope", Bytes::new()).unwrap(),
            RpcOutcome::Unknown
        );
    }

    #[test]
    fn short_payload_surfaces_codec_error() {
        let mut router = RpcRouter::new();
        router.register("shake", |r| r.read_u32().map(|_| ()));
        let err = router
            .dispatch("shake", Bytes::from_static(&[1]))
            .unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferUnderrun {
                needed: 4,
                remaining: 1
            }
        );
        assert!(router.contains("shake"));
        assert!(router.unregister("shake"));
        assert!(!router.contains("shake"));
    }
}
