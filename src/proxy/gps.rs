//! GPS/PDS character-device passthrough.
//!
//! The original leaves the GPS endpoint entirely alone — it has no command channel, no SMS
//! traffic, and no call indications to watch for — so `W-GPS` is a bare [`StreamPair`] pump with a
//! no-op hook, kept as its own module (rather than folded into `proxy::pair`) so the worker wiring
//! in [`crate::workers`] reads the same way for every endpoint.
use crate::proxy::pair::{Direction, HookAction, ProxyHook};

/// Forwards every chunk unmodified in both directions.
pub struct PassthroughHook;

impl ProxyHook for PassthroughHook {
    fn pre_forward(&mut self, _direction: Direction, _data: &[u8]) -> HookAction {
        HookAction::Forward
    }
}
