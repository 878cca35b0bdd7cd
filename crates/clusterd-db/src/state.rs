//! The database gateway's lifecycle state machine (spec §4.4).
//!
//! `NotReady` -> `Starting` -> (`Waiting` <-> `Ready`) -> `Offline`.
//! `IsOpen()` is true only in `Ready`; `Waiting` means the schema manager is
//! blocked on `waitUpgrade` because a peer has not yet caught up.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    NotReady,
    Starting,
    Waiting,
    Ready,
    Offline,
}

impl GatewayState {
    fn as_u8(self) -> u8 {
        match self {
            GatewayState::NotReady => 0,
            GatewayState::Starting => 1,
            GatewayState::Waiting => 2,
            GatewayState::Ready => 3,
            GatewayState::Offline => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => GatewayState::NotReady,
            1 => GatewayState::Starting,
            2 => GatewayState::Waiting,
            3 => GatewayState::Ready,
            _ => GatewayState::Offline,
        }
    }
}

/// Atomic cell holding the current `GatewayState`, shared across the
/// gateway's background tasks (heartbeat, accept loop, API handlers).
pub struct GatewayStateCell(AtomicU8);

impl GatewayStateCell {
    pub fn new(initial: GatewayState) -> Self {
        Self(AtomicU8::new(initial.as_u8()))
    }

    pub fn get(&self) -> GatewayState {
        GatewayState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: GatewayState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Whether the `/database` endpoint may currently be dispatched.
    pub fn is_open(&self) -> bool {
        matches!(self.get(), GatewayState::Ready)
    }
}

impl Default for GatewayStateCell {
    fn default() -> Self {
        Self::new(GatewayState::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_open_only_in_ready() {
        let cell = GatewayStateCell::new(GatewayState::Starting);
        assert!(!cell.is_open());
        cell.set(GatewayState::Ready);
        assert!(cell.is_open());
        cell.set(GatewayState::Waiting);
        assert!(!cell.is_open());
    }
}
