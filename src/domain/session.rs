use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Realtime voice session state machine.
///
/// State transitions:
/// - Idle -> Connecting (connect)
/// - Connecting -> Open (provider acknowledged the session setup)
/// - Connecting -> Closed (device, network or handshake failure)
/// - Open -> Closed (disconnect, provider close, provider error)
/// - any -> Closed (disconnect)
///
/// Closed is terminal. A new session object is needed to talk again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Created, never connected.
    Idle = 0,
    /// Capture acquired, waiting for the provider handshake.
    Connecting = 1,
    /// Streaming in both directions.
    Open = 2,
    /// Torn down.
    Closed = 3,
}

impl SessionState {
    /// Check if realtime input may be sent in this state.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Connecting,
            2 => SessionState::Open,
            _ => SessionState::Closed, // Unknown states map to Closed
        }
    }
}

impl From<SessionState> for u8 {
    fn from(state: SessionState) -> Self {
        state as u8
    }
}

/// Atomic wrapper for SessionState for lock-free reads.
#[derive(Debug)]
pub struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state.into()))
    }

    pub fn load(&self) -> SessionState {
        self.0.load(Ordering::Acquire).into()
    }

    /// Store `new` and return the previous state.
    pub fn swap(&self, new: SessionState) -> SessionState {
        self.0.swap(new.into(), Ordering::AcqRel).into()
    }

    /// Compare and swap, returns true if successful.
    pub fn compare_exchange(&self, current: SessionState, new: SessionState) -> bool {
        self.0
            .compare_exchange(current.into(), new.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicSessionState {
    fn default() -> Self {
        Self::new(SessionState::Idle)
    }
}
