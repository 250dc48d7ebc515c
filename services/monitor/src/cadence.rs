//! Snapshot cadence gate.
//!
//! Time is divided into fixed windows of `cadence_secs` seconds. The gate
//! fires on the first observed timestamp of each window and then stays fired
//! until a timestamp from a different window is observed, so a loop polling
//! many times per second still captures at most once per window. Keying on the
//! window index rather than on `timestamp % cadence == 0` means a tick delayed
//! past the boundary second still fires for its window.

use std::fmt;

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceState {
    /// No snapshot taken in the current window yet.
    Armed,
    /// A snapshot was taken for the given window index.
    Fired { window: i64 },
}

impl fmt::Display for CadenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CadenceState::Armed => write!(f, "armed"),
            CadenceState::Fired { window } => write!(f, "fired({})", window),
        }
    }
}

/// Armed/fired state machine keyed by cadence window.
#[derive(Debug, Clone)]
pub struct CadenceGate {
    cadence_secs: i64,
    state: CadenceState,
}

impl CadenceGate {
    /// `cadence_secs` must be non-zero; configuration validation guarantees it.
    pub fn new(cadence_secs: u64) -> Self {
        Self {
            cadence_secs: i64::try_from(cadence_secs.max(1)).unwrap_or(i64::MAX),
            state: CadenceState::Armed,
        }
    }

    pub fn state(&self) -> CadenceState {
        self.state
    }

    /// Window index containing `timestamp`.
    pub fn window_of(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.cadence_secs)
    }

    /// Observe the current timestamp. Returns `true` when this tick should
    /// capture a snapshot; the gate is already fired for the window when this
    /// returns, whatever happens to the capture afterwards.
    pub fn observe(&mut self, timestamp: i64) -> bool {
        let window = self.window_of(timestamp);

        match self.state {
            CadenceState::Fired { window: fired } if fired == window => false,
            // Leaving the fired window re-arms, and an armed gate fires at once.
            _ => {
                self.state = CadenceState::Fired { window };
                true
            }
        }
    }
}
