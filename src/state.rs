//! Process-wide run state shared between signal handlers and the run loop.

use std::sync::atomic::{AtomicU8, Ordering};

/// Shutdown classification of the running process.
///
/// Leaves `Normal` at most once and never returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Normal,
    ExitSuccess,
    ExitFailure,
}

impl RunState {
    const NORMAL: u8 = 0;
    const EXIT_SUCCESS: u8 = 1;
    const EXIT_FAILURE: u8 = 2;

    fn to_raw(self) -> u8 {
        match self {
            RunState::Normal => Self::NORMAL,
            RunState::ExitSuccess => Self::EXIT_SUCCESS,
            RunState::ExitFailure => Self::EXIT_FAILURE,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            Self::EXIT_SUCCESS => RunState::ExitSuccess,
            Self::EXIT_FAILURE => RunState::ExitFailure,
            _ => RunState::Normal,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != RunState::Normal
    }

    /// Process exit status for a terminal state.
    pub fn exit_code(self) -> i32 {
        match self {
            RunState::Normal | RunState::ExitSuccess => 0,
            RunState::ExitFailure => 1,
        }
    }
}

/// Lock-free cell holding a [`RunState`].
///
/// `transition` is a single compare-exchange, so it is safe to call from a
/// signal handler.
#[derive(Debug)]
pub struct RunStateCell(AtomicU8);

impl RunStateCell {
    pub const fn new() -> Self {
        RunStateCell(AtomicU8::new(RunState::NORMAL))
    }

    pub fn load(&self) -> RunState {
        RunState::from_raw(self.0.load(Ordering::SeqCst))
    }

    /// Moves `Normal` to `target`. Returns `false` if a terminal state was
    /// already recorded (the first transition wins).
    pub fn transition(&self, target: RunState) -> bool {
        if !target.is_terminal() {
            return false;
        }
        self.0
            .compare_exchange(
                RunState::NORMAL,
                target.to_raw(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl Default for RunStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// The one cell the installed signal handlers write to.
pub(crate) static RUN_STATE: RunStateCell = RunStateCell::new();

/// Current process-wide run state.
pub fn current() -> RunState {
    RUN_STATE.load()
}
