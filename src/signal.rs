//! Interrupt handling
//!
//! The first SIGINT/SIGTERM cancels the run: running children are
//! terminated, undispatched workers fail, and no further step starts. A
//! second signal exits the process immediately with the cancelled code.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use paralexe_exec::CancelToken;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel the run
    InitiateCancellation,
    /// Second signal: exit now
    ImmediateExit,
    /// Further signals
    Ignore,
}

/// Counts signals and cancels the token on the first one.
#[derive(Debug)]
pub struct SignalState {
    signal_count: AtomicU8,
    cancel: CancelToken,
}

impl SignalState {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            signal_count: AtomicU8::new(0),
            cancel,
        }
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal and return the action to take.
    pub fn handle_signal(&self) -> SignalAction {
        match self.signal_count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                self.cancel.cancel();
                SignalAction::InitiateCancellation
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Install the process-wide handler. Must be called at most once.
pub fn install(cancel: CancelToken) -> Result<Arc<SignalState>, ctrlc::Error> {
    let state = Arc::new(SignalState::new(cancel));
    let handler_state = Arc::clone(&state);
    ctrlc::set_handler(move || match handler_state.handle_signal() {
        SignalAction::InitiateCancellation => {
            tracing::warn!("Received interrupt, cancelling run (interrupt again to exit now)");
        }
        SignalAction::ImmediateExit => {
            tracing::error!("Received second interrupt, exiting");
            std::process::exit(EXIT_CODE_CANCELLED);
        }
        SignalAction::Ignore => {}
    })?;
    Ok(state)
}
