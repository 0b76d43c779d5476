//! Interrupt handling for the watch loop (SIGINT/SIGTERM)
//!
//! The first signal asks the loop to stop: it terminates any in-flight test
//! command and returns. A second signal exits immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code used when a second interrupt forces an immediate exit
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop after cleaning up
    Shutdown,
    /// Second signal: exit now
    ImmediateExit,
    /// Third+ signal
    Ignore,
}

/// Shared shutdown flag
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    requested: AtomicBool,
    signal_count: AtomicU8,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Record a signal and decide what to do about it
    pub fn handle_signal(&self) -> SignalAction {
        match self.signal_count.fetch_add(1, Ordering::SeqCst) {
            0 => {
                self.requested.store(true, Ordering::SeqCst);
                SignalAction::Shutdown
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }

    /// Request shutdown without a signal
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}

/// Install a Ctrl-C / SIGTERM handler feeding `signal`.
///
/// Must be called at most once per process.
pub fn install(signal: Arc<ShutdownSignal>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || match signal.handle_signal() {
        SignalAction::Shutdown => {
            eprintln!("\nReceived interrupt, stopping...");
        }
        SignalAction::ImmediateExit => {
            eprintln!("\nReceived second interrupt, exiting immediately");
            std::process::exit(EXIT_CODE_INTERRUPTED);
        }
        SignalAction::Ignore => {}
    })
}
