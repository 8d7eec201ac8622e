//! Once-only shutdown triggering.
//!
//! Signals, a panic anywhere in the process, or a fatal runtime fault all
//! funnel into one [`ShutdownTrigger`]. The first reason wins and cancels
//! the shared token; later triggers are logged and otherwise ignored.

use std::{
    io,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio_util::sync::CancellationToken;

/// Why the server is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Operator sent a termination signal
    Signal(&'static str),
    /// Unrecoverable fault (panic, listener failure)
    Fault(String),
}

impl ShutdownReason {
    /// True when the process should exit unsuccessfully.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// Shared handle that starts the shutdown sequence at most once.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
    late_faults: Arc<AtomicUsize>,
}

impl ShutdownTrigger {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutdown. Returns true only for the call that started it.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        match self.reason.set(reason) {
            Ok(()) => {
                match self.reason.get() {
                    Some(ShutdownReason::Signal(signal)) => {
                        tracing::info!(signal, "shutdown requested");
                    },
                    Some(ShutdownReason::Fault(fault)) => {
                        tracing::error!(fault = %fault, "shutdown on fault");
                    },
                    None => {},
                }
                self.token.cancel();
                true
            },
            Err(ShutdownReason::Fault(fault)) => {
                self.late_faults.fetch_add(1, Ordering::Relaxed);
                tracing::error!(fault = %fault, "fault during shutdown");
                false
            },
            Err(ShutdownReason::Signal(signal)) => {
                tracing::info!(signal, "shutdown already in progress");
                false
            },
        }
    }

    /// Reason recorded by the first trigger.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }

    /// Whether shutdown has started.
    pub fn is_triggered(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Faults reported after shutdown had already started.
    pub fn late_faults(&self) -> usize {
        self.late_faults.load(Ordering::Relaxed)
    }

    /// True when the process should exit with a failure status.
    pub fn failed(&self) -> bool {
        self.reason().is_some_and(|reason| reason.is_fault()) || self.late_faults() > 0
    }

    /// Route panics on any thread into this trigger.
    ///
    /// The previous hook still runs first, so the panic message is printed.
    pub fn install_panic_hook(&self) {
        let trigger = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            trigger.trigger(ShutdownReason::Fault(format!("panic: {info}")));
        }));
    }
}

/// Wait for the next termination signal and return its name.
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

/// Wait for the next termination signal and return its name.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}
