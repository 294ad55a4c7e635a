//! Termination signal handling
//!
//! A run is never cancelled cooperatively; on SIGTERM, SIGINT, SIGQUIT or
//! SIGHUP the in-flight work is dropped, the lock released, and the process
//! exits with `128 + signal`.

use crate::lock::PidLock;
use nix::sys::signal::Signal;
use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;

/// Handlers registered up front so no signal is missed once the run starts
pub struct SignalListener {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

impl SignalListener {
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sigquit: signal(SignalKind::quit())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next termination signal
    pub async fn recv(&mut self) -> Signal {
        let received = tokio::select! {
            _ = self.sigterm.recv() => Signal::SIGTERM,
            _ = self.sigint.recv() => Signal::SIGINT,
            _ = self.sigquit.recv() => Signal::SIGQUIT,
            _ = self.sighup.recv() => Signal::SIGHUP,
        };

        warn!("Received {}, aborting run", received);
        received
    }
}

/// How guarded work ended
#[derive(Debug, PartialEq, Eq)]
pub enum Interruptible<T> {
    Completed(T),
    Interrupted(Signal),
}

impl<T> Interruptible<T> {
    /// Exit status to report when interrupted
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Interruptible::Completed(_) => None,
            Interruptible::Interrupted(signal) => Some(exit_code(*signal)),
        }
    }
}

impl SignalListener {
    /// Drive `work` while holding `lock`, abandoning it on the first
    /// termination signal. The lock is released either way.
    pub async fn run_guarded<F: Future>(
        &mut self,
        lock: PidLock,
        work: F,
    ) -> Interruptible<F::Output> {
        // Finished work wins over a signal arriving in the same poll
        let outcome = tokio::select! {
            biased;
            output = work => Interruptible::Completed(output),
            signal = self.recv() => Interruptible::Interrupted(signal),
        };
        lock.release();
        outcome
    }
}

/// Conventional shell exit status for death by `signal`
pub fn exit_code(signal: Signal) -> i32 {
    128 + signal as i32
}
