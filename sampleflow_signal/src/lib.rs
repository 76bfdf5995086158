//! Cooperative stop signal for report passes.
//!
//! A report pass is a single-threaded loop over every row of a results file.
//! Callers that want to abandon a pass early, say on ctrl-c, need a way to
//! tell the loop to stop without reaching into it. This crate provides that
//! mechanism.
//!
//! The mechanism has two components, a `Broadcaster` and a `Watcher`. The
//! `Broadcaster` is responsible for signaling that the stop has been
//! requested. This is a one-time event. The `Watcher` is polled between rows
//! via [`Watcher::try_recv`] and never blocks.
//!
//! There is only one `Broadcaster` and potentially many `Watcher` instances,
//! typically one per concurrently running pass.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use tracing::{debug, info};

#[derive(Debug, Default)]
struct Shared {
    /// Set exactly once, by `Broadcaster::signal`.
    signaled: AtomicBool,
    /// Number of registered, live `Watcher` instances.
    peers: AtomicU32,
}

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let shared = Arc::new(Shared {
        signaled: AtomicBool::new(false),
        peers: AtomicU32::new(1),
    });

    let w = Watcher {
        shared: Arc::clone(&shared),
        signal_received: false,
        registered: true,
    };
    let b = Broadcaster { shared };

    (w, b)
}

#[derive(Debug)]
/// Mechanism to notify one or more `Watcher` instances that a stop has been
/// requested.
///
/// Dropping a `Broadcaster` without calling [`Broadcaster::signal`] does not
/// stop anything: a pass only stops when asked to.
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl Broadcaster {
    /// Send the signal through to any `Watcher` instances.
    ///
    /// Function will NOT block until the peers observe the signal, they do so
    /// the next time they poll.
    pub fn signal(self) {
        info!(peers = self.peers(), "stop requested");
        self.shared.signaled.store(true, Ordering::SeqCst);
    }

    /// The number of registered `Watcher` instances still alive.
    #[must_use]
    pub fn peers(&self) -> u32 {
        self.shared.peers.load(Ordering::SeqCst)
    }
}

/// Errors for `Watcher::try_recv`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// The signal has been received and yet `try_recv` was called.
    #[error("signal has been received")]
    SignalReceived,
}

/// Errors for `Watcher::register`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// The signal has been received and yet `register` was called.
    #[error("signal has been received")]
    SignalReceived,
}

#[derive(Debug)]
/// Mechanism to watch for a stop request.
pub struct Watcher {
    shared: Arc<Shared>,
    /// Used to track if the signal has been received by this instance.
    signal_received: bool,
    /// Whether this instance counts toward `Broadcaster::peers`.
    registered: bool,
}

impl Watcher {
    /// Check if a stop has been requested without blocking.
    ///
    /// If the signal has not been received returns Ok(false). If it has been
    /// received Ok(true). All calls after will return
    /// `TryRecvError::SignalReceived`.
    ///
    /// # Errors
    ///
    /// Returns `TryRecvError::SignalReceived` if the signal has already been
    /// received and processed by this watcher.
    pub fn try_recv(&mut self) -> Result<bool, TryRecvError> {
        if self.signal_received {
            return Err(TryRecvError::SignalReceived);
        }

        if self.shared.signaled.load(Ordering::SeqCst) {
            self.signal_received = true;
            self.deregister();
            debug!("stop signal observed");
            return Ok(true);
        }
        Ok(false)
    }

    /// Register with the `Broadcaster`, returning a new instance of `Watcher`.
    ///
    /// # Errors
    ///
    /// Returns `RegisterError::SignalReceived` if the signal has already been
    /// received by this watcher.
    pub fn register(&self) -> Result<Self, RegisterError> {
        if self.signal_received {
            return Err(RegisterError::SignalReceived);
        }

        self.shared.peers.fetch_add(1, Ordering::SeqCst);

        Ok(Self {
            shared: Arc::clone(&self.shared),
            signal_received: false,
            registered: true,
        })
    }

    fn deregister(&mut self) {
        if !self.registered {
            return;
        }
        // Why not use fetch_sub? That function overflows at the zero boundary
        // and we don't want the peer count to suddenly be u32::MAX.
        let mut old = self.shared.peers.load(Ordering::Relaxed);
        while old > 0 {
            match self.shared.peers.compare_exchange_weak(
                old,
                old - 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => old = x,
            }
        }
        self.registered = false;
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.deregister();
    }
}
