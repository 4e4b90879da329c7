//! Unix signal handling for the emulator daemon.
//!
//! SIGINT and SIGTERM end the run gracefully; SIGHUP requests an immediate
//! status report. The C handlers only touch static atomics; a watcher thread
//! moves those flags into the shared [`SignalState`] the main loop polls.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignalKind {
    /// SIGTERM: stop the run.
    Terminate = 1,
    /// SIGINT (Ctrl+C): stop the run.
    Interrupt = 2,
    /// SIGHUP: log a status report.
    Hangup = 3,
}

impl SignalKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Terminate),
            2 => Some(Self::Interrupt),
            3 => Some(Self::Hangup),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Flags shared between the signal watcher and the main loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    report_requested: AtomicBool,
    signal_count: AtomicU32,
    last_signal: AtomicU8,
}

impl SignalState {
    /// Create a state with no pending requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the run should end.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Whether a status report was requested; clears the flag.
    #[inline]
    pub fn take_report_request(&self) -> bool {
        self.report_requested.swap(false, Ordering::Relaxed)
    }

    /// Ask the main loop to end the run.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Ask the main loop for a status report.
    pub fn request_report(&self) {
        self.report_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        self.last_signal.store(kind as u8, Ordering::Relaxed);
        match kind {
            SignalKind::Terminate | SignalKind::Interrupt => self.request_shutdown(),
            SignalKind::Hangup => self.request_report(),
        }
    }

    /// Number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    /// Most recent signal, if any.
    pub fn last_signal(&self) -> Option<SignalKind> {
        SignalKind::from_u8(self.last_signal.load(Ordering::Relaxed))
    }
}

/// Cloneable handle to the daemon's signal state.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Install the handlers (Unix only) and start the watcher thread.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler cannot be installed or the watcher
    /// thread cannot be spawned.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    /// Handler without OS registration, driven only by manual requests.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        static SIGTERM_SEEN: AtomicBool = AtomicBool::new(false);
        static SIGINT_SEEN: AtomicBool = AtomicBool::new(false);
        static SIGHUP_SEEN: AtomicBool = AtomicBool::new(false);

        extern "C" fn on_sigterm(_: c_int) {
            SIGTERM_SEEN.store(true, Ordering::Relaxed);
        }

        extern "C" fn on_sigint(_: c_int) {
            SIGINT_SEEN.store(true, Ordering::Relaxed);
        }

        extern "C" fn on_sighup(_: c_int) {
            SIGHUP_SEEN.store(true, Ordering::Relaxed);
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("hsi-signals".into())
            .spawn(move || loop {
                for (flag, kind) in [
                    (&SIGTERM_SEEN, SignalKind::Terminate),
                    (&SIGINT_SEEN, SignalKind::Interrupt),
                    (&SIGHUP_SEEN, SignalKind::Hangup),
                ] {
                    if flag.swap(false, Ordering::Relaxed) {
                        info!(signal = %kind, "Signal received");
                        state.record_signal(kind);
                    }
                }
                if state.shutdown_requested() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            })?;

        // SAFETY: the handlers only store to static atomics, which is
        // async-signal-safe.
        unsafe {
            for (signal, handler) in [
                (libc::SIGTERM, on_sigterm as extern "C" fn(c_int)),
                (libc::SIGINT, on_sigint as extern "C" fn(c_int)),
                (libc::SIGHUP, on_sighup as extern "C" fn(c_int)),
            ] {
                if libc::signal(signal, handler as libc::sighandler_t) == libc::SIG_ERR {
                    return Err(std::io::Error::last_os_error());
                }
            }
        }

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Whether the run should end.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Whether a status report was requested; clears the flag.
    #[inline]
    pub fn take_report_request(&self) -> bool {
        self.state.take_report_request()
    }

    /// End the run from inside the daemon.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.state.request_shutdown();
    }

    /// Shared state, for diagnostics.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

/// Sleep until `timeout` elapses or shutdown is requested.
///
/// Returns `true` if shutdown was requested.
pub fn wait_for_shutdown(handler: &SignalHandler, timeout: Duration) -> bool {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(50);

    loop {
        if handler.shutdown_requested() {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }
        std::thread::sleep(poll_interval.min(timeout - elapsed));
    }
}
