//! Shutdown requests for the pulse train.
//!
//! A run ends when the operator presses ENTER, when SIGINT or SIGTERM
//! arrives, or when an optional run duration elapses. Signal handlers only
//! store into an atomic; the controlling thread polls it while waiting.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownReason {
    /// ENTER pressed on stdin.
    Operator = 1,
    /// SIGINT (Ctrl+C).
    Interrupt = 2,
    /// SIGTERM.
    Terminate = 3,
    /// `--duration` elapsed.
    Elapsed = 4,
}

impl ShutdownReason {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Operator),
            2 => Some(Self::Interrupt),
            3 => Some(Self::Terminate),
            4 => Some(Self::Elapsed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Operator => write!(f, "operator"),
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Elapsed => write!(f, "duration elapsed"),
        }
    }
}

/// Written from the signal handler; async-signal-safe.
static PENDING_SIGNAL: AtomicU8 = AtomicU8::new(0);

/// Shared shutdown flag.
#[derive(Debug, Default)]
pub struct ShutdownState {
    requested: AtomicBool,
    reason: AtomicU8,
}

impl ShutdownState {
    /// Create a state with no shutdown requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Request shutdown. The first reason wins.
    pub fn request(&self, reason: ShutdownReason) {
        if self
            .reason
            .compare_exchange(0, reason as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.requested.store(true, Ordering::Release);
        }
    }

    /// The reason of the first request, if any.
    pub fn reason(&self) -> Option<ShutdownReason> {
        ShutdownReason::from_raw(self.reason.load(Ordering::Acquire))
    }
}

/// Handle for requesting and awaiting shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandler {
    state: Arc<ShutdownState>,
}

impl ShutdownHandler {
    /// Create a handler and install SIGINT and SIGTERM handlers.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self::detached();

        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(handler)
    }

    /// Create a handler that only reacts to explicit requests.
    pub fn detached() -> Self {
        Self {
            state: Arc::new(ShutdownState::new()),
        }
    }

    /// Spawn a thread that requests shutdown when a line is read from stdin.
    ///
    /// End of input is ignored so the run keeps going without a terminal.
    pub fn watch_stdin(&self) -> std::io::Result<()> {
        let state = Arc::clone(&self.state);
        thread::Builder::new()
            .name("pulse-stdin".into())
            .spawn(move || {
                let mut line = String::new();
                match std::io::stdin().lock().read_line(&mut line) {
                    Ok(0) => debug!("stdin closed, waiting for a signal instead"),
                    Ok(_) => {
                        info!("ENTER pressed");
                        state.request(ShutdownReason::Operator);
                    }
                    Err(e) => debug!(error = %e, "stdin read failed"),
                }
            })?;
        Ok(())
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.poll_signal();
        self.state.shutdown_requested()
    }

    /// Manually request shutdown.
    pub fn request_shutdown(&self, reason: ShutdownReason) {
        info!(%reason, "Shutdown requested");
        self.state.request(reason);
    }

    /// Move a pending signal into the shared state.
    fn poll_signal(&self) {
        let raw = PENDING_SIGNAL.swap(0, Ordering::Relaxed);
        if let Some(reason) = ShutdownReason::from_raw(raw) {
            info!(%reason, "Shutdown signal received");
            self.state.request(reason);
        }
    }

    /// Block until shutdown is requested or `limit` elapses.
    pub fn wait(&self, limit: Option<Duration>) -> ShutdownReason {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);

        loop {
            if self.shutdown_requested() {
                if let Some(reason) = self.state.reason() {
                    return reason;
                }
            }
            let sleep = match limit {
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        self.state.request(ShutdownReason::Elapsed);
                        continue;
                    }
                    poll_interval.min(limit - elapsed)
                }
                None => poll_interval,
            };
            thread::sleep(sleep);
        }
    }
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::os::raw::c_int;

    extern "C" fn on_signal(signal: c_int) {
        let reason = if signal == libc::SIGINT {
            ShutdownReason::Interrupt
        } else {
            ShutdownReason::Terminate
        };
        PENDING_SIGNAL.store(reason as u8, Ordering::Relaxed);
    }

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store.
        unsafe { sigaction(signal, &action) }.map_err(std::io::Error::from)?;
    }

    debug!("SIGINT/SIGTERM handlers registered");
    Ok(())
}
