//! Periodic tick sources.
//!
//! A [`PeriodicTimer`] is armed with an interval and a start mode and pushes
//! [`Tick`]s into a bounded channel through a [`TickSender`]. Delivery never
//! blocks the timer: when the channel is full the tick is dropped and
//! counted. The returned [`TimerHandle`] disarms the timer.
//!
//! - [`ThreadTimer`]: dedicated thread sleeping on absolute deadlines with
//!   `clock_nanosleep(TIMER_ABSTIME)`, `CLOCK_MONOTONIC` for relative starts
//!   and `CLOCK_REALTIME` for absolute (wall-clock) starts
//! - [`ManualTimer`]: fires only when told to, for deterministic tests

use crossbeam_channel::{Sender, TrySendError};
use crossbeam_utils::CachePadded;
use pulse_common::error::{PulseError, PulseResult};
use pulse_common::time::{MonotonicClock, TickInstant};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// One timer expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Expiration number, starting at 1. Gaps mean dropped ticks.
    pub seq: u64,
    /// Monotonic time at which the timer thread woke for this tick.
    pub at: TickInstant,
}

/// When the first tick fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// First tick after this delay, measured from arming.
    Relative(Duration),
    /// First tick at this wall-clock instant; lets independent runs line up.
    Absolute(SystemTime),
}

/// Counters shared between a running timer and its handle.
#[derive(Debug, Default)]
pub struct TimerCounters {
    fired: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
    overruns: CachePadded<AtomicU64>,
}

impl TimerCounters {
    /// Current values.
    pub fn snapshot(&self) -> TimerStats {
        TimerStats {
            fired: self.fired.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }

    fn add_overruns(&self, n: u64) {
        self.overruns.fetch_add(n, Ordering::Relaxed);
    }
}

/// Delivery statistics of a timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TimerStats {
    /// Expirations that produced a tick.
    pub fired: u64,
    /// Ticks dropped because the channel was full.
    pub dropped: u64,
    /// Expirations missed because the timer thread woke too late.
    pub overruns: u64,
}

impl TimerStats {
    /// Ticks that made it into the channel.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.fired - self.dropped
    }
}

/// Producer side of the tick channel.
#[derive(Debug, Clone)]
pub struct TickSender {
    tx: Sender<Tick>,
    counters: Arc<TimerCounters>,
}

impl TickSender {
    /// Wrap the sending half of a bounded channel.
    pub fn new(tx: Sender<Tick>) -> Self {
        Self {
            tx,
            counters: Arc::new(TimerCounters::default()),
        }
    }

    /// Deliver a tick without blocking.
    ///
    /// Returns `false` only when the receiver is gone; a full channel drops
    /// the tick and still returns `true`.
    pub fn send(&self, tick: Tick) -> bool {
        self.counters.fired.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(tick) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Shared counters.
    pub fn counters(&self) -> Arc<TimerCounters> {
        Arc::clone(&self.counters)
    }
}

/// Armed timer; disarming stops tick delivery.
pub trait TimerHandle: Send {
    /// Statistics so far.
    fn stats(&self) -> TimerStats;

    /// Stop the timer and release the tick sender.
    ///
    /// A tick already handed to the channel is still delivered.
    fn disarm(self: Box<Self>) -> TimerStats;
}

/// A repeating tick source.
pub trait PeriodicTimer {
    /// Start delivering ticks every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::TimerCreation`] if the clock or timer cannot
    /// be set up, or [`PulseError::TimerArm`] if it cannot be started.
    fn arm(
        &mut self,
        interval: Duration,
        start: StartMode,
        ticks: TickSender,
    ) -> PulseResult<Box<dyn TimerHandle>>;
}

/// Clock a [`ThreadTimer`] schedules its deadlines on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerClock {
    Monotonic,
    Realtime,
}

impl TimerClock {
    #[cfg(target_os = "linux")]
    fn clock_id(self) -> nix::time::ClockId {
        match self {
            Self::Monotonic => nix::time::ClockId::CLOCK_MONOTONIC,
            Self::Realtime => nix::time::ClockId::CLOCK_REALTIME,
        }
    }

    /// Current time on this clock in nanoseconds.
    #[cfg(target_os = "linux")]
    fn now_ns(self) -> PulseResult<u64> {
        let ts = nix::time::clock_gettime(self.clock_id())
            .map_err(|e| PulseError::TimerCreation(format!("clock_gettime failed: {e}")))?;
        let secs = u64::try_from(ts.tv_sec()).unwrap_or(0);
        let nanos = u64::try_from(ts.tv_nsec()).unwrap_or(0);
        Ok(secs * 1_000_000_000 + nanos)
    }

    #[cfg(not(target_os = "linux"))]
    fn now_ns(self) -> PulseResult<u64> {
        use std::sync::OnceLock;
        use std::time::Instant;

        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        match self {
            Self::Monotonic => {
                let origin = ORIGIN.get_or_init(Instant::now);
                Ok(u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX))
            }
            Self::Realtime => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                .map_err(|e| PulseError::TimerCreation(format!("system clock before epoch: {e}"))),
        }
    }

    /// Sleep until `deadline_ns` on this clock.
    #[cfg(target_os = "linux")]
    fn sleep_until(self, deadline_ns: u64) {
        let clock = match self {
            Self::Monotonic => libc::CLOCK_MONOTONIC,
            Self::Realtime => libc::CLOCK_REALTIME,
        };
        let ts = libc::timespec {
            tv_sec: (deadline_ns / 1_000_000_000) as libc::time_t,
            tv_nsec: (deadline_ns % 1_000_000_000) as libc::c_long,
        };

        loop {
            // SAFETY: clock_nanosleep is safe with a valid timespec and a
            // null remainder pointer (ignored for TIMER_ABSTIME).
            let rc = unsafe {
                libc::clock_nanosleep(clock, libc::TIMER_ABSTIME, &ts, std::ptr::null_mut())
            };
            if rc != libc::EINTR {
                break;
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sleep_until(self, deadline_ns: u64) {
        if let Ok(now) = self.now_ns() {
            if deadline_ns > now {
                thread::sleep(Duration::from_nanos(deadline_ns - now));
            }
        }
    }
}

/// Periodic timer backed by a dedicated thread and absolute deadlines.
#[derive(Debug, Clone)]
pub struct ThreadTimer {
    clock: MonotonicClock,
}

impl ThreadTimer {
    /// Create a timer stamping ticks against `clock`.
    #[must_use]
    pub fn new(clock: MonotonicClock) -> Self {
        Self { clock }
    }
}

impl Default for ThreadTimer {
    fn default() -> Self {
        Self::new(MonotonicClock::new())
    }
}

impl PeriodicTimer for ThreadTimer {
    fn arm(
        &mut self,
        interval: Duration,
        start: StartMode,
        ticks: TickSender,
    ) -> PulseResult<Box<dyn TimerHandle>> {
        let interval_ns = u64::try_from(interval.as_nanos())
            .ok()
            .filter(|&ns| ns > 0)
            .ok_or_else(|| PulseError::TimerCreation(format!("invalid interval {interval:?}")))?;

        let (clock, first_deadline) = match start {
            StartMode::Relative(delay) => {
                let now = TimerClock::Monotonic.now_ns()?;
                let delay_ns = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
                (TimerClock::Monotonic, now.saturating_add(delay_ns))
            }
            StartMode::Absolute(at) => {
                let at_ns = at
                    .duration_since(UNIX_EPOCH)
                    .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                    .map_err(|e| PulseError::TimerCreation(format!("start before epoch: {e}")))?;
                let now = TimerClock::Realtime.now_ns()?;
                (TimerClock::Realtime, align_to_grid(at_ns, now, interval_ns))
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let counters = ticks.counters();
        let thread_stop = Arc::clone(&stop);
        let stamp = self.clock;

        info!(
            interval_ns,
            ?clock,
            first_deadline_ns = first_deadline,
            "Arming periodic timer"
        );

        let thread = thread::Builder::new()
            .name("pulse-timer".into())
            .spawn(move || {
                run_timer_loop(clock, first_deadline, interval_ns, &ticks, &thread_stop, stamp);
            })
            .map_err(|e| PulseError::TimerArm(format!("failed to spawn timer thread: {e}")))?;

        Ok(Box::new(ThreadTimerHandle {
            stop,
            counters,
            thread: Some(thread),
        }))
    }
}

/// First deadline on the grid `start + k * interval` that is not in the past.
fn align_to_grid(start_ns: u64, now_ns: u64, interval_ns: u64) -> u64 {
    if start_ns >= now_ns {
        return start_ns;
    }
    let behind = now_ns - start_ns;
    let periods = behind.div_ceil(interval_ns);
    warn!(
        skipped_periods = periods,
        "Absolute start instant already passed, joining the tick grid"
    );
    start_ns + periods * interval_ns
}

/// Longest uninterrupted sleep, so a disarm is noticed before a distant deadline.
const STOP_POLL_NS: u64 = 50_000_000;

/// Sleep until `deadline`, waking every [`STOP_POLL_NS`] to check `stop`.
///
/// Returns `true` if `stop` was set. The last slice sleeps on the exact
/// deadline so the tick keeps absolute-time precision.
fn wait_for_deadline(clock: TimerClock, deadline: u64, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Acquire) {
            return true;
        }
        let Ok(now) = clock.now_ns() else {
            clock.sleep_until(deadline);
            break;
        };
        if deadline.saturating_sub(now) <= STOP_POLL_NS {
            clock.sleep_until(deadline);
            break;
        }
        clock.sleep_until(now + STOP_POLL_NS);
    }
    stop.load(Ordering::Acquire)
}

fn run_timer_loop(
    clock: TimerClock,
    mut deadline: u64,
    interval_ns: u64,
    ticks: &TickSender,
    stop: &AtomicBool,
    stamp: MonotonicClock,
) {
    debug!("Timer thread started");
    let mut seq = 0u64;

    while !stop.load(Ordering::Acquire) {
        if wait_for_deadline(clock, deadline, stop) {
            break;
        }

        seq += 1;
        if !ticks.send(Tick {
            seq,
            at: stamp.now(),
        }) {
            debug!("Tick receiver gone, timer thread exiting");
            break;
        }

        deadline += interval_ns;
        if let Ok(now) = clock.now_ns() {
            let behind = now.saturating_sub(deadline);
            if behind >= interval_ns {
                let missed = behind / interval_ns;
                ticks.counters.add_overruns(missed);
                seq += missed;
                deadline += missed * interval_ns;
            }
        }
    }

    debug!(last_seq = seq, "Timer thread stopped");
}

struct ThreadTimerHandle {
    stop: Arc<AtomicBool>,
    counters: Arc<TimerCounters>,
    thread: Option<JoinHandle<()>>,
}

impl TimerHandle for ThreadTimerHandle {
    fn stats(&self) -> TimerStats {
        self.counters.snapshot()
    }

    fn disarm(mut self: Box<Self>) -> TimerStats {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            // Wakes within one stop poll slice
            if let Err(e) = handle.join() {
                warn!("Timer thread panicked: {:?}", e);
            }
        }
        let stats = self.counters.snapshot();
        info!(
            fired = stats.fired,
            dropped = stats.dropped,
            overruns = stats.overruns,
            "Timer disarmed"
        );
        stats
    }
}

impl Drop for ThreadTimerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Timer that fires only when [`ManualTimer::fire`] is called.
///
/// Timestamps advance by exactly one interval per tick unless given
/// explicitly with [`ManualTimer::fire_at`].
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    slot: Arc<Mutex<Option<ManualState>>>,
}

#[derive(Debug)]
struct ManualState {
    ticks: TickSender,
    interval_ns: u64,
    seq: u64,
}

impl ManualTimer {
    /// Create an unarmed manual timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire one tick at the next synthetic timestamp.
    ///
    /// Returns `false` if the timer is not armed or the receiver is gone.
    pub fn fire(&self) -> bool {
        self.with_state(|state| TickInstant::from_nanos(state.seq * state.interval_ns))
    }

    /// Fire one tick stamped `at`.
    pub fn fire_at(&self, at: TickInstant) -> bool {
        self.with_state(|_| at)
    }

    /// Fire `n` ticks; returns how many were accepted.
    pub fn fire_n(&self, n: usize) -> usize {
        (0..n).take_while(|_| self.fire()).count()
    }

    fn with_state(&self, stamp: impl FnOnce(&ManualState) -> TickInstant) -> bool {
        let Ok(mut guard) = self.slot.lock() else {
            return false;
        };
        match guard.as_mut() {
            Some(state) => {
                state.seq += 1;
                let at = stamp(state);
                state.ticks.send(Tick { seq: state.seq, at })
            }
            None => false,
        }
    }
}

impl PeriodicTimer for ManualTimer {
    fn arm(
        &mut self,
        interval: Duration,
        _start: StartMode,
        ticks: TickSender,
    ) -> PulseResult<Box<dyn TimerHandle>> {
        let mut guard = self
            .slot
            .lock()
            .map_err(|_| PulseError::TimerCreation("manual timer lock poisoned".into()))?;
        if guard.is_some() {
            return Err(PulseError::TimerArm("manual timer already armed".into()));
        }
        let counters = ticks.counters();
        *guard = Some(ManualState {
            ticks,
            interval_ns: u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX),
            seq: 0,
        });
        Ok(Box::new(ManualTimerHandle {
            slot: Arc::clone(&self.slot),
            counters,
        }))
    }
}

struct ManualTimerHandle {
    slot: Arc<Mutex<Option<ManualState>>>,
    counters: Arc<TimerCounters>,
}

impl TimerHandle for ManualTimerHandle {
    fn stats(&self) -> TimerStats {
        self.counters.snapshot()
    }

    fn disarm(self: Box<Self>) -> TimerStats {
        if let Ok(mut guard) = self.slot.lock() {
            guard.take();
        }
        self.counters.snapshot()
    }
}
