//! Real-time scheduling and memory locking.
//!
//! The tick path runs on a single thread whose wake-up latency is what shows
//! up as jitter on the output line. Before arming the timer the process:
//! - locks its memory (mlockall) so the tick path never page-faults
//! - switches to a real-time scheduling class (SCHED_FIFO/SCHED_RR)
//!
//! Threads spawned afterwards (timer and engine) inherit the policy.
//! Missing privileges (EPERM) only produce a warning unless `fail_fast` is set.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use pulse_common::config::{RealtimeConfig, SchedPolicy};
use pulse_common::error::{PulseError, PulseResult};
use tracing::{debug, error, info, warn};

/// Outcome of real-time initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeStatus {
    /// Whether memory was locked.
    pub memory_locked: bool,
    /// Applied scheduler policy.
    pub scheduler_policy: Option<SchedPolicy>,
    /// Applied scheduler priority.
    pub scheduler_priority: Option<u8>,
}

impl RealtimeStatus {
    /// True if the process actually runs under a real-time policy.
    #[must_use]
    pub fn is_realtime(&self) -> bool {
        matches!(
            self.scheduler_policy,
            Some(SchedPolicy::Fifo | SchedPolicy::Rr)
        )
    }
}

/// Prepare the process for low-latency tick handling.
///
/// # Errors
///
/// Returns [`PulseError::Config`] if `fail_fast` is set and the required
/// privileges are missing, or if a syscall fails for a reason other than
/// missing privileges.
pub fn init_realtime(config: &RealtimeConfig) -> PulseResult<RealtimeStatus> {
    if !config.enabled {
        info!("Real-time scheduling disabled in configuration");
        return Ok(RealtimeStatus::default());
    }

    if config.fail_fast {
        info!("Validating real-time capabilities (fail_fast=true)");
        validate_rt_capabilities(config)?;
    }

    let memory_locked = if config.lock_memory {
        lock_memory()?
    } else {
        false
    };

    let (scheduler_policy, scheduler_priority) = set_scheduler(config.policy, config.priority)?;

    let status = RealtimeStatus {
        memory_locked,
        scheduler_policy,
        scheduler_priority,
    };
    info!(?status, "Real-time initialization complete");
    Ok(status)
}

/// Lock all current and future memory pages.
#[cfg(target_os = "linux")]
fn lock_memory() -> PulseResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    debug!("Locking memory pages with mlockall");

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Memory locked");
            Ok(true)
        }
        Err(e @ (nix::errno::Errno::EPERM | nix::errno::Errno::ENOMEM)) => {
            let warning = PulseError::Scheduling(format!(
                "mlockall: {e} (grant CAP_IPC_LOCK or raise RLIMIT_MEMLOCK), page faults may add latency"
            ));
            warn!("{warning}");
            Ok(false)
        }
        Err(e) => Err(PulseError::Config(format!("mlockall failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> PulseResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

/// Switch the calling thread to `policy` at `priority`.
#[cfg(target_os = "linux")]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> PulseResult<(Option<SchedPolicy>, Option<u8>)> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => {
            debug!("Using SCHED_OTHER scheduling");
            return Ok((Some(SchedPolicy::Other), None));
        }
    };

    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(
            original = priority,
            clamped, "Scheduler priority clamped to valid range"
        );
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };
    // SAFETY: sched_setscheduler with pid 0 targets the calling thread and
    // only reads `param`.
    let result = unsafe { libc::sched_setscheduler(0, linux_policy, &param) };

    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            let warning = PulseError::Scheduling(format!(
                "sched_setscheduler: {err} (grant CAP_SYS_NICE or raise RLIMIT_RTPRIO), \
                 continuing at default priority"
            ));
            warn!("{warning}");
            return Ok((None, None));
        }
        return Err(PulseError::Config(format!("sched_setscheduler failed: {err}")));
    }

    info!(?policy, priority = clamped, "Real-time scheduler configured");
    Ok((Some(policy), Some(clamped)))
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> PulseResult<(Option<SchedPolicy>, Option<u8>)> {
    warn!(
        ?policy,
        priority, "Real-time scheduling not available on this platform"
    );
    Ok((None, None))
}

/// Real-time related limits of the current process.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO soft limit.
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK soft limit.
    pub memlock_limit: Option<u64>,
    /// Whether the kernel is built with PREEMPT_RT.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// Check if RT scheduling is likely to succeed.
    #[must_use]
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l > 0)
    }

    /// Check if memory locking is likely to succeed.
    #[must_use]
    pub fn can_lock_memory(&self) -> bool {
        if self.is_root {
            return true;
        }

        #[cfg(target_family = "unix")]
        {
            self.memlock_limit.is_some_and(|l| l == libc::RLIM_INFINITY)
        }

        #[cfg(not(target_family = "unix"))]
        {
            false
        }
    }
}

/// Probe the process limits relevant to real-time operation.
#[cfg(target_os = "linux")]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    // SAFETY: geteuid has no preconditions.
    let mut caps = RtCapabilities {
        is_root: unsafe { libc::geteuid() } == 0,
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes into the provided rlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }
    // SAFETY: as above.
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = std::fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps
}

/// Probe the process limits relevant to real-time operation.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Fail if the configured real-time features cannot be obtained.
///
/// A kernel without PREEMPT_RT only produces a warning.
///
/// # Errors
///
/// Returns [`PulseError::Config`] listing the missing privileges.
pub fn validate_rt_capabilities(config: &RealtimeConfig) -> PulseResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let caps = check_rt_capabilities();
    let mut issues = Vec::new();

    if !caps.preempt_rt {
        warn!("PREEMPT_RT kernel not detected, expect higher worst-case jitter");
    }

    if config.policy != SchedPolicy::Other && !caps.can_use_rt_scheduling() {
        issues.push(format!(
            "cannot use SCHED_{:?}: RLIMIT_RTPRIO={:?}, is_root={}",
            config.policy, caps.rtprio_limit, caps.is_root
        ));
    }

    if config.lock_memory && !caps.can_lock_memory() {
        issues.push(format!(
            "cannot lock memory: RLIMIT_MEMLOCK={:?}, is_root={}",
            caps.memlock_limit, caps.is_root
        ));
    }

    if issues.is_empty() {
        info!("Real-time capabilities validated");
        Ok(())
    } else {
        let message = format!(
            "real-time requirements not met (fail_fast=true):\n  - {}",
            issues.join("\n  - ")
        );
        error!("{}", message);
        Err(PulseError::Config(message))
    }
}
