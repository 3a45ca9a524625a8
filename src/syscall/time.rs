//! Time management system calls
//!
//! Provides kernel-side implementation of time-related operations:
//! monotonic uptime queries and the blocking `sleep` syscall. All
//! operations delegate to the [`crate::timer`] subsystem.

use super::{SyscallError, SyscallResult};

/// Get monotonic uptime in milliseconds (SYS_TIME_GET_UPTIME = 100)
///
/// # Returns
/// Current uptime in milliseconds since boot.
pub fn sys_time_get_uptime() -> SyscallResult {
    Ok(crate::timer::get_uptime_ms() as usize)
}

/// Sleep the calling task for at least `ms` milliseconds (SYS_TIME_SLEEP = 101).
///
/// Implemented as a cooperative poll loop against the global uptime clock,
/// yielding the CPU to other ready tasks on every iteration -- the same
/// pattern used by the blocking socket operations. The task is guaranteed
/// to wake at or after `deadline`, never earlier.
pub fn sys_sleep(ms: usize) -> SyscallResult {
    let deadline = crate::timer::get_uptime_ms().saturating_add(ms as u64);
    while crate::timer::get_uptime_ms() < deadline {
        crate::sched::yield_cpu();
    }
    Ok(0)
}

#[allow(dead_code)]
fn _unused(_: SyscallError) {}
