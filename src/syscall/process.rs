//! Process system calls
//!
//! Implements the process-lifecycle portion of the syscall surface:
//! fork, execve, exit, waitpid, getpid/getppid, kill, plus the
//! setpriority/getpriority pair used by the shell's `nice`.

use super::{copy_c_string_from_user, SyscallError, SyscallResult};
use crate::process::wait::WaitOptions;
use crate::process::{
    current_process, exec_process, exit_thread, fork_process, wait_for_child, ProcessId,
    ProcessPriority,
};

/// Fork the current process.
///
/// Creates a child that is a duplicate of the caller (address space copy,
/// duplicated fd table, new PID). Returns the child's PID to the parent;
/// the child itself observes a return value of 0 (enforced by the saved
/// context the fork implementation clones).
pub fn sys_fork() -> SyscallResult {
    match fork_process() {
        Ok(child_pid) => Ok(child_pid.0 as usize),
        Err(_) => Err(SyscallError::OutOfMemory),
    }
}

/// Execute a new program image in the current process.
///
/// # Arguments
/// - path_ptr: pointer to a null-terminated path string
/// - argv_ptr / envp_ptr: reserved for argument/environment vectors; this
///   kernel does not yet marshal user-space argv/envp arrays across the
///   syscall boundary, so a new process always starts with an empty argv
///   and inherits no envp beyond what `execve` itself sets up.
pub fn sys_exec(path_ptr: usize, argv_ptr: usize, envp_ptr: usize) -> SyscallResult {
    if path_ptr == 0 {
        return Err(SyscallError::InvalidArgument);
    }

    let path_bytes = copy_c_string_from_user(path_ptr)?;
    let path = core::str::from_utf8(&path_bytes).map_err(|_| SyscallError::InvalidArgument)?;

    let argv: &[&str] = &[];
    let envp: &[&str] = &[];
    let _ = (argv_ptr, envp_ptr);

    match exec_process(path, argv, envp) {
        Ok(_) => unreachable!("exec_process does not return on success"),
        Err(_) => Err(SyscallError::ResourceNotFound),
    }
}

/// Exit the current process with the given status.
pub fn sys_exit(exit_code: usize) -> SyscallResult {
    exit_thread(exit_code as i32);
    unreachable!("exit_thread does not return");
}

/// Wait for a child to become a zombie, reaping it.
///
/// # Arguments
/// - pid: child to wait for, or -1 for any child
/// - status_ptr: user pointer to receive the exit status (may be 0)
pub fn sys_wait(pid: isize, status_ptr: usize, options: usize) -> SyscallResult {
    let wait_opts = WaitOptions::from_flags(options as u32);

    match wait_for_child(pid as i64, wait_opts) {
        Ok((child_pid, status)) => {
            if status_ptr != 0 {
                super::validate_user_buffer(status_ptr, core::mem::size_of::<i32>())?;
                // SAFETY: validated above to lie in user space and not wrap.
                unsafe {
                    *(status_ptr as *mut i32) = status.to_raw();
                }
            }
            Ok(child_pid.0 as usize)
        }
        Err(_) => Err(SyscallError::ResourceNotFound),
    }
}

/// Send a signal to a process. Schedulable targets are marked zombie with
/// exit status `128 + signal` and their parent is woken; this kernel does
/// not model non-schedulable service/driver targets at the syscall layer.
pub fn sys_kill(pid: usize, signal: usize) -> SyscallResult {
    if signal == 0 || signal > 31 {
        return Err(SyscallError::InvalidArgument);
    }
    let target = crate::process::table::get_process(ProcessId(pid as u64))
        .ok_or(SyscallError::ResourceNotFound)?;
    target
        .send_signal(signal)
        .map_err(|_| SyscallError::InvalidArgument)?;
    Ok(0)
}

/// Get the current process ID.
pub fn sys_getpid() -> SyscallResult {
    current_process()
        .map(|p| p.pid.0 as usize)
        .ok_or(SyscallError::ResourceNotFound)
}

/// Get the parent process ID (0 for the init process, which has none).
pub fn sys_getppid() -> SyscallResult {
    current_process()
        .map(|p| p.parent.map(|pp| pp.0).unwrap_or(0) as usize)
        .ok_or(SyscallError::ResourceNotFound)
}

/// Change a process's scheduling priority (`nice`-style, PRIO_PROCESS only).
pub fn sys_setpriority(which: usize, who: usize, priority: usize) -> SyscallResult {
    if which != 0 {
        return Err(SyscallError::InvalidArgument);
    }

    let pid = if who == 0 {
        current_process().ok_or(SyscallError::ResourceNotFound)?.pid
    } else {
        ProcessId(who as u64)
    };

    let new_priority = match priority {
        0..=39 => ProcessPriority::RealTime,
        40..=79 => ProcessPriority::System,
        80..=119 => ProcessPriority::Normal,
        120..=139 => ProcessPriority::Low,
        _ => ProcessPriority::Idle,
    };

    let process =
        crate::process::table::get_process(pid).ok_or(SyscallError::ResourceNotFound)?;
    *process.priority.lock() = new_priority;
    Ok(0)
}

/// Read back a process's scheduling priority.
pub fn sys_getpriority(which: usize, who: usize) -> SyscallResult {
    if which != 0 {
        return Err(SyscallError::InvalidArgument);
    }

    let pid = if who == 0 {
        current_process().ok_or(SyscallError::ResourceNotFound)?.pid
    } else {
        ProcessId(who as u64)
    };

    let process =
        crate::process::table::get_process(pid).ok_or(SyscallError::ResourceNotFound)?;
    Ok(*process.priority.lock() as usize)
}
