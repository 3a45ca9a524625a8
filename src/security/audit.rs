//! Security audit trail
//!
//! Records a bounded ring of security-relevant events (process lifecycle,
//! permission denials) for later inspection. Not persisted to disk -- a
//! full audit subsystem would spool these through the VFS, but the ring
//! buffer is enough to diagnose a running kernel.

use crate::error::KernelError;

/// Maximum number of audit events retained
const MAX_AUDIT_EVENTS: usize = 256;

/// A single audit log entry
#[derive(Debug, Clone, Copy)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub pid: u64,
    pub a: u32,
    pub b: u32,
}

/// Kind of audited event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    ProcessCreate,
    ProcessExit,
    PermissionDenied,
}

static mut EVENTS: [Option<AuditEvent>; MAX_AUDIT_EVENTS] = [None; MAX_AUDIT_EVENTS];
static mut NEXT: usize = 0;
static mut COUNT: usize = 0;

fn push(event: AuditEvent) {
    // SAFETY: kernel audit log is only touched from kernel context under
    // the big-kernel-lock-style cooperative scheduling model; no
    // concurrent writers.
    unsafe {
        EVENTS[NEXT] = Some(event);
        NEXT = (NEXT + 1) % MAX_AUDIT_EVENTS;
        if COUNT < MAX_AUDIT_EVENTS {
            COUNT += 1;
        }
    }
}

/// Record a process creation event. `a`/`b` are caller-defined context
/// (e.g. parent uid/gid) and are opaque to the audit log itself.
pub fn log_process_create(pid: u64, a: u32, b: u32) {
    push(AuditEvent {
        kind: AuditEventKind::ProcessCreate,
        pid,
        a,
        b,
    });
}

/// Record a process exit event with its exit code.
pub fn log_process_exit(pid: u64, exit_code: i32) {
    push(AuditEvent {
        kind: AuditEventKind::ProcessExit,
        pid,
        a: exit_code as u32,
        b: 0,
    });
}

/// Record a permission-denied event.
pub fn log_permission_denied(pid: u64, resource: u32) {
    push(AuditEvent {
        kind: AuditEventKind::PermissionDenied,
        pid,
        a: resource,
        b: 0,
    });
}

/// Number of events currently retained
pub fn event_count() -> usize {
    unsafe { COUNT }
}

/// Initialize the audit subsystem
pub fn init() -> Result<(), KernelError> {
    println!("[SECURITY] Audit log ready ({} event capacity)", MAX_AUDIT_EVENTS);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_log_process_create() {
        let before = event_count();
        log_process_create(42, 0, 0);
        assert_eq!(event_count(), before + 1);
    }
}
