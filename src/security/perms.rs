//! File permission checks and per-process sandboxing
//!
//! Every filesystem node carries a permission descriptor (owner id, owner
//! type, and two access-bit masks). `check` evaluates a request against a
//! descriptor following a fixed, top-to-bottom decision table -- privileged
//! owner types short-circuit, everyone else falls through to the owner/other
//! bit masks. `Sandbox` layers quantitative resource limits on top, consulted
//! separately from the access-bit check.

use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::error::KernelError;
use crate::process::ProcessId;

/// Privilege tier of the entity making a request (or owning a file).
/// Ordered by privilege, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OwnerType {
    System = 0,
    Root = 1,
    Admin = 2,
    Prgms = 3,
    Usr = 4,
    Basic = 5,
}

bitflags! {
    /// Per-file access bits. Distinct from `fs::Permissions` (Unix rwx);
    /// this is the richer VIEW/MODIFY/RUN/DELETE/OWNER/SYSTEM/HIDDEN/LOCK
    /// model consulted by `check`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessBits: u8 {
        const VIEW   = 1 << 0;
        const MODIFY = 1 << 1;
        const RUN    = 1 << 2;
        const DELETE = 1 << 3;
        const OWNER  = 1 << 4;
        const SYSTEM = 1 << 5;
        const HIDDEN = 1 << 6;
        const LOCK   = 1 << 7;
    }
}

/// What kind of access is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    View,
    Modify,
    Run,
    Delete,
    /// Requester asserts ownership (used by chown/chmod-style calls).
    Own,
}

/// Full permission descriptor attached to a filesystem node.
#[derive(Debug, Clone, Copy)]
pub struct FileAccess {
    pub owner_id: u32,
    pub owner_type: OwnerType,
    pub owner_bits: AccessBits,
    pub other_bits: AccessBits,
    pub flags: AccessBits,
}

impl FileAccess {
    /// Default descriptor for an ordinary user file: owner gets full
    /// access, everyone else gets nothing.
    pub fn new_default(owner_id: u32, owner_type: OwnerType) -> Self {
        Self {
            owner_id,
            owner_type,
            owner_bits: AccessBits::VIEW | AccessBits::MODIFY | AccessBits::RUN | AccessBits::DELETE,
            other_bits: AccessBits::empty(),
            flags: AccessBits::empty(),
        }
    }

    /// Default descriptor for a SYSTEM file: owner full access, others
    /// VIEW-only, SYSTEM flag set.
    pub fn new_system(owner_id: u32) -> Self {
        Self {
            owner_id,
            owner_type: OwnerType::System,
            owner_bits: AccessBits::VIEW | AccessBits::MODIFY | AccessBits::RUN | AccessBits::DELETE,
            other_bits: AccessBits::VIEW,
            flags: AccessBits::SYSTEM,
        }
    }

    /// Default descriptor for a BASIC file: broad access for everyone.
    pub fn new_basic(owner_id: u32, owner_type: OwnerType) -> Self {
        Self {
            owner_id,
            owner_type,
            owner_bits: AccessBits::VIEW | AccessBits::MODIFY | AccessBits::RUN,
            other_bits: AccessBits::VIEW | AccessBits::MODIFY | AccessBits::RUN,
            flags: AccessBits::empty(),
        }
    }

    fn is_owner(&self, requester_id: u32, requester_type: OwnerType) -> bool {
        requester_id == self.owner_id && requester_type == self.owner_type
    }

    fn required_bit(kind: CheckKind) -> AccessBits {
        match kind {
            CheckKind::View => AccessBits::VIEW,
            CheckKind::Modify => AccessBits::MODIFY,
            CheckKind::Run => AccessBits::RUN,
            CheckKind::Delete => AccessBits::DELETE,
            CheckKind::Own => AccessBits::empty(), // handled specially below
        }
    }
}

/// Evaluate whether `requester` may perform `kind` on the file described by
/// `descriptor`. Mirrors the owner-type/SYSTEM-flag decision table, then
/// falls through to an owner/other bit check, with `LOCK` restricting
/// everyone but privileged owner types to VIEW only.
pub fn check(
    descriptor: &FileAccess,
    requester_id: u32,
    requester_type: OwnerType,
    kind: CheckKind,
) -> bool {
    let target_is_system = descriptor.flags.contains(AccessBits::SYSTEM);
    let is_owner = descriptor.is_owner(requester_id, requester_type);

    // Decision table, evaluated top-to-bottom.
    match requester_type {
        OwnerType::System => return true,
        OwnerType::Root => {
            if target_is_system {
                return is_owner || kind == CheckKind::View;
            }
            return true;
        }
        OwnerType::Admin => {
            if target_is_system {
                return kind == CheckKind::View;
            }
            if matches!(descriptor.owner_type, OwnerType::Usr | OwnerType::Prgms) {
                return true;
            }
            // fall through to bit check
        }
        _ => {
            // fall through to bit check
        }
    }

    if kind == CheckKind::Own {
        return is_owner;
    }

    if descriptor.flags.contains(AccessBits::LOCK) && kind != CheckKind::View {
        return false;
    }

    let bits = if is_owner {
        descriptor.owner_bits
    } else {
        descriptor.other_bits
    };
    bits.contains(FileAccess::required_bit(kind))
}

/// Resource cage applied to a process's sandbox. `None` means "inherit
/// whatever the parent had" at creation time; once set it never changes
/// implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cage {
    /// No sandboxing restriction beyond the default light cage.
    None,
    /// Minimal restriction: default for processes with no explicit sandbox.
    Light,
    /// Full restriction: every budget is enforced strictly.
    Strict,
}

/// Per-process quantitative resource limits. A limit of zero means
/// unlimited. Once `immutable` is set, no field may be changed again.
pub struct Sandbox {
    pub cage: Cage,
    immutable: core::sync::atomic::AtomicBool,
    max_memory: AtomicU64,
    max_files: AtomicU64,
    max_processes: AtomicU64,
    max_cpu_time_ms: AtomicU64,
    used_memory: AtomicU64,
    used_files: AtomicU64,
    used_processes: AtomicU64,
    used_cpu_time_ms: AtomicU64,
}

impl Sandbox {
    pub const fn light() -> Self {
        Self {
            cage: Cage::Light,
            immutable: core::sync::atomic::AtomicBool::new(false),
            max_memory: AtomicU64::new(0),
            max_files: AtomicU64::new(0),
            max_processes: AtomicU64::new(0),
            max_cpu_time_ms: AtomicU64::new(0),
            used_memory: AtomicU64::new(0),
            used_files: AtomicU64::new(0),
            used_processes: AtomicU64::new(0),
            used_cpu_time_ms: AtomicU64::new(0),
        }
    }

    pub fn with_limits(max_memory: u64, max_files: u64, max_processes: u64, max_cpu_time_ms: u64) -> Self {
        Self {
            cage: Cage::Strict,
            immutable: core::sync::atomic::AtomicBool::new(false),
            max_memory: AtomicU64::new(max_memory),
            max_files: AtomicU64::new(max_files),
            max_processes: AtomicU64::new(max_processes),
            max_cpu_time_ms: AtomicU64::new(max_cpu_time_ms),
            used_memory: AtomicU64::new(0),
            used_files: AtomicU64::new(0),
            used_processes: AtomicU64::new(0),
            used_cpu_time_ms: AtomicU64::new(0),
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable.load(Ordering::Acquire)
    }

    pub fn set_immutable(&self) {
        self.immutable.store(true, Ordering::Release);
    }

    /// A child inherits a copy of the parent's sandbox when the parent has
    /// a non-`None` cage, otherwise it gets a fresh `Light` sandbox.
    pub fn inherit(parent: &Sandbox) -> Self {
        if parent.cage == Cage::None {
            return Self::light();
        }
        Self {
            cage: parent.cage,
            immutable: core::sync::atomic::AtomicBool::new(false),
            max_memory: AtomicU64::new(parent.max_memory.load(Ordering::Relaxed)),
            max_files: AtomicU64::new(parent.max_files.load(Ordering::Relaxed)),
            max_processes: AtomicU64::new(parent.max_processes.load(Ordering::Relaxed)),
            max_cpu_time_ms: AtomicU64::new(parent.max_cpu_time_ms.load(Ordering::Relaxed)),
            used_memory: AtomicU64::new(0),
            used_files: AtomicU64::new(0),
            used_processes: AtomicU64::new(0),
            used_cpu_time_ms: AtomicU64::new(0),
        }
    }

    fn check_budget(limit: &AtomicU64, used: &AtomicU64, increment: u64) -> bool {
        let limit = limit.load(Ordering::Relaxed);
        if limit == 0 {
            return true; // zero means unlimited
        }
        used.load(Ordering::Relaxed) + increment <= limit
    }

    pub fn check_memory(&self, increment: u64) -> bool {
        Self::check_budget(&self.max_memory, &self.used_memory, increment)
    }

    pub fn check_files(&self, increment: u64) -> bool {
        Self::check_budget(&self.max_files, &self.used_files, increment)
    }

    pub fn check_processes(&self, increment: u64) -> bool {
        Self::check_budget(&self.max_processes, &self.used_processes, increment)
    }

    pub fn check_cpu_time(&self, increment_ms: u64) -> bool {
        Self::check_budget(&self.max_cpu_time_ms, &self.used_cpu_time_ms, increment_ms)
    }

    pub fn add_memory(&self, amount: u64) {
        self.used_memory.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn add_files(&self, amount: u64) {
        self.used_files.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn add_processes(&self, amount: u64) {
        self.used_processes.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn add_cpu_time(&self, amount_ms: u64) {
        self.used_cpu_time_ms.fetch_add(amount_ms, Ordering::Relaxed);
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::light()
    }
}

/// Whether `caller` may apply a sandbox to `target`: caller must be
/// SYSTEM/ROOT, or `target` must be the caller itself or a direct child,
/// and `target`'s current sandbox must not be immutable.
pub fn can_apply_sandbox(
    caller_type: OwnerType,
    caller_pid: ProcessId,
    target_pid: ProcessId,
    target_parent: Option<ProcessId>,
    target_sandbox_immutable: bool,
) -> Result<(), KernelError> {
    if target_sandbox_immutable {
        return Err(KernelError::PermissionDenied {
            operation: "sandbox_apply: target is immutable",
        });
    }

    let privileged = matches!(caller_type, OwnerType::System | OwnerType::Root);
    let is_self = caller_pid == target_pid;
    let is_direct_child = target_parent == Some(caller_pid);

    if privileged || is_self || is_direct_child {
        Ok(())
    } else {
        Err(KernelError::PermissionDenied {
            operation: "sandbox_apply: requires SYSTEM/ROOT, self, or direct child",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_requester_always_allowed() {
        let descriptor = FileAccess::new_system(0);
        assert!(check(&descriptor, 999, OwnerType::System, CheckKind::Modify));
    }

    #[test]
    fn root_on_system_file_without_ownership_is_view_only() {
        let descriptor = FileAccess::new_system(5);
        assert!(check(&descriptor, 1, OwnerType::Root, CheckKind::View));
        assert!(!check(&descriptor, 1, OwnerType::Root, CheckKind::Modify));
    }

    #[test]
    fn owner_bit_check_for_ordinary_user() {
        let descriptor = FileAccess {
            owner_id: 5,
            owner_type: OwnerType::Usr,
            owner_bits: AccessBits::VIEW | AccessBits::MODIFY,
            other_bits: AccessBits::VIEW,
            flags: AccessBits::empty(),
        };
        assert!(check(&descriptor, 5, OwnerType::Usr, CheckKind::Modify));
        assert!(!check(&descriptor, 6, OwnerType::Usr, CheckKind::Modify));
        assert!(check(&descriptor, 6, OwnerType::Usr, CheckKind::View));
    }

    #[test]
    fn permission_monotonicity_view_denies_implies_modify_denies() {
        let descriptor = FileAccess {
            owner_id: 5,
            owner_type: OwnerType::Usr,
            owner_bits: AccessBits::empty(),
            other_bits: AccessBits::empty(),
            flags: AccessBits::empty(),
        };
        assert!(!check(&descriptor, 5, OwnerType::Usr, CheckKind::View));
        assert!(!check(&descriptor, 5, OwnerType::Usr, CheckKind::Modify));
    }

    #[test]
    fn lock_flag_restricts_to_view() {
        let descriptor = FileAccess {
            owner_id: 5,
            owner_type: OwnerType::Usr,
            owner_bits: AccessBits::VIEW | AccessBits::MODIFY | AccessBits::DELETE,
            other_bits: AccessBits::empty(),
            flags: AccessBits::LOCK,
        };
        assert!(check(&descriptor, 5, OwnerType::Usr, CheckKind::View));
        assert!(!check(&descriptor, 5, OwnerType::Usr, CheckKind::Modify));
    }

    #[test]
    fn sandbox_zero_limit_is_unlimited() {
        let sandbox = Sandbox::light();
        assert!(sandbox.check_memory(u64::MAX / 2));
    }

    #[test]
    fn sandbox_budget_enforced() {
        let sandbox = Sandbox::with_limits(100, 0, 0, 0);
        assert!(sandbox.check_memory(100));
        assert!(!sandbox.check_memory(101));
        sandbox.add_memory(100);
        assert!(!sandbox.check_memory(1));
    }

    #[test]
    fn sandbox_immutable_after_set() {
        let sandbox = Sandbox::light();
        assert!(!sandbox.is_immutable());
        sandbox.set_immutable();
        assert!(sandbox.is_immutable());
    }
}
