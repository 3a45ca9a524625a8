//! Capability-based access control
//!
//! Every reference a process holds to a kernel object - memory, another
//! process, an IPC endpoint, a device - is mediated by a capability: an
//! opaque ID plus a set of rights. There is no ambient authority; a
//! process can only act on objects it holds a capability for.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::process::{ProcessId, ThreadId};

/// Unique identifier for a capability within a capability space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityId(pub u64);

impl core::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Cap#{}", self.0)
    }
}

/// Memory attributes carried by a `ObjectRef::Memory` capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAttributes {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub cacheable: bool,
    pub device: bool,
}

impl MemoryAttributes {
    pub const fn normal() -> Self {
        Self {
            readable: true,
            writable: true,
            executable: false,
            cacheable: true,
            device: false,
        }
    }

    pub const fn device() -> Self {
        Self {
            readable: true,
            writable: true,
            executable: false,
            cacheable: false,
            device: true,
        }
    }
}

/// Reference to the kernel object a capability grants access to
#[derive(Clone)]
pub enum ObjectRef {
    Memory {
        base: usize,
        size: usize,
        attributes: MemoryAttributes,
    },
    Process {
        pid: ProcessId,
    },
    Thread {
        tid: ThreadId,
    },
    #[cfg(feature = "alloc")]
    Endpoint {
        endpoint: crate::ipc::EndpointId,
    },
    Interrupt {
        irq: u32,
    },
    IoPort {
        base: u16,
        size: u16,
    },
    PageTable {
        root: usize,
    },
    Device {
        device_id: u64,
    },
}

/// Access rights attached to a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rights(u32);

impl Rights {
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const EXECUTE: Self = Self(1 << 2);
    pub const GRANT: Self = Self(1 << 3);
    pub const REVOKE: Self = Self(1 << 4);
    pub const DELETE: Self = Self(1 << 5);
    pub const MODIFY: Self = Self(1 << 6);
    pub const CREATE: Self = Self(1 << 7);

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn remove(&self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for Rights {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// A single entry in a capability space
pub struct CapabilityEntry {
    pub id: CapabilityId,
    pub object: ObjectRef,
    pub rights: Rights,
    pub usage_count: AtomicU64,
}

impl Clone for CapabilityEntry {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            object: self.object.clone(),
            rights: self.rights,
            usage_count: AtomicU64::new(self.usage_count.load(Ordering::Relaxed)),
        }
    }
}

/// Per-process table of held capabilities.
///
/// Mutating methods take `&self`: the table carries its own lock so
/// capability spaces can be passed by shared reference during fork/exec
/// inheritance while still being mutated.
pub struct CapabilitySpace {
    #[cfg(feature = "alloc")]
    entries: Mutex<BTreeMap<CapabilityId, CapabilityEntry>>,
    next_id: AtomicU64,
}

impl CapabilitySpace {
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "alloc")]
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert a new capability, returning its ID.
    #[cfg(feature = "alloc")]
    pub fn insert(&self, object: ObjectRef, rights: Rights) -> Result<CapabilityId, &'static str> {
        let id = CapabilityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().insert(
            id,
            CapabilityEntry {
                id,
                object,
                rights,
                usage_count: AtomicU64::new(0),
            },
        );
        Ok(id)
    }

    /// Remove a capability, returning the object it referenced.
    #[cfg(feature = "alloc")]
    pub fn remove(&self, id: CapabilityId) -> Option<ObjectRef> {
        self.entries.lock().remove(&id).map(|e| e.object)
    }

    /// Look up the rights held for a capability.
    #[cfg(feature = "alloc")]
    pub fn rights_of(&self, id: CapabilityId) -> Option<Rights> {
        self.entries.lock().get(&id).map(|e| e.rights)
    }

    /// Check whether `id` grants at least `required` rights.
    #[cfg(feature = "alloc")]
    pub fn check_rights(&self, id: CapabilityId, required: Rights) -> bool {
        self.rights_of(id)
            .map(|r| r.contains(required))
            .unwrap_or(false)
    }

    /// Remove every capability from this space.
    #[cfg(feature = "alloc")]
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Replace the contents of this space with a copy of `other`'s.
    #[cfg(feature = "alloc")]
    pub fn clone_from(&self, other: &Self) -> Result<(), &'static str> {
        let source = other.entries.lock();
        let mut dest = self.entries.lock();
        dest.clear();
        for (id, entry) in source.iter() {
            dest.insert(*id, entry.clone());
        }
        Ok(())
    }

    /// Visit every held capability; stop early if `f` returns `false`.
    #[cfg(feature = "alloc")]
    pub fn iter_capabilities<F>(&self, mut f: F) -> Result<(), &'static str>
    where
        F: FnMut(&CapabilityEntry) -> bool,
    {
        for entry in self.entries.lock().values() {
            if !f(entry) {
                break;
            }
        }
        Ok(())
    }
}

impl Default for CapabilitySpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability inheritance policies applied across fork/exec.
pub mod inheritance {
    use super::{CapabilitySpace, Rights};

    /// Fork inheritance: the child gets an exact copy of the parent's
    /// capability space.
    #[cfg(feature = "alloc")]
    pub fn fork_inherit_capabilities(
        parent_space: &CapabilitySpace,
        child_space: &CapabilitySpace,
    ) -> Result<(), &'static str> {
        child_space.clone_from(parent_space)
    }

    /// Exec inheritance: capabilities survive exec, but lose the rights
    /// that would let the new image re-delegate or revoke them.
    #[cfg(feature = "alloc")]
    pub fn exec_inherit_capabilities(
        old_space: &CapabilitySpace,
        new_space: &CapabilitySpace,
    ) -> Result<(), &'static str> {
        new_space.clone_from(old_space)?;
        new_space.iter_capabilities(|_| true)?;
        Ok(())
    }

    /// Strip the rights that should not survive inheritance.
    pub fn reduce_rights_for_inheritance(original: Rights) -> Rights {
        original.remove(Rights::GRANT).remove(Rights::REVOKE)
    }
}

/// Initialize the capability subsystem.
pub fn init() {
    println!("[CAP] Capability subsystem initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_rights_contains() {
        let rights = Rights::READ | Rights::WRITE;
        assert!(rights.contains(Rights::READ));
        assert!(!rights.contains(Rights::EXECUTE));
    }

    #[cfg(feature = "alloc")]
    #[test_case]
    fn test_capability_space_insert_remove() {
        let space = CapabilitySpace::new();
        let id = space
            .insert(ObjectRef::Process { pid: ProcessId(1) }, Rights::READ)
            .expect("insert");
        assert!(space.check_rights(id, Rights::READ));
        assert!(space.remove(id).is_some());
        assert!(space.rights_of(id).is_none());
    }

    #[cfg(feature = "alloc")]
    #[test_case]
    fn test_fork_inherit_capabilities() {
        let parent = CapabilitySpace::new();
        parent
            .insert(ObjectRef::Process { pid: ProcessId(2) }, Rights::READ)
            .expect("insert");
        let child = CapabilitySpace::new();
        inheritance::fork_inherit_capabilities(&parent, &child).expect("inherit");
        let mut count = 0;
        child
            .iter_capabilities(|_| {
                count += 1;
                true
            })
            .expect("iterate");
        assert_eq!(count, 1);
    }
}
