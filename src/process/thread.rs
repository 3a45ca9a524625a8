//! Thread control block
//!
//! A process always has at least one thread (the "main" thread created
//! alongside the process); true multithreading is out of scope, but the
//! process/thread split is kept because the context-switch and stack
//! bookkeeping naturally lives at thread granularity.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::string::String;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

#[allow(unused_imports)]
use crate::arch::context::{ArchThreadContext, ThreadContext};
use crate::error::KernelError;

use super::pcb::ProcessPriority;
use super::ProcessId;

/// Thread ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh, globally unique thread ID
pub fn alloc_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

/// Thread lifecycle state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Sleeping = 3,
    Zombie = 4,
    Dead = 5,
}

/// A contiguous stack region, physically backed, described by its
/// virtual-address range inside the owning process's address space.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadStack {
    pub base: usize,
    pub size: usize,
}

/// Thread-local-storage area, if one was set up for this thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tls {
    pub base: usize,
    pub size: usize,
}

/// Thread Control Block
pub struct Thread {
    pub tid: ThreadId,
    pub pid: ProcessId,
    #[cfg(feature = "alloc")]
    pub name: String,
    state: AtomicU32,
    pub priority: ProcessPriority,
    pub context: Mutex<ArchThreadContext>,
    pub user_stack: ThreadStack,
    pub kernel_stack: ThreadStack,
    pub tls: Mutex<Tls>,
    cpu_affinity: AtomicU64,
    pub time_slice: AtomicU32,
    pub exit_code: AtomicU32,
}

impl Thread {
    pub fn get_state(&self) -> ThreadState {
        match self.state.load(Ordering::Acquire) {
            0 => ThreadState::Ready,
            1 => ThreadState::Running,
            2 => ThreadState::Blocked,
            3 => ThreadState::Sleeping,
            4 => ThreadState::Zombie,
            _ => ThreadState::Dead,
        }
    }

    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// CPU affinity mask (bit N = CPU N). Single-CPU kernel: always bit 0.
    pub fn get_affinity(&self) -> u64 {
        self.cpu_affinity.load(Ordering::Relaxed)
    }

    pub fn set_affinity(&self, mask: u64) {
        self.cpu_affinity.store(mask, Ordering::Relaxed);
    }
}

/// Builds a `Thread`, allocating and wiring up its stacks.
#[cfg(feature = "alloc")]
pub struct ThreadBuilder {
    pid: ProcessId,
    name: String,
    entry_point: usize,
    user_stack_size: usize,
    kernel_stack_size: usize,
    priority: ProcessPriority,
    cpu_affinity: u64,
}

#[cfg(feature = "alloc")]
impl ThreadBuilder {
    pub fn new(pid: ProcessId, name: String, entry_point: usize) -> Self {
        Self {
            pid,
            name,
            entry_point,
            user_stack_size: super::creation::DEFAULT_USER_STACK_SIZE,
            kernel_stack_size: super::creation::DEFAULT_KERNEL_STACK_SIZE,
            priority: ProcessPriority::Normal,
            cpu_affinity: 1,
        }
    }

    pub fn user_stack_size(mut self, size: usize) -> Self {
        self.user_stack_size = size;
        self
    }

    pub fn kernel_stack_size(mut self, size: usize) -> Self {
        self.kernel_stack_size = size;
        self
    }

    pub fn priority(mut self, priority: ProcessPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn cpu_affinity(mut self, mask: u64) -> Self {
        self.cpu_affinity = mask;
        self
    }

    /// Allocate the thread's kernel stack physically (kernel stacks live in
    /// the direct-mapped physical window, not a per-process VAS mapping) and
    /// reserve a virtual range for the user stack. The caller is responsible
    /// for mapping the user stack's pages into the owning process's VAS --
    /// `ThreadBuilder` only picks frames and an address, it does not touch
    /// page tables.
    pub fn build(self) -> Result<Thread, KernelError> {
        let tid = alloc_tid();

        let kernel_pages = self.kernel_stack_size.div_ceil(crate::mm::PAGE_SIZE);
        let frame = crate::mm::FRAME_ALLOCATOR
            .lock()
            .allocate_frames(kernel_pages, None)
            .map_err(|_| KernelError::OutOfMemory {
                requested: self.kernel_stack_size as u64,
                available: 0,
            })?;
        let kernel_phys = frame.as_addr().as_u64();
        let kernel_base = crate::mm::phys_to_virt_addr(kernel_phys) as usize;

        let user_base = super::memory::layout::STACK_END - self.user_stack_size;

        let context = crate::arch::x86_64::context::X86_64Context::new_user(
            self.entry_point,
            user_base + self.user_stack_size,
        );

        Ok(Thread {
            tid,
            pid: self.pid,
            name: self.name,
            state: AtomicU32::new(ThreadState::Ready as u32),
            priority: self.priority,
            context: Mutex::new(context),
            user_stack: ThreadStack {
                base: user_base,
                size: self.user_stack_size,
            },
            kernel_stack: ThreadStack {
                base: kernel_base,
                size: self.kernel_stack_size,
            },
            tls: Mutex::new(Tls::default()),
            cpu_affinity: AtomicU64::new(self.cpu_affinity),
            time_slice: AtomicU32::new(crate::sched::time_slice_for(self.priority)),
            exit_code: AtomicU32::new(0),
        })
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;

    #[test]
    fn tids_are_unique() {
        let a = alloc_tid();
        let b = alloc_tid();
        assert_ne!(a, b);
    }

    #[test]
    fn thread_state_roundtrip() {
        let state = AtomicU32::new(ThreadState::Ready as u32);
        state.store(ThreadState::Running as u32, Ordering::Release);
        assert_eq!(state.load(Ordering::Acquire), ThreadState::Running as u32);
    }
}
