//! Process Control Block (PCB) implementation
//!
//! The PCB is the core data structure representing a process in the kernel.
//! It contains all the information needed to manage a process.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::{collections::BTreeMap, string::String, vec::Vec};

use spin::Mutex;

use crate::{error::KernelError, mm::VirtualAddressSpace};

use super::{
    thread::{Thread, ThreadId},
    ProcessState,
};

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is being created
    Creating = 0,
    /// Process is ready to run
    Ready = 1,
    /// Process is currently running
    Running = 2,
    /// Process is blocked waiting
    Blocked = 3,
    /// Process is sleeping
    Sleeping = 4,
    /// Process has exited but not yet reaped
    Zombie = 5,
    /// Process has been terminated
    Dead = 6,
}

/// Process priority
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessPriority {
    /// Real-time priority (highest)
    RealTime = 0,
    /// System priority
    System = 1,
    /// Normal user priority
    Normal = 2,
    /// Low priority
    Low = 3,
    /// Idle priority (lowest)
    Idle = 4,
}

pub use crate::security::perms::OwnerType;

/// Signal handler table slot values: 0 means "default action", 1 means
/// "ignored", anything else is a user-space handler address.
const SIG_DEFAULT: usize = 0;
const MAX_SIGNAL: usize = 32;

/// Process Control Block
pub struct Process {
    /// Process ID
    pub pid: ProcessId,

    /// Parent process ID (None for init)
    pub parent: Option<ProcessId>,

    /// Process name
    #[cfg(feature = "alloc")]
    pub name: String,

    /// Process state
    pub state: AtomicU32,

    /// Priority
    pub priority: Mutex<ProcessPriority>,

    /// Virtual address space
    pub memory_space: Mutex<VirtualAddressSpace>,

    /// Open file descriptor table
    #[cfg(feature = "alloc")]
    pub file_table: Mutex<crate::fs::FileTable>,

    /// Environment variables (`exec`'s envp, kept for kernel-side lookups
    /// such as PATH search)
    #[cfg(feature = "alloc")]
    pub env_vars: Mutex<BTreeMap<String, String>>,

    /// Threads in this process
    #[cfg(feature = "alloc")]
    pub threads: Mutex<BTreeMap<ThreadId, Thread>>,

    /// Child processes
    #[cfg(feature = "alloc")]
    pub children: Mutex<Vec<ProcessId>>,

    /// Exit code (set when process exits)
    pub exit_code: AtomicU32,

    /// CPU time used (in microseconds)
    pub cpu_time: AtomicU64,

    /// Memory usage statistics
    pub memory_stats: MemoryStats,

    /// Creation timestamp
    pub created_at: u64,

    /// User ID
    pub uid: u32,

    /// Group ID
    pub gid: u32,

    /// Process group ID (defaults to own pid)
    pub pgid: AtomicU64,

    /// Session ID (defaults to own pid)
    pub sid: AtomicU64,

    /// Privilege tier used by the file-permission decision table
    pub owner_type: OwnerType,

    /// Per-process resource cage. `Mutex` so `sandbox_apply`-style syscalls
    /// can swap in a whole new `Sandbox`, not just tweak counters.
    #[cfg(feature = "alloc")]
    pub sandbox: Mutex<crate::security::perms::Sandbox>,

    /// Capabilities this process holds, mediating access to every object
    /// it did not create for itself.
    #[cfg(feature = "alloc")]
    pub capability_space: Mutex<crate::cap::CapabilitySpace>,

    /// Bitmap of pending (queued, undelivered) signals, bit N = signal N
    pending_signals: AtomicU64,

    /// Per-signal handler table: 0 = default, 1 = ignore, else handler addr
    #[cfg(feature = "alloc")]
    signal_handlers: Mutex<[usize; MAX_SIGNAL]>,
}

/// Memory usage statistics
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// Virtual memory size (bytes)
    pub virtual_size: AtomicU64,
    /// Resident set size (bytes)
    pub resident_size: AtomicU64,
    /// Shared memory size (bytes)
    pub shared_size: AtomicU64,
}

impl Process {
    /// Create a new process
    #[cfg(feature = "alloc")]
    pub fn new(
        pid: ProcessId,
        parent: Option<ProcessId>,
        name: String,
        priority: ProcessPriority,
    ) -> Self {
        Self {
            pid,
            parent,
            name,
            state: AtomicU32::new(ProcessState::Creating as u32),
            priority: Mutex::new(priority),
            memory_space: Mutex::new(VirtualAddressSpace::new()),
            file_table: Mutex::new(crate::fs::FileTable::new()),
            env_vars: Mutex::new(BTreeMap::new()),
            threads: Mutex::new(BTreeMap::new()),
            children: Mutex::new(Vec::new()),
            exit_code: AtomicU32::new(0),
            cpu_time: AtomicU64::new(0),
            memory_stats: MemoryStats::default(),
            created_at: crate::arch::timer::get_ticks(),
            uid: 0,
            gid: 0,
            pgid: AtomicU64::new(pid.0),
            sid: AtomicU64::new(pid.0),
            owner_type: OwnerType::Usr,
            sandbox: Mutex::new(crate::security::perms::Sandbox::light()),
            capability_space: Mutex::new(crate::cap::CapabilitySpace::new()),
            pending_signals: AtomicU64::new(0),
            signal_handlers: Mutex::new([SIG_DEFAULT; MAX_SIGNAL]),
        }
    }

    /// Get process state
    pub fn get_state(&self) -> ProcessState {
        match self.state.load(Ordering::Acquire) {
            0 => ProcessState::Creating,
            1 => ProcessState::Ready,
            2 => ProcessState::Running,
            3 => ProcessState::Blocked,
            4 => ProcessState::Sleeping,
            5 => ProcessState::Zombie,
            6 => ProcessState::Dead,
            _ => ProcessState::Dead,
        }
    }

    /// Set process state
    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Add a thread to this process
    #[cfg(feature = "alloc")]
    pub fn add_thread(&self, thread: Thread) -> Result<(), &'static str> {
        let tid = thread.tid;
        let mut threads = self.threads.lock();

        if threads.len() >= super::MAX_THREADS_PER_PROCESS {
            return Err("Too many threads in process");
        }

        if threads.contains_key(&tid) {
            return Err("Thread ID already exists");
        }

        threads.insert(tid, thread);
        Ok(())
    }

    /// Remove a thread from this process
    #[cfg(feature = "alloc")]
    pub fn remove_thread(&self, tid: ThreadId) -> Option<Thread> {
        self.threads.lock().remove(&tid)
    }

    /// Get a thread by ID
    #[cfg(feature = "alloc")]
    pub fn get_thread(&self, tid: ThreadId) -> Option<&Thread> {
        // SAFETY: threads are never removed from the map while a reference
        // obtained here is live in practice (single-CPU kernel, no
        // preemption inside a syscall handler); the returned reference
        // borrows from the map's stable heap allocation, not the guard.
        unsafe {
            let threads = self.threads.lock();
            threads.get(&tid).map(|t| &*(t as *const Thread))
        }
    }

    /// Get number of threads
    #[cfg(feature = "alloc")]
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Check if process is alive
    pub fn is_alive(&self) -> bool {
        !matches!(self.get_state(), ProcessState::Dead | ProcessState::Zombie)
    }

    /// Update CPU time
    pub fn add_cpu_time(&self, microseconds: u64) {
        self.cpu_time.fetch_add(microseconds, Ordering::Relaxed);
    }

    /// Get total CPU time
    pub fn get_cpu_time(&self) -> u64 {
        self.cpu_time.load(Ordering::Relaxed)
    }

    /// Set exit code
    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code as u32, Ordering::Release);
    }

    /// Get exit code
    pub fn get_exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire) as i32
    }

    /// Process group ID
    pub fn get_pgid(&self) -> u64 {
        self.pgid.load(Ordering::Relaxed)
    }

    pub fn set_pgid(&self, pgid: u64) {
        self.pgid.store(pgid, Ordering::Relaxed);
    }

    /// Session ID
    pub fn get_sid(&self) -> u64 {
        self.sid.load(Ordering::Relaxed)
    }

    pub fn set_sid(&self, sid: u64) {
        self.sid.store(sid, Ordering::Relaxed);
    }

    /// Queue `signum` for delivery. Rejects out-of-range signal numbers.
    pub fn send_signal(&self, signum: usize) -> Result<(), KernelError> {
        if signum >= MAX_SIGNAL {
            return Err(KernelError::InvalidArgument {
                name: "signum",
                value: "out of range",
            });
        }
        self.pending_signals
            .fetch_or(1u64 << signum, Ordering::Release);
        Ok(())
    }

    /// Lowest-numbered pending signal, if any.
    pub fn get_next_pending_signal(&self) -> Option<usize> {
        let bits = self.pending_signals.load(Ordering::Acquire);
        if bits == 0 {
            None
        } else {
            Some(bits.trailing_zeros() as usize)
        }
    }

    pub fn clear_pending_signal(&self, signum: usize) {
        if signum < MAX_SIGNAL {
            self.pending_signals
                .fetch_and(!(1u64 << signum), Ordering::Release);
        }
    }

    /// Registered handler address for `signum`, or `None` if out of range.
    /// `Some(0)` means default action, `Some(1)` means ignored.
    #[cfg(feature = "alloc")]
    pub fn get_signal_handler(&self, signum: usize) -> Option<usize> {
        if signum >= MAX_SIGNAL {
            return None;
        }
        Some(self.signal_handlers.lock()[signum])
    }

    #[cfg(feature = "alloc")]
    pub fn set_signal_handler(&self, signum: usize, handler: usize) -> Result<(), KernelError> {
        if signum >= MAX_SIGNAL {
            return Err(KernelError::InvalidArgument {
                name: "signum",
                value: "out of range",
            });
        }
        self.signal_handlers.lock()[signum] = handler;
        Ok(())
    }

    /// Reset every signal handler to the default action. Called on exec.
    #[cfg(feature = "alloc")]
    pub fn reset_signal_handlers(&self) {
        let mut handlers = self.signal_handlers.lock();
        for slot in handlers.iter_mut() {
            *slot = SIG_DEFAULT;
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        println!("[PROCESS] Dropping process {}", self.pid.0);
        // Cleanup will be handled by the process lifecycle manager
    }
}

/// Process builder for convenient process creation
#[cfg(feature = "alloc")]
pub struct ProcessBuilder {
    name: String,
    parent: Option<ProcessId>,
    priority: ProcessPriority,
    uid: u32,
    gid: u32,
    owner_type: OwnerType,
}

#[cfg(feature = "alloc")]
impl ProcessBuilder {
    /// Create a new process builder
    pub fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            priority: ProcessPriority::Normal,
            uid: 0,
            gid: 0,
            owner_type: OwnerType::Usr,
        }
    }

    /// Set parent process
    pub fn parent(mut self, pid: ProcessId) -> Self {
        self.parent = Some(pid);
        self
    }

    /// Set priority
    pub fn priority(mut self, priority: ProcessPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set user ID
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    /// Set group ID
    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    /// Set owner type (privilege tier for file-permission checks)
    pub fn owner_type(mut self, owner_type: OwnerType) -> Self {
        self.owner_type = owner_type;
        self
    }

    /// Build the process
    pub fn build(self) -> Process {
        let pid = super::alloc_pid();
        let mut process = Process::new(pid, self.parent, self.name, self.priority);
        process.uid = self.uid;
        process.gid = self.gid;
        process.owner_type = self.owner_type;
        process
    }
}
