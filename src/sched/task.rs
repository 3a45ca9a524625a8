//! Task control block
//!
//! A `Task` is the scheduler's view of a runnable thread: just enough state
//! (context, priority, time slice) to pick what runs next and to switch to
//! it. The richer `process::Thread`/`process::Process` objects are the
//! source of truth for everything else; the scheduler only keeps what it
//! needs to make scheduling decisions.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::string::String;

use super::{ProcessId, ThreadId};

/// Fixed priority levels, highest first. Matches `process::ProcessPriority`
/// one-to-one.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    RealTime = 4,
}

impl Priority {
    /// Number of distinct priority levels; also the size of the ready-queue
    /// array indexed by `self as usize`.
    pub const COUNT: usize = 5;

    /// Time slice, in timer ticks, granted at this priority.
    pub const fn time_slice(self) -> u32 {
        match self {
            Priority::Idle => 1,
            Priority::Low => 5,
            Priority::Normal => 10,
            Priority::High => 15,
            Priority::RealTime => 20,
        }
    }

    pub const fn from_process_priority(p: crate::process::ProcessPriority) -> Self {
        use crate::process::ProcessPriority;
        match p {
            ProcessPriority::Idle => Priority::Idle,
            ProcessPriority::Low => Priority::Low,
            ProcessPriority::Normal => Priority::Normal,
            ProcessPriority::System => Priority::High,
            ProcessPriority::RealTime => Priority::RealTime,
        }
    }
}

/// Scheduling class. The kernel has a single scheduling policy (fixed
/// priority, FIFO within a level); this exists only to distinguish the
/// synthetic idle task from ordinary tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    Normal,
    Idle,
}

/// Task lifecycle state, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    /// Sleeping until `wake_tick`.
    Sleeping,
    Dead,
}

/// Saved register state.
#[derive(Debug)]
pub enum TaskContext {
    X86_64(crate::arch::x86_64::context::X86_64Context),
}

impl TaskContext {
    pub fn new(entry_point: usize, stack_base: usize) -> Self {
        TaskContext::X86_64(crate::arch::x86_64::context::X86_64Context::new(
            entry_point,
            stack_base,
        ))
    }
}

/// Task Control Block.
pub struct Task {
    pub pid: ProcessId,
    pub tid: ThreadId,
    #[cfg(feature = "alloc")]
    pub name: String,
    pub state: TaskState,
    pub priority: Priority,
    pub sched_class: SchedClass,
    pub time_slice: u32,
    pub context: TaskContext,
    pub kernel_stack: usize,
    pub page_table: usize,
    /// Tick at which a `Sleeping` task should become `Ready` again.
    pub wake_tick: u64,
}

impl Task {
    #[cfg(feature = "alloc")]
    pub fn new(
        pid: ProcessId,
        tid: ThreadId,
        name: String,
        priority: Priority,
        entry_point: usize,
        stack_base: usize,
        kernel_stack: usize,
        page_table: usize,
    ) -> Self {
        Self {
            pid,
            tid,
            name,
            state: TaskState::Ready,
            priority,
            sched_class: SchedClass::Normal,
            time_slice: priority.time_slice(),
            context: TaskContext::new(entry_point, stack_base),
            kernel_stack,
            page_table,
            wake_tick: 0,
        }
    }
}
