//! Scheduler
//!
//! Single-CPU, fixed-priority, FIFO-within-priority scheduler. Five
//! priority levels (`Idle`..`RealTime`), each with its own ready queue and
//! a fixed time slice; the scheduler always runs the head of the highest
//! non-empty queue. There is no SMP support and no dynamic priority
//! adjustment -- a task keeps the priority it was created with for its
//! entire life.

#![allow(dead_code)]

pub mod task;

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::collections::{BTreeMap, VecDeque};

use spin::Mutex;

pub use task::{Priority, SchedClass, Task};

use crate::println;
use crate::process::{ProcessId, ThreadId};

/// Key identifying a scheduled task.
type TaskKey = (u64, u64);

fn key(pid: ProcessId, tid: ThreadId) -> TaskKey {
    (pid.0, tid.0)
}

#[cfg(feature = "alloc")]
struct Scheduler {
    tasks: BTreeMap<TaskKey, Task>,
    ready: [VecDeque<TaskKey>; Priority::COUNT],
    current: Option<TaskKey>,
    ticks: u64,
    preempt_disable_depth: u32,
}

#[cfg(feature = "alloc")]
impl Scheduler {
    const fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            ready: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
            current: None,
            ticks: 0,
            preempt_disable_depth: 0,
        }
    }

    fn enqueue_ready(&mut self, k: TaskKey) {
        if let Some(task) = self.tasks.get(&k) {
            self.ready[task.priority as usize].push_back(k);
        }
    }

    /// Highest-to-lowest scan of the ready queues; pop the head of the
    /// first non-empty one.
    fn pick_next(&mut self) -> Option<TaskKey> {
        for level in (0..Priority::COUNT).rev() {
            if let Some(k) = self.ready[level].pop_front() {
                return Some(k);
            }
        }
        None
    }
}

#[cfg(feature = "alloc")]
static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// Single-CPU stub of the SMP topology interface other subsystems (e.g.
/// NUMA-aware frame allocation) query for "which CPU am I".
pub mod smp {
    pub fn current_cpu_id() -> u32 {
        0
    }
}

pub fn init() {
    println!("[SCHED] Initializing scheduler...");
}

/// Spawn a scheduler task for an already-created `Process`/`Thread` pair.
/// Reads the thread's current context and enqueues it at its configured
/// priority.
#[cfg(feature = "alloc")]
pub fn spawn(
    process: &crate::process::Process,
    thread: &crate::process::Thread,
) -> Result<(), crate::error::KernelError> {
    let ctx = thread.context.lock();
    let entry = ctx.get_instruction_pointer();
    let sp = ctx.get_stack_pointer();
    drop(ctx);

    let priority = Priority::from_process_priority(thread.priority);
    let page_table = process.memory_space.lock().get_page_table() as usize;

    let task = Task::new(
        process.pid,
        thread.tid,
        process.name.clone(),
        priority,
        entry,
        sp,
        thread.kernel_stack.base + thread.kernel_stack.size,
        page_table,
    );

    let k = key(process.pid, thread.tid);
    let mut sched = SCHEDULER.lock();
    sched.enqueue_ready(k);
    sched.tasks.insert(k, task);
    Ok(())
}

/// Time slice, in ticks, for a process priority level.
pub fn time_slice_for(priority: crate::process::ProcessPriority) -> u32 {
    Priority::from_process_priority(priority).time_slice()
}

/// Update the saved context of a task after `exec()` replaces its image.
#[cfg(feature = "alloc")]
pub fn update_task_context(
    pid: ProcessId,
    tid: ThreadId,
    entry_point: usize,
    stack_pointer: usize,
) {
    let mut sched = SCHEDULER.lock();
    if let Some(task) = sched.tasks.get_mut(&key(pid, tid)) {
        task.context = task::TaskContext::new(entry_point, stack_pointer);
    }
}

/// Remove a single task (one thread) from the scheduler entirely. Used by
/// per-thread cleanup once a thread has been reaped.
#[cfg(feature = "alloc")]
pub fn remove_task(pid: ProcessId, tid: ThreadId) -> Option<Task> {
    let mut sched = SCHEDULER.lock();
    let k = key(pid, tid);
    for level in 0..Priority::COUNT {
        sched.ready[level].retain(|&entry| entry != k);
    }
    if sched.current == Some(k) {
        sched.current = None;
    }
    sched.tasks.remove(&k)
}

/// Mark every task belonging to `pid` dead and drop them from the ready
/// queues. Used for force-termination (SIGKILL and friends), where
/// individual thread IDs are not tracked by the caller.
#[cfg(feature = "alloc")]
pub fn mark_process_dead(pid: ProcessId) {
    let mut sched = SCHEDULER.lock();
    let dead_keys: alloc::vec::Vec<TaskKey> = sched
        .tasks
        .iter()
        .filter(|(k, _)| k.0 == pid.0)
        .map(|(k, _)| *k)
        .collect();

    for k in &dead_keys {
        if let Some(task) = sched.tasks.get_mut(k) {
            task.state = task::TaskState::Dead;
        }
    }
    for level in 0..Priority::COUNT {
        sched.ready[level].retain(|k| k.0 != pid.0);
    }
    for k in dead_keys {
        if sched.current == Some(k) {
            sched.current = None;
        }
    }
}

/// Block every ready/running task belonging to `pid` (used by SIGSTOP and
/// wait()).
#[cfg(feature = "alloc")]
pub fn block_process(pid: ProcessId) {
    let mut sched = SCHEDULER.lock();
    for level in 0..Priority::COUNT {
        sched.ready[level].retain(|k| k.0 != pid.0);
    }
    let keys: alloc::vec::Vec<TaskKey> = sched
        .tasks
        .iter()
        .filter(|(k, _)| k.0 == pid.0)
        .map(|(k, _)| *k)
        .collect();
    for k in keys {
        if let Some(task) = sched.tasks.get_mut(&k) {
            task.state = task::TaskState::Blocked;
        }
    }
}

/// Move every blocked/sleeping task belonging to `pid` back onto its
/// priority's ready queue.
#[cfg(feature = "alloc")]
pub fn wake_up_process(pid: ProcessId) {
    let mut sched = SCHEDULER.lock();
    let keys: alloc::vec::Vec<TaskKey> = sched
        .tasks
        .iter()
        .filter(|(k, t)| {
            k.0 == pid.0 && matches!(t.state, task::TaskState::Blocked | task::TaskState::Sleeping)
        })
        .map(|(k, _)| *k)
        .collect();

    for k in keys {
        if let Some(task) = sched.tasks.get_mut(&k) {
            task.state = task::TaskState::Ready;
        }
        sched.enqueue_ready(k);
    }
}

/// Increment the preempt-disable depth: while non-zero, the timer tick
/// will not force a reschedule (explicit yield/sleep still work).
pub fn preempt_disable() {
    SCHEDULER.lock().preempt_disable_depth += 1;
}

pub fn preempt_enable() {
    let mut sched = SCHEDULER.lock();
    sched.preempt_disable_depth = sched.preempt_disable_depth.saturating_sub(1);
}

/// Voluntarily give up the CPU. The current task, if any, goes to the back
/// of its priority's ready queue.
#[cfg(feature = "alloc")]
pub fn yield_cpu() {
    let mut sched = SCHEDULER.lock();
    if let Some(k) = sched.current.take() {
        if let Some(task) = sched.tasks.get(&k) {
            if task.state == task::TaskState::Running {
                sched.enqueue_ready(k);
            }
        }
    }
    drop(sched);
    reschedule();
}

/// Terminate the currently running task and never return to it.
#[cfg(feature = "alloc")]
pub fn exit_task(_exit_code: i32) -> ! {
    {
        let mut sched = SCHEDULER.lock();
        if let Some(k) = sched.current.take() {
            if let Some(task) = sched.tasks.get_mut(&k) {
                task.state = task::TaskState::Dead;
            }
        }
    }
    reschedule();
    unreachable!("reschedule() does not return for a dead task");
}

/// Advance the tick counter: wake sleepers whose deadline arrived,
/// decrement the current task's time slice, and reschedule if it hits
/// zero and preemption is not disabled.
#[cfg(feature = "alloc")]
pub fn tick() {
    let mut sched = SCHEDULER.lock();
    sched.ticks += 1;
    let now = sched.ticks;

    let woken: alloc::vec::Vec<TaskKey> = sched
        .tasks
        .iter()
        .filter(|(_, t)| t.state == task::TaskState::Sleeping && t.wake_tick <= now)
        .map(|(k, _)| *k)
        .collect();
    for k in &woken {
        if let Some(task) = sched.tasks.get_mut(k) {
            task.state = task::TaskState::Ready;
        }
        sched.enqueue_ready(*k);
    }

    let should_reschedule = if let Some(k) = sched.current {
        if let Some(task) = sched.tasks.get_mut(&k) {
            task.time_slice = task.time_slice.saturating_sub(1);
            task.time_slice == 0 && sched.preempt_disable_depth == 0
        } else {
            false
        }
    } else {
        false
    };

    drop(sched);
    if should_reschedule {
        reschedule();
    }
}

/// Timer-interrupt entry point (aliased to `tick`).
pub fn timer_tick() {
    #[cfg(feature = "alloc")]
    tick();
}

/// Returns the (pid, tid) of the currently running task, if any.
#[cfg(feature = "alloc")]
pub fn current() -> Option<(ProcessId, ThreadId)> {
    SCHEDULER
        .lock()
        .current
        .map(|(pid, tid)| (ProcessId(pid), ThreadId(tid)))
}

/// Pick a new current task and mark it running. Does not itself perform the
/// register-level switch: that happens on return to the interrupt/syscall
/// trampoline, which reloads the new current task's saved stack pointer.
#[cfg(feature = "alloc")]
fn reschedule() {
    let mut sched = SCHEDULER.lock();
    let next = sched.pick_next();
    match next {
        Some(k) => {
            sched.current = Some(k);
            if let Some(task) = sched.tasks.get_mut(&k) {
                task.state = task::TaskState::Running;
                task.time_slice = task.priority.time_slice();
            }
        }
        None => {
            sched.current = None;
        }
    }
}

/// Enter the scheduler's main loop. Used by the idle task once boot is
/// complete; halts the CPU whenever no task is ready to run.
pub fn run() -> ! {
    println!("[SCHED] Entering scheduler main loop");
    loop {
        #[cfg(feature = "alloc")]
        {
            let has_ready = {
                let sched = SCHEDULER.lock();
                sched.current.is_some() || sched.ready.iter().any(|q| !q.is_empty())
            };
            if has_ready {
                reschedule();
                continue;
            }
        }
        crate::arch::idle();
    }
}

/// Start running tasks after boot -- alias kept for call sites that treat
/// "start" and "run" as distinct boot stages.
pub fn start() {
    println!("[SCHED] Scheduler starting");
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use crate::process::ProcessPriority;

    #[test]
    fn time_slice_matches_priority_table() {
        assert_eq!(time_slice_for(ProcessPriority::Idle), 1);
        assert_eq!(time_slice_for(ProcessPriority::Low), 5);
        assert_eq!(time_slice_for(ProcessPriority::Normal), 10);
        assert_eq!(time_slice_for(ProcessPriority::System), 15);
        assert_eq!(time_slice_for(ProcessPriority::RealTime), 20);
    }

    #[test]
    fn priority_ordering_is_highest_last() {
        assert!(Priority::RealTime > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::Low > Priority::Idle);
    }
}
