//! Scheduler task creation glue
//!
//! Bridges a freshly built `Process`/`Thread` pair (see `creation.rs` and
//! `fork.rs`) into the scheduler. Kept as its own module since both
//! creation paths need it and it is the one place that reaches across the
//! process/scheduler boundary.

#[cfg(feature = "alloc")]
use crate::error::KernelError;

#[cfg(feature = "alloc")]
pub fn create_scheduler_task(
    process: &super::pcb::Process,
    thread: &super::thread::Thread,
) -> Result<(), KernelError> {
    crate::sched::spawn(process, thread)
}
