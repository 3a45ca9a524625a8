//! Scheduler Tests
//!
//! Tests for the fixed-priority single-CPU scheduler.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(novaos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::string::String;

use novaos_kernel::{
    kernel_assert, kernel_assert_eq, kernel_bench,
    process::{pcb::ProcessBuilder, thread::ThreadBuilder, ProcessId, ProcessPriority},
    sched::{self, Priority},
    serial_println, BenchmarkRunner,
};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Scheduler Tests");
    test_main();
    loop {}
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    novaos_kernel::test_panic_handler(info)
}

fn spawn_test_task(name: &str, priority: ProcessPriority) -> ProcessId {
    let process = ProcessBuilder::new(String::from(name)).priority(priority).build();
    let pid = process.pid;
    let thread = ThreadBuilder::new(pid, String::from(name), 0x4000_0000)
        .priority(priority)
        .build()
        .expect("thread build");
    let tid = thread.tid;
    process.add_thread(thread).expect("add_thread");

    let stored = novaos_kernel::process::table::add_process(process)
        .ok()
        .and_then(novaos_kernel::process::table::get_process)
        .expect("process stored");
    let stored_thread = stored.get_thread(tid).expect("thread stored");
    sched::spawn(stored, stored_thread).expect("spawn");
    pid
}

// ===== Priority mapping tests =====

#[test_case]
fn test_priority_time_slices_increase_with_rank() {
    kernel_assert!(Priority::Idle.time_slice() < Priority::Low.time_slice());
    kernel_assert!(Priority::Low.time_slice() < Priority::Normal.time_slice());
    kernel_assert!(Priority::Normal.time_slice() < Priority::High.time_slice());
    kernel_assert!(Priority::High.time_slice() < Priority::RealTime.time_slice());
}

#[test_case]
fn test_process_priority_maps_to_sched_priority() {
    kernel_assert_eq!(
        Priority::from_process_priority(ProcessPriority::RealTime),
        Priority::RealTime
    );
    kernel_assert_eq!(
        Priority::from_process_priority(ProcessPriority::Idle),
        Priority::Idle
    );
    kernel_assert_eq!(
        Priority::from_process_priority(ProcessPriority::System),
        Priority::High
    );
}

// ===== Task lifecycle tests =====

#[test_case]
fn test_task_spawn_and_current() {
    sched::init();

    let pid = spawn_test_task("sched_task_a", ProcessPriority::Normal);

    // Nothing is current until a reschedule picks it up.
    sched::yield_cpu();
    let current = sched::current();
    kernel_assert!(current.is_some());

    novaos_kernel::process::table::remove_process(pid);
}

#[test_case]
fn test_block_and_wake_process() {
    sched::init();

    let pid = spawn_test_task("sched_task_b", ProcessPriority::Normal);

    sched::block_process(pid);
    sched::wake_up_process(pid);

    // Waking re-enqueues the task; yielding should surface it as current
    // again without panicking.
    sched::yield_cpu();

    novaos_kernel::process::table::remove_process(pid);
}

#[test_case]
fn test_mark_process_dead_clears_ready_queue() {
    sched::init();

    let pid = spawn_test_task("sched_task_c", ProcessPriority::Normal);
    sched::mark_process_dead(pid);

    novaos_kernel::process::table::remove_process(pid);
}

#[test_case]
fn test_preempt_disable_enable_nesting() {
    sched::preempt_disable();
    sched::preempt_disable();
    sched::preempt_enable();
    sched::preempt_enable();
    // Should be balanced; an extra enable() must not underflow.
    sched::preempt_enable();
}

// ===== Performance Benchmarks =====

kernel_bench!(bench_yield_cpu, {
    sched::yield_cpu();
});

#[test_case]
fn bench_tick_processing() {
    sched::init();

    let runner = BenchmarkRunner::new();
    let result = runner.run_benchmark("scheduler_tick", || {
        sched::tick();
    });

    serial_println!("Scheduler tick time: {} ns", result.avg_time_ns);
}
