//! Process Management Tests
//!
//! Tests for process lifecycle and thread control blocks.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(novaos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::string::String;

use novaos_kernel::{
    kernel_assert, kernel_assert_eq, kernel_bench,
    process::{
        pcb::ProcessBuilder,
        table,
        thread::{ThreadBuilder, ThreadState},
        OwnerType, ProcessId, ProcessPriority, ProcessState,
    },
    serial_println, BenchmarkRunner,
};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Process Management Tests");
    test_main();
    loop {}
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    novaos_kernel::test_panic_handler(info)
}

// ===== Process Lifecycle Tests =====

#[test_case]
fn test_process_creation() {
    let process = ProcessBuilder::new(String::from("test_process"))
        .owner_type(OwnerType::Usr)
        .build();
    let pid = process.pid;

    kernel_assert_eq!(process.get_state(), ProcessState::Creating);
    kernel_assert_eq!(process.get_exit_code(), 0);

    table::add_process(process).expect("add_process");

    kernel_assert!(table::get_process(pid).is_some());

    table::remove_process(pid);
}

#[test_case]
fn test_process_state_transitions() {
    let process = ProcessBuilder::new(String::from("state_test")).build();

    process.set_state(ProcessState::Ready);
    kernel_assert_eq!(process.get_state(), ProcessState::Ready);

    process.set_state(ProcessState::Running);
    kernel_assert_eq!(process.get_state(), ProcessState::Running);

    process.set_state(ProcessState::Blocked);
    kernel_assert_eq!(process.get_state(), ProcessState::Blocked);

    process.set_state(ProcessState::Ready);
    kernel_assert_eq!(process.get_state(), ProcessState::Ready);

    process.set_state(ProcessState::Zombie);
    process.set_exit_code(42);
    kernel_assert_eq!(process.get_state(), ProcessState::Zombie);
    kernel_assert_eq!(process.get_exit_code(), 42);
}

#[test_case]
fn test_process_priority_levels() {
    let process = ProcessBuilder::new(String::from("priority_test"))
        .priority(ProcessPriority::Low)
        .build();

    kernel_assert_eq!(*process.priority.lock(), ProcessPriority::Low);
}

// ===== Thread Management Tests =====

#[test_case]
fn test_thread_creation() {
    let pid = ProcessId(100);
    let thread = ThreadBuilder::new(pid, String::from("test_thread"), 0x4000_0000)
        .build()
        .expect("thread build");

    kernel_assert_eq!(thread.pid, pid);
    kernel_assert_eq!(thread.get_state(), ThreadState::Ready);
}

#[test_case]
fn test_thread_state_transitions() {
    let thread = ThreadBuilder::new(ProcessId(101), String::from("state_thread"), 0x4000_0000)
        .build()
        .expect("thread build");

    thread.set_state(ThreadState::Running);
    kernel_assert_eq!(thread.get_state(), ThreadState::Running);

    thread.set_state(ThreadState::Blocked);
    kernel_assert_eq!(thread.get_state(), ThreadState::Blocked);

    thread.set_state(ThreadState::Ready);
    kernel_assert_eq!(thread.get_state(), ThreadState::Ready);

    thread.set_state(ThreadState::Zombie);
    kernel_assert_eq!(thread.get_state(), ThreadState::Zombie);
}

#[test_case]
fn test_thread_affinity() {
    let thread = ThreadBuilder::new(ProcessId(102), String::from("affinity_thread"), 0x4000_0000)
        .cpu_affinity(1)
        .build()
        .expect("thread build");

    kernel_assert_eq!(thread.get_affinity(), 1);
    thread.set_affinity(1);
    kernel_assert_eq!(thread.get_affinity(), 1);
}

// ===== Process Table Tests =====

#[test_case]
fn test_process_table_operations() {
    for _ in 0..10 {
        let process = ProcessBuilder::new(String::from("table_test")).build();
        table::add_process(process).expect("add_process");
    }

    let pids: alloc::vec::Vec<ProcessId> = {
        let mut ids = alloc::vec::Vec::new();
        table::PROCESS_TABLE.for_each(|p| ids.push(p.pid));
        ids
    };

    kernel_assert!(pids.len() >= 10);

    for pid in pids {
        if table::get_process(pid).map(|p| p.name == "table_test").unwrap_or(false) {
            table::remove_process(pid);
        }
    }
}

// ===== Performance Benchmarks =====

kernel_bench!(bench_process_creation, {
    let process = ProcessBuilder::new(String::from("bench_process")).build();
    core::hint::black_box(process);
});

kernel_bench!(bench_thread_creation, {
    let thread = ThreadBuilder::new(ProcessId(1), String::from("bench_thread"), 0x4000_0000).build();
    core::hint::black_box(thread);
});

#[test_case]
fn bench_process_table_lookup() {
    let mut pids = alloc::vec::Vec::new();
    for _ in 0..100 {
        let process = ProcessBuilder::new(String::from("lookup_bench")).build();
        let pid = process.pid;
        table::add_process(process).expect("add_process");
        pids.push(pid);
    }

    let target = pids[50];
    let runner = BenchmarkRunner::new();
    let result = runner.run_benchmark("process_table_lookup", || {
        let process = table::get_process(target);
        core::hint::black_box(process);
    });

    serial_println!("Process table lookup: {} ns", result.avg_time_ns);

    for pid in pids {
        table::remove_process(pid);
    }
}
