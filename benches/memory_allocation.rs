//! Memory allocation benchmark for NovaOS
//!
//! Measures the speed of memory allocation operations

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]

extern crate alloc;

use core::panic::PanicInfo;

use novaos_kernel::{exit_qemu, serial_println, BenchmarkRunner, QemuExitCode};

const MEMORY_ALLOC_TARGET_NS: u64 = 1000; // 1us target

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Memory Allocation Benchmark");
    serial_println!("===========================");
    serial_println!(
        "Target: < {} ns ({}us)",
        MEMORY_ALLOC_TARGET_NS,
        MEMORY_ALLOC_TARGET_NS / 1000
    );
    serial_println!();

    let runner = BenchmarkRunner::new();

    let small = runner.run_benchmark("Small Alloc (64B)", || {
        let v: alloc::vec::Vec<u8> = alloc::vec::Vec::with_capacity(64);
        core::hint::black_box(v);
    });
    let medium = runner.run_benchmark("Medium Alloc (4KB)", || {
        let v: alloc::vec::Vec<u8> = alloc::vec::Vec::with_capacity(4096);
        core::hint::black_box(v);
    });
    let large = runner.run_benchmark("Large Alloc (64KB)", || {
        let v: alloc::vec::Vec<u8> = alloc::vec::Vec::with_capacity(65536);
        core::hint::black_box(v);
    });
    let free = runner.run_benchmark("Deallocation", || {
        let v: alloc::vec::Vec<u8> = alloc::vec::Vec::with_capacity(64);
        drop(v);
    });

    serial_println!("\nTarget Analysis:");
    serial_println!("----------------");
    check_target("Small Alloc", small.avg_time_ns, MEMORY_ALLOC_TARGET_NS);
    check_target("Medium Alloc", medium.avg_time_ns, MEMORY_ALLOC_TARGET_NS);
    check_target("Large Alloc", large.avg_time_ns, MEMORY_ALLOC_TARGET_NS * 2);
    check_target("Deallocation", free.avg_time_ns, MEMORY_ALLOC_TARGET_NS);

    exit_qemu(QemuExitCode::Success)
}

fn check_target(name: &str, avg_ns: u64, target_ns: u64) {
    if avg_ns < target_ns {
        serial_println!("{:<20} PASS ({}ns < {}ns)", name, avg_ns, target_ns);
    } else {
        serial_println!("{:<20} FAIL ({}ns > {}ns)", name, avg_ns, target_ns);
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("Benchmark panic: {}", info);
    exit_qemu(QemuExitCode::Failed)
}
