//! Context switch benchmark for NovaOS
//!
//! Measures the time to save and restore a thread's register context.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]

extern crate alloc;

use core::panic::PanicInfo;

use novaos_kernel::{exit_qemu, serial_println, BenchmarkRunner, QemuExitCode};

const CONTEXT_SWITCH_TARGET_NS: u64 = 10000; // 10us target

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Context Switch Benchmark");
    serial_println!("========================");
    serial_println!(
        "Target: < {} ns ({}us)",
        CONTEXT_SWITCH_TARGET_NS,
        CONTEXT_SWITCH_TARGET_NS / 1000
    );
    serial_println!();

    let runner = BenchmarkRunner::new();

    let minimal = runner.run_benchmark("Minimal Switch", minimal_context_switch);
    let full = runner.run_benchmark("Full Switch", full_context_switch);
    let fpu = runner.run_benchmark("FPU Switch", fpu_context_switch);

    serial_println!("\nTarget Analysis:");
    serial_println!("----------------");
    check_target("Minimal", minimal.avg_time_ns, CONTEXT_SWITCH_TARGET_NS);
    check_target("Full", full.avg_time_ns, CONTEXT_SWITCH_TARGET_NS);
    check_target("FPU", fpu.avg_time_ns, CONTEXT_SWITCH_TARGET_NS);

    exit_qemu(QemuExitCode::Success);
}

fn minimal_context_switch() {
    unsafe {
        core::arch::asm!(
            "push rax",
            "push rbx",
            "push rcx",
            "push rdx",
            "push rsi",
            "push rdi",
            "push rbp",
            "push r8",
            "push r9",
            "push r10",
            "push r11",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "mov rax, 0xDEADBEEF",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop r11",
            "pop r10",
            "pop r9",
            "pop r8",
            "pop rbp",
            "pop rdi",
            "pop rsi",
            "pop rdx",
            "pop rcx",
            "pop rbx",
            "pop rax",
            out("rax") _,
        );
    }
}

fn full_context_switch() {
    let mut context = ProcessContext::default();
    save_context(&mut context);
    switch_page_tables();
    restore_context(&context);
}

fn fpu_context_switch() {
    unsafe {
        core::arch::asm!(
            "fxsave [{}]",
            in(reg) &mut [0u8; 512],
        );
        core::arch::asm!("nop");
        core::arch::asm!(
            "fxrstor [{}]",
            in(reg) &[0u8; 512],
        );
    }
}

#[repr(C)]
#[derive(Default)]
struct ProcessContext {
    rax: u64,
    rbx: u64,
    rcx: u64,
    rdx: u64,
    rsi: u64,
    rdi: u64,
    rbp: u64,
    rsp: u64,
    r8: u64,
    r9: u64,
    r10: u64,
    r11: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rflags: u64,
    rip: u64,
}

#[inline(never)]
fn save_context(ctx: &mut ProcessContext) {
    ctx.rax = 0x1234;
    ctx.rbx = 0x5678;
}

#[inline(never)]
fn restore_context(ctx: &ProcessContext) {
    core::hint::black_box(ctx.rax);
    core::hint::black_box(ctx.rbx);
}

#[inline(never)]
fn switch_page_tables() {
    unsafe {
        core::arch::asm!(
            "mov rax, cr3",
            "mov cr3, rax",
            out("rax") _,
        );
    }
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
