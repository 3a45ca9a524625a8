//! Bootstrap module for kernel initialization
//!
//! This module handles the multi-stage initialization process to avoid
//! circular dependencies between subsystems.

use crate::{arch, cap, error::KernelResult, fs, ipc, mm, net, process, sched, security};

#[cfg(feature = "alloc")]
extern crate alloc;

/// Macro to generate the 6 bootstrap stage tracking functions.
///
/// The architecture provides a `$print_fn` macro that accepts a single
/// string literal and outputs it (with a trailing newline) to the
/// architecture's early console. This eliminates otherwise-identical
/// stage function bodies.
///
/// # Usage
///
/// ```ignore
/// // In arch/x86_64/bootstrap.rs:
/// macro_rules! arch_boot_print {
///     ($s:expr) => { /* arch-specific print */ };
/// }
/// crate::bootstrap::define_bootstrap_stages!(arch_boot_print);
/// ```
#[macro_export]
macro_rules! define_bootstrap_stages {
    ($print_fn:ident) => {
        pub fn stage1_start() {
            $print_fn!("[BOOTSTRAP] Starting multi-stage kernel initialization...");
            $print_fn!("[BOOTSTRAP] Stage 1: Hardware initialization");
        }

        pub fn stage1_complete() {
            $print_fn!("[BOOTSTRAP] Architecture initialized");
        }

        pub fn stage2_start() {
            $print_fn!("[BOOTSTRAP] Stage 2: Memory management");
        }

        pub fn stage2_complete() {
            $print_fn!("[BOOTSTRAP] Memory management initialized");
        }

        pub fn stage3_start() {
            $print_fn!("[BOOTSTRAP] Stage 3: Process management");
        }

        pub fn stage3_complete() {
            $print_fn!("[BOOTSTRAP] Process management initialized");
        }

        pub fn stage4_start() {
            $print_fn!("[BOOTSTRAP] Stage 4: Kernel services");
        }

        pub fn stage4_complete() {
            $print_fn!("[BOOTSTRAP] Core services initialized");
        }

        pub fn stage5_start() {
            $print_fn!("[BOOTSTRAP] Stage 5: Scheduler activation");
        }

        pub fn stage5_complete() {
            $print_fn!("[BOOTSTRAP] Scheduler activated - entering main scheduling loop");
        }

        pub fn stage6_start() {
            $print_fn!("[BOOTSTRAP] Stage 6: User space transition");
        }

        pub fn stage6_complete() {
            $print_fn!("[BOOTSTRAP] User space transition prepared");
            $print_fn!("[KERNEL] Boot sequence complete!");
            $print_fn!("BOOTOK");
        }
    };
}

/// Bootstrap task ID (runs before scheduler is fully initialized)
pub const BOOTSTRAP_PID: u64 = 0;
pub const BOOTSTRAP_TID: u64 = 0;

/// Multi-stage kernel initialization.
///
/// Subsystems are brought up in dependency order: architecture (GDT/IDT/PIC),
/// then memory management, then process management, then the remaining
/// kernel services (capabilities, security, VFS, network). The timer and
/// hardware interrupts are only enabled once every other subsystem has
/// finished initializing, so the first tick never races a half-initialized
/// scheduler or VFS.
pub fn kernel_init() -> KernelResult<()> {
    // Stage 1: Hardware initialization
    arch::x86_64::bootstrap::stage1_start();
    arch::init();
    arch::x86_64::bootstrap::stage1_complete();

    // Stage 2: Memory management
    arch::x86_64::bootstrap::stage2_start();
    mm::init_default();
    arch::x86_64::bootstrap::stage2_complete();

    // Stage 3: Process management
    arch::x86_64::bootstrap::stage3_start();
    process::init_without_init_process().expect("Failed to initialize process management");
    arch::x86_64::bootstrap::stage3_complete();

    // Stage 4: Core kernel services
    arch::x86_64::bootstrap::stage4_start();

    println!("[BOOTSTRAP] Initializing capabilities...");
    cap::init();
    println!("[BOOTSTRAP] Capabilities initialized");

    println!("[BOOTSTRAP] Initializing security subsystem...");
    security::init().expect("Failed to initialize security");
    println!("[BOOTSTRAP] Security subsystem initialized");

    println!("[BOOTSTRAP] Initializing IPC...");
    ipc::init();
    println!("[BOOTSTRAP] IPC initialized");

    #[cfg(feature = "alloc")]
    {
        println!("[BOOTSTRAP] Initializing VFS...");
        fs::init();
        println!("[BOOTSTRAP] VFS initialized");
    }

    arch::x86_64::bootstrap::stage4_complete();

    // Run kernel-mode init tests after Stage 4 (VFS ready)
    kernel_init_main();

    // Stage 5: Scheduler initialization
    arch::x86_64::bootstrap::stage5_start();
    sched::init();

    #[cfg(feature = "alloc")]
    {
        println!("[BOOTSTRAP] Initializing network stack...");
        net::init().expect("Failed to initialize network stack");
        println!("[BOOTSTRAP] Network stack initialized");
    }

    // Every other subsystem is up; it is now safe to take the first tick.
    arch::enable_timer_and_interrupts();

    arch::x86_64::bootstrap::stage5_complete();

    Ok(())
}

/// Run the bootstrap sequence
pub fn run() -> ! {
    if let Err(e) = kernel_init() {
        // Panic is intentional: kernel_init failure during boot is unrecoverable.
        // No subsystems are available for graceful error handling at this point.
        panic!("Bootstrap failed: {:?}", e);
    }

    // Stage 6: User space transition
    arch::x86_64::bootstrap::stage6_start();

    create_init_process();

    arch::x86_64::bootstrap::stage6_complete();

    // Transfer control to the scheduler.
    sched::start();
}

/// Kernel-mode init function
///
/// Exercises the VFS at runtime and emits QEMU-parseable `[ok]`/`[failed]`
/// markers for each test. Called from [`kernel_init`] once Stage 4 has
/// mounted the root filesystem.
#[cfg(feature = "alloc")]
pub fn kernel_init_main() {
    println!();
    println!("========================================");
    println!("[INIT] NovaOS kernel-mode init");
    println!("========================================");

    let mut passed = 0u32;
    let mut failed = 0u32;

    println!("[INIT] VFS tests:");

    // Test 1: Create directory
    {
        let ok = fs::get_vfs()
            .read()
            .mkdir("/tmp/test_init", fs::Permissions::default())
            .is_ok();
        report_test("vfs_mkdir", ok, &mut passed, &mut failed);
    }

    // Test 2: Write file via VFS create + write
    {
        let ok = (|| -> Result<(), &'static str> {
            let vfs = fs::get_vfs().read();
            let parent = vfs.resolve_path("/tmp/test_init")?;
            let file = parent.create("hello.txt", fs::Permissions::default())?;
            file.write(0, b"Hello NovaOS")?;
            Ok(())
        })()
        .is_ok();
        report_test("vfs_write_file", ok, &mut passed, &mut failed);
    }

    // Test 3: Read file back and verify contents
    {
        let ok = (|| -> Result<bool, &'static str> {
            let vfs = fs::get_vfs().read();
            let dir = vfs.resolve_path("/tmp/test_init")?;
            let file = dir.lookup("hello.txt")?;
            let mut buf = [0u8; 32];
            let n = file.read(0, &mut buf)?;
            Ok(&buf[..n] == b"Hello NovaOS")
        })()
        .unwrap_or(false);
        report_test("vfs_read_verify", ok, &mut passed, &mut failed);
    }

    // Test 4: List directory entries
    {
        let ok = (|| -> Result<bool, &'static str> {
            let vfs = fs::get_vfs().read();
            let node = vfs.resolve_path("/tmp/test_init")?;
            let entries = node.readdir()?;
            Ok(entries.iter().any(|e| e.name == "hello.txt"))
        })()
        .unwrap_or(false);
        report_test("vfs_readdir", ok, &mut passed, &mut failed);
    }

    // Test 5: /proc is mounted
    {
        let ok = fs::get_vfs().read().resolve_path("/proc").is_ok();
        report_test("vfs_procfs", ok, &mut passed, &mut failed);
    }

    // Test 6: /dev is mounted
    {
        let ok = fs::get_vfs().read().resolve_path("/dev").is_ok();
        report_test("vfs_devfs", ok, &mut passed, &mut failed);
    }

    print_summary(passed, failed);
}

#[cfg(not(feature = "alloc"))]
pub fn kernel_init_main() {
    println!("BOOTOK");
}

/// Print test summary and BOOTOK/BOOTFAIL
fn print_summary(passed: u32, failed: u32) {
    println!("========================================");
    println!("[INIT] Results: {}/{} passed", passed, passed + failed);
    if failed == 0 {
        println!("BOOTOK");
    } else {
        println!("BOOTFAIL");
    }
    println!("========================================");
}

/// Report a single test result with QEMU-parseable markers
fn report_test(name: &str, ok: bool, passed: &mut u32, failed: &mut u32) {
    if ok {
        println!("  {}...[ok]", name);
        *passed += 1;
    } else {
        println!("  {}...[failed]", name);
        *failed += 1;
    }
}

/// Create the init process
fn create_init_process() {
    #[cfg(feature = "alloc")]
    {
        use alloc::string::String;
        match process::lifecycle::create_process(String::from("init"), 0) {
            Ok(_pid) => {
                println!("[BOOTSTRAP] Init process created with PID {}", _pid.0);
            }
            Err(_e) => {
                println!("[BOOTSTRAP] Failed to create init process: {}", _e);
            }
        }
    }
}
