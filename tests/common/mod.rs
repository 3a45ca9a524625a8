//! Common test utilities and helpers for kernel integration tests

use novaos_kernel::serial_println;

/// Initialize test environment for a specific subsystem
pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {} Test Suite ===", subsystem);
}

/// Helper to create and register a test process, returning its PID.
#[cfg(feature = "alloc")]
pub fn create_test_process(name: &str) -> novaos_kernel::process::ProcessId {
    use alloc::string::String;
    use novaos_kernel::process::pcb::ProcessBuilder;

    let process = ProcessBuilder::new(String::from(name)).build();
    let pid = process.pid;
    novaos_kernel::process::table::add_process(process).expect("add_process");
    pid
}

/// Helper to clean up test processes
#[cfg(feature = "alloc")]
pub fn cleanup_test_process(pid: novaos_kernel::process::ProcessId) {
    novaos_kernel::process::table::remove_process(pid);
}

/// Test helpers for IPC operations
pub mod ipc_helpers {
    use novaos_kernel::{
        ipc::{self, EndpointId, IpcError},
        process::ProcessId,
    };

    /// Create a test IPC endpoint
    pub fn create_test_endpoint(owner: ProcessId) -> Result<EndpointId, IpcError> {
        ipc::create_endpoint(owner)
    }
}
