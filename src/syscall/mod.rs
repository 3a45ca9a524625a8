//! System call interface
//!
//! Dispatches software interrupt `0x80` entries to the kernel-side
//! handlers for the fixed syscall table: process lifecycle, memory,
//! filesystem, time, and Berkeley-style IPv4 sockets.

#![allow(dead_code)]

mod filesystem;
mod memory;
mod network_ext_syscalls;
mod process;
mod time;
use process::*;

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// System call numbers recognised via `int 0x80`.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    // Process management
    ProcessYield = 10,
    ProcessExit = 11,
    ProcessFork = 12,
    ProcessExec = 13,
    ProcessWait = 14,
    ProcessGetPid = 15,
    ProcessGetPPid = 16,
    ProcessSetPriority = 17,
    ProcessGetPriority = 18,
    ProcessKill = 19,

    // Memory management
    MemoryMap = 20,
    MemoryUnmap = 21,
    MemoryProtect = 22,
    MemoryBrk = 23,

    // Filesystem
    FileOpen = 60,
    FileClose = 61,
    FileRead = 62,
    FileWrite = 63,
    FileSeek = 64,
    FileStat = 65,
    FileTruncate = 66,
    FileMkdir = 67,
    FileRmdir = 68,
    FileUnlink = 69,
    FileReaddir = 70,
    FileMount = 71,
    FileUnmount = 72,
    FileSync = 73,

    // Time management
    TimeGetUptime = 100,
    TimeSleep = 101,

    // Berkeley sockets (IPv4 only)
    NetSocket = 200,
    NetBind = 201,
    NetListen = 202,
    NetAccept = 203,
    NetConnect = 204,
    NetSend = 205,
    NetRecv = 206,
    NetSocketClose = 207,
    NetSendTo = 250,
    NetRecvFrom = 251,
    NetGetSockName = 252,
    NetGetPeerName = 253,
    NetSetSockOpt = 254,
    NetGetSockOpt = 255,
}

/// System call result type
pub type SyscallResult = Result<usize, SyscallError>;

/// Small, closed syscall error taxonomy (negative on the wire).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall = -1,
    InvalidArgument = -2,
    PermissionDenied = -3,
    ResourceNotFound = -4,
    OutOfMemory = -5,
    WouldBlock = -6,
    Interrupted = -7,
    InvalidPointer = -8,
    InvalidState = -9,
    IoError = -10,
    BadFileDescriptor = -11,
}

/// System call handler entry point, reached from the `int 0x80` trampoline.
#[no_mangle]
pub extern "C" fn syscall_handler(
    syscall_num: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> isize {
    let result = match Syscall::try_from(syscall_num) {
        Ok(syscall) => handle_syscall(syscall, arg1, arg2, arg3, arg4, arg5),
        Err(_) => Err(SyscallError::InvalidSyscall),
    };

    match result {
        Ok(value) => value as isize,
        Err(error) => error as i32 as isize,
    }
}

/// Handle individual system calls
fn handle_syscall(
    syscall: Syscall,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> SyscallResult {
    match syscall {
        // Process management
        Syscall::ProcessYield => sys_yield(),
        Syscall::ProcessExit => sys_exit(arg1),
        Syscall::ProcessFork => sys_fork(),
        Syscall::ProcessExec => sys_exec(arg1, arg2, arg3),
        Syscall::ProcessWait => sys_wait(arg1 as isize, arg2, arg3),
        Syscall::ProcessGetPid => sys_getpid(),
        Syscall::ProcessGetPPid => sys_getppid(),
        Syscall::ProcessSetPriority => sys_setpriority(arg1, arg2, arg3),
        Syscall::ProcessGetPriority => sys_getpriority(arg1, arg2),
        Syscall::ProcessKill => sys_kill(arg1, arg2),

        // Memory management
        Syscall::MemoryMap => memory::sys_mmap(arg1, arg2, arg3, arg4, arg5),
        Syscall::MemoryUnmap => memory::sys_munmap(arg1, arg2),
        Syscall::MemoryProtect => memory::sys_mprotect(arg1, arg2, arg3),
        Syscall::MemoryBrk => memory::sys_brk(arg1),

        // Filesystem
        Syscall::FileOpen => filesystem::sys_open(arg1, arg2, arg3),
        Syscall::FileClose => filesystem::sys_close(arg1),
        Syscall::FileRead => filesystem::sys_read(arg1, arg2, arg3),
        Syscall::FileWrite => filesystem::sys_write(arg1, arg2, arg3),
        Syscall::FileSeek => filesystem::sys_seek(arg1, arg2 as isize, arg3),
        Syscall::FileStat => filesystem::sys_stat(arg1, arg2),
        Syscall::FileTruncate => filesystem::sys_truncate(arg1, arg2),
        Syscall::FileMkdir => filesystem::sys_mkdir(arg1, arg2),
        Syscall::FileRmdir => filesystem::sys_rmdir(arg1),
        Syscall::FileUnlink => filesystem::sys_unlink(arg1),
        Syscall::FileReaddir => filesystem::sys_readdir(arg1, arg2, arg3),
        Syscall::FileMount => filesystem::sys_mount(arg1, arg2, arg3, arg4),
        Syscall::FileUnmount => filesystem::sys_unmount(arg1),
        Syscall::FileSync => filesystem::sys_sync(),

        // Time management
        Syscall::TimeGetUptime => time::sys_time_get_uptime(),
        Syscall::TimeSleep => time::sys_sleep(arg1),

        // Sockets
        Syscall::NetSocket => network_ext_syscalls::sys_net_socket(arg1, arg2, arg3),
        Syscall::NetBind => network_ext_syscalls::sys_net_bind(arg1, arg2, arg3),
        Syscall::NetListen => network_ext_syscalls::sys_net_listen(arg1, arg2),
        Syscall::NetAccept => network_ext_syscalls::sys_net_accept(arg1, arg2, arg3),
        Syscall::NetConnect => network_ext_syscalls::sys_net_connect(arg1, arg2, arg3),
        Syscall::NetSend => network_ext_syscalls::sys_net_send(arg1, arg2, arg3),
        Syscall::NetRecv => network_ext_syscalls::sys_net_recv(arg1, arg2, arg3),
        Syscall::NetSocketClose => network_ext_syscalls::sys_net_close(arg1),
        Syscall::NetSendTo => network_ext_syscalls::sys_net_sendto(arg1, arg2, arg3, arg4, arg5),
        Syscall::NetRecvFrom => network_ext_syscalls::sys_net_recvfrom(arg1, arg2, arg3, arg4),
        Syscall::NetGetSockName => network_ext_syscalls::sys_net_getsockname(arg1, arg2, arg3),
        Syscall::NetGetPeerName => network_ext_syscalls::sys_net_getpeername(arg1, arg2, arg3),
        Syscall::NetSetSockOpt => {
            network_ext_syscalls::sys_net_setsockopt(arg1, arg2, arg3, arg4, arg5)
        }
        Syscall::NetGetSockOpt => {
            network_ext_syscalls::sys_net_getsockopt(arg1, arg2, arg3, arg4)
        }
    }
}

/// Validate that a user-space pointer is non-null, lies within the user
/// address range, and that `len` bytes starting there do not wrap or cross
/// into kernel space.
///
/// This kernel does not yet walk the caller's page tables to confirm every
/// page is actually mapped (see [`crate::mm::user_validation`]); it only
/// rejects addresses that are obviously bogus.
pub(crate) fn validate_user_pointer(ptr: usize, len: usize) -> Result<(), SyscallError> {
    if ptr == 0 {
        return Err(SyscallError::InvalidPointer);
    }
    let end = ptr.checked_add(len).ok_or(SyscallError::InvalidPointer)?;
    if !crate::mm::user_validation::is_user_addr_valid(ptr)
        || !crate::mm::user_validation::is_user_addr_valid(end)
    {
        return Err(SyscallError::InvalidPointer);
    }
    Ok(())
}

/// Alias for [`validate_user_pointer`] used by call sites that think of the
/// region as a buffer rather than a single pointer.
pub(crate) fn validate_user_buffer(ptr: usize, len: usize) -> Result<(), SyscallError> {
    validate_user_pointer(ptr, len)
}

/// Copy a NUL-terminated string out of user space, capped at 4096 bytes.
#[cfg(feature = "alloc")]
pub(crate) fn copy_c_string_from_user(ptr: usize) -> Result<Vec<u8>, SyscallError> {
    validate_user_pointer(ptr, 1)?;
    // SAFETY: `ptr` was checked above to lie within the user address range;
    // the loop still bounds the scan so a missing NUL terminator cannot
    // read past a fixed cap.
    let mut bytes = Vec::new();
    let mut cursor = ptr as *const u8;
    unsafe {
        for _ in 0..4096 {
            let byte = *cursor;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            cursor = cursor.add(1);
        }
    }
    Ok(bytes)
}

/// Yield the CPU to the next ready task at the same or higher priority.
fn sys_yield() -> SyscallResult {
    crate::sched::yield_cpu();
    Ok(0)
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Syscall::ProcessYield),
            11 => Ok(Syscall::ProcessExit),
            12 => Ok(Syscall::ProcessFork),
            13 => Ok(Syscall::ProcessExec),
            14 => Ok(Syscall::ProcessWait),
            15 => Ok(Syscall::ProcessGetPid),
            16 => Ok(Syscall::ProcessGetPPid),
            17 => Ok(Syscall::ProcessSetPriority),
            18 => Ok(Syscall::ProcessGetPriority),
            19 => Ok(Syscall::ProcessKill),

            20 => Ok(Syscall::MemoryMap),
            21 => Ok(Syscall::MemoryUnmap),
            22 => Ok(Syscall::MemoryProtect),
            23 => Ok(Syscall::MemoryBrk),

            60 => Ok(Syscall::FileOpen),
            61 => Ok(Syscall::FileClose),
            62 => Ok(Syscall::FileRead),
            63 => Ok(Syscall::FileWrite),
            64 => Ok(Syscall::FileSeek),
            65 => Ok(Syscall::FileStat),
            66 => Ok(Syscall::FileTruncate),
            67 => Ok(Syscall::FileMkdir),
            68 => Ok(Syscall::FileRmdir),
            69 => Ok(Syscall::FileUnlink),
            70 => Ok(Syscall::FileReaddir),
            71 => Ok(Syscall::FileMount),
            72 => Ok(Syscall::FileUnmount),
            73 => Ok(Syscall::FileSync),

            100 => Ok(Syscall::TimeGetUptime),
            101 => Ok(Syscall::TimeSleep),

            200 => Ok(Syscall::NetSocket),
            201 => Ok(Syscall::NetBind),
            202 => Ok(Syscall::NetListen),
            203 => Ok(Syscall::NetAccept),
            204 => Ok(Syscall::NetConnect),
            205 => Ok(Syscall::NetSend),
            206 => Ok(Syscall::NetRecv),
            207 => Ok(Syscall::NetSocketClose),
            250 => Ok(Syscall::NetSendTo),
            251 => Ok(Syscall::NetRecvFrom),
            252 => Ok(Syscall::NetGetSockName),
            253 => Ok(Syscall::NetGetPeerName),
            254 => Ok(Syscall::NetSetSockOpt),
            255 => Ok(Syscall::NetGetSockOpt),

            _ => Err(()),
        }
    }
}
