//! Memory management
//!
//! Owns the virtual/physical address types shared by every other memory
//! module, and wires together the physical frame allocator, virtual
//! address space manager, kernel heap, and page fault handler.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

pub mod bootloader;
pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod user_validation;
pub mod vas;
pub mod vmm;

pub use frame_allocator::{
    FrameAllocator, FrameAllocatorError, FrameAllocatorStats, FrameNumber, MemoryZone,
    PhysicalAddress, PhysicalFrame, ReservedRegion, FRAME_ALLOCATOR, FRAME_SIZE,
};
pub use vas::VirtualAddressSpace;

/// Page size in bytes.
///
/// Kept distinct from `FRAME_SIZE`: the frame allocator talks in frames,
/// the rest of the kernel talks in pages, and on every architecture this
/// kernel supports the two coincide.
pub const PAGE_SIZE: usize = FRAME_SIZE;

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    /// Offset of this address within its containing page
    pub fn page_offset(&self) -> usize {
        (self.0 & (PAGE_SIZE as u64 - 1)) as usize
    }

    /// Address of the page containing this address
    pub fn page_align_down(&self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u64 - 1))
    }
}

/// Page size options
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// 4 KiB pages
    Small = 4096,
    /// 2 MiB pages
    Large = 2 * 1024 * 1024,
    /// 1 GiB pages
    Huge = 1024 * 1024 * 1024,
}

bitflags! {
    /// Page table entry permission/attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const HUGE = 1 << 7;
        const GLOBAL = 1 << 8;
        const NO_EXECUTE = 1 << 63;
    }
}

/// A physical memory region, as reported by the bootloader's memory map,
/// stripped of its type classification.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    pub start: u64,
    pub size: u64,
    pub usable: bool,
}

/// Summary memory usage, for `/proc/meminfo` and diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemInfo {
    pub total_frames: u64,
    pub free_frames: u64,
    pub cached_frames: u64,
}

/// Offset added to a physical address to reach its kernel-virtual
/// mapping. Set once during early boot from the bootloader's physical
/// memory map; stays zero on architectures that identity-map low memory
/// permanently.
pub static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the bootloader-provided physical memory mapping offset.
pub fn set_phys_mem_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, Ordering::Release);
}

/// Translate a physical address to a kernel-accessible virtual address.
pub fn phys_to_virt_addr(phys: u64) -> u64 {
    phys + PHYS_MEM_OFFSET.load(Ordering::Acquire)
}

/// Free a single physical frame back to the global allocator.
pub fn free_frame(addr: PhysicalAddress) {
    let _ = FRAME_ALLOCATOR.lock().free_frames(addr.as_frame(), 1);
}

/// Virtual address of the currently active root page table.
///
/// Reads CR3 and translates the physical root through the kernel's
/// physical memory window.
pub fn get_kernel_page_table() -> usize {
    use x86_64::registers::control::Cr3;

    let (frame, _flags) = Cr3::read();
    phys_to_virt_addr(frame.start_address().as_u64()) as usize
}

/// Snapshot of current memory usage.
pub fn get_memory_stats() -> MemInfo {
    let stats = FRAME_ALLOCATOR.lock().get_stats();
    MemInfo {
        total_frames: stats.total_frames,
        free_frames: stats.free_frames,
        cached_frames: stats.hot_cache_frames,
    }
}

/// Initialize memory management: kernel heap and page fault plumbing.
///
/// The physical frame allocator is seeded separately from the
/// bootloader's memory map (see `mm::bootloader`); per-process virtual
/// address spaces are initialized via `VirtualAddressSpace::init`.
pub fn init() {
    println!("[MM] Initializing memory management...");
    if let Err(e) = heap::init() {
        println!("[MM] Kernel heap initialization failed: {}", e);
    }
    println!("[MM] Memory management initialized");
}

/// Initialize memory management using architecture defaults.
///
/// Equivalent to `init()`; kept as a separate entry point for the
/// multi-arch bootstrap sequence, which initializes each subsystem by a
/// name distinct from the single-arch kernel entry point.
pub fn init_default() {
    init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_virtual_address_roundtrip() {
        let addr = VirtualAddress::new(0x1000);
        assert_eq!(addr.as_u64(), 0x1000);
        assert_eq!(addr.as_usize(), 0x1000);
    }

    #[test_case]
    fn test_page_flags_bits() {
        let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        assert!(flags.contains(PageFlags::PRESENT));
        assert!(flags.contains(PageFlags::WRITABLE));
        assert!(!flags.contains(PageFlags::USER));
    }

    #[test_case]
    fn test_phys_to_virt_addr() {
        set_phys_mem_offset(0x1000_0000);
        assert_eq!(phys_to_virt_addr(0x2000), 0x1000_2000);
        set_phys_mem_offset(0);
    }
}
