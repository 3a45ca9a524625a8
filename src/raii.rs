//! RAII guards for kernel resources
//!
//! Wraps physical frame and virtual-memory-region allocations so that
//! forgetting an explicit free/unmap call leaks nothing: the resource is
//! released when the guard is dropped.

use alloc::vec::Vec;

use crate::mm::frame_allocator::{FrameAllocator, PhysicalFrame};
use crate::process::ProcessId;

/// Owns a single physical frame allocated from a `FrameAllocator`.
///
/// Frees the frame automatically on drop.
pub struct FrameGuard {
    frame: PhysicalFrame,
    allocator: &'static FrameAllocator,
}

impl FrameGuard {
    pub fn new(frame: PhysicalFrame, allocator: &'static FrameAllocator) -> Self {
        Self { frame, allocator }
    }

    /// Physical frame backing this guard
    pub fn frame(&self) -> PhysicalFrame {
        self.frame
    }

    /// Physical address of the frame
    pub fn addr(&self) -> usize {
        self.frame.addr()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = self.allocator.free_frames(self.frame.number(), 1);
    }
}

/// Owns a contiguous run of physical frames allocated together.
///
/// Frees the whole run automatically on drop.
pub struct FramesGuard {
    frames: Vec<PhysicalFrame>,
    allocator: &'static FrameAllocator,
}

impl FramesGuard {
    pub fn new(frames: Vec<PhysicalFrame>, allocator: &'static FrameAllocator) -> Self {
        Self { frames, allocator }
    }

    /// Frames backing this guard
    pub fn frames(&self) -> &[PhysicalFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Drop for FramesGuard {
    fn drop(&mut self) {
        if let Some(first) = self.frames.first() {
            let _ = self.allocator.free_frames(first.number(), self.frames.len());
        }
    }
}

/// Owns a mapped virtual memory region belonging to a process's address
/// space. Unmaps the region automatically on drop.
pub struct MappedRegion {
    start: usize,
    size: usize,
    process_id: ProcessId,
}

impl MappedRegion {
    pub fn new(start: usize, size: usize, process_id: ProcessId) -> Self {
        Self {
            start,
            size,
            process_id,
        }
    }

    /// Start address of the mapped region
    pub fn start(&self) -> usize {
        self.start
    }

    /// Size of the mapped region in bytes
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Some(process) = crate::process::table::get_process(self.process_id) {
            let vas = process.memory_space.lock();
            let _ = vas.unmap_region(crate::mm::VirtualAddress::new(self.start as u64));
        }
    }
}
