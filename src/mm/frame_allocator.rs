//! Physical frame allocator for NovaOS
//!
//! A single word-packed bitmap over every tracked page frame, partitioned
//! into the three zones described by the memory model (DMA/NORMAL/HIGH), plus
//! a small LIFO hot-cache of recently freed frames that services the common
//! "free one page, allocate one page" pattern (page faults, short-lived
//! buffers) without touching the bitmap at all.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use alloc::vec::Vec;

/// Size of a physical frame (4KB)
pub const FRAME_SIZE: usize = 4096;

/// Frames permanently reserved at the bottom of physical memory: the BIOS
/// data area, the real-mode IVT, and the kernel's own early boot image.
/// Never returned by any allocator entry point.
const PERMANENTLY_RESERVED_FRAMES: u64 = 512; // 2 MiB

/// Highest physical frame this allocator can track (4 GiB at 4 KiB frames).
const MAX_FRAMES: usize = 1 << 20;
const BITMAP_WORDS: usize = MAX_FRAMES / 64;

/// Maximum number of recently freed frames kept in the hot-cache.
const HOT_CACHE_CAPACITY: usize = 256;

/// DMA zone ends at 16 MiB.
const DMA_LIMIT_FRAME: u64 = (16 * 1024 * 1024) / FRAME_SIZE as u64;
/// NORMAL zone ends at 896 MiB; everything above is HIGH.
const NORMAL_LIMIT_FRAME: u64 = (896 * 1024 * 1024) / FRAME_SIZE as u64;

/// Physical memory zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryZone {
    /// Below 16 MiB -- ISA DMA range.
    Dma,
    /// 16 MiB - 896 MiB.
    Normal,
    /// Above 896 MiB.
    High,
}

impl MemoryZone {
    /// Allocation fallback order: NORMAL first, then DMA, then HIGH.
    const SCAN_ORDER: [MemoryZone; 3] = [MemoryZone::Normal, MemoryZone::Dma, MemoryZone::High];

    fn idx(self) -> usize {
        match self {
            MemoryZone::Dma => 0,
            MemoryZone::Normal => 1,
            MemoryZone::High => 2,
        }
    }

    /// Get the frame range for this zone.
    pub fn frame_range(&self) -> (FrameNumber, FrameNumber) {
        match self {
            MemoryZone::Dma => (FrameNumber::new(0), FrameNumber::new(DMA_LIMIT_FRAME)),
            MemoryZone::Normal => (
                FrameNumber::new(DMA_LIMIT_FRAME),
                FrameNumber::new(NORMAL_LIMIT_FRAME),
            ),
            MemoryZone::High => (
                FrameNumber::new(NORMAL_LIMIT_FRAME),
                FrameNumber::new(MAX_FRAMES as u64),
            ),
        }
    }

    /// Check if a frame belongs to this zone
    pub fn contains(&self, frame: FrameNumber) -> bool {
        let (start, end) = self.frame_range();
        frame >= start && frame < end
    }

    /// Get the zone a frame number falls in.
    pub fn for_frame(frame: FrameNumber) -> Self {
        let f = frame.as_u64();
        if f < DMA_LIMIT_FRAME {
            MemoryZone::Dma
        } else if f < NORMAL_LIMIT_FRAME {
            MemoryZone::Normal
        } else {
            MemoryZone::High
        }
    }
}

/// Physical frame number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(num: u64) -> Self {
        Self(num)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * FRAME_SIZE as u64)
    }
}

/// Physical memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub const fn as_frame(&self) -> FrameNumber {
        FrameNumber::new(self.0 / FRAME_SIZE as u64)
    }

    pub const fn offset(&self, offset: u64) -> Self {
        Self::new(self.0 + offset)
    }
}

/// Physical frame representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalFrame {
    number: FrameNumber,
}

impl PhysicalFrame {
    pub fn new(number: FrameNumber) -> Self {
        Self { number }
    }

    pub fn number(&self) -> FrameNumber {
        self.number
    }

    pub fn addr(&self) -> usize {
        (self.number.0 * FRAME_SIZE as u64) as usize
    }
}

/// Frame allocation result
pub type Result<T> = core::result::Result<T, FrameAllocatorError>;

/// Frame allocator errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    /// No frames available
    OutOfMemory,
    /// Invalid, out-of-range, reserved, or already-free frame
    InvalidFrame,
    /// Invalid allocation size
    InvalidSize,
    /// Region overlaps with a previously reserved region
    ReservedMemoryConflict,
}

/// Reserved memory region
#[derive(Debug, Clone, Copy)]
pub struct ReservedRegion {
    /// Start frame number
    pub start: FrameNumber,
    /// End frame number (exclusive)
    pub end: FrameNumber,
    /// Description of what this region is reserved for
    pub description: &'static str,
}

/// Statistics for frame allocator
#[derive(Debug)]
pub struct FrameAllocatorStats {
    pub total_frames: u64,
    pub free_frames: u64,
    pub reserved_frames: u64,
    pub hot_cache_frames: u64,
    pub allocation_time_ns: u64,
}

/// Per-zone bookkeeping, maintained incrementally on every set/clear so it
/// stays O(1) queryable.
#[derive(Debug, Default, Clone, Copy)]
struct ZoneCounters {
    /// Frames known to physically exist in this zone (usable + reserved).
    total: u64,
    /// Frames currently unavailable: allocated, hot-cached, or reserved.
    used: u64,
    /// Frames permanently reserved in this zone.
    reserved: u64,
}

/// LIFO stack of recently freed single frames.
struct HotCache {
    frames: [u64; HOT_CACHE_CAPACITY],
    len: usize,
}

impl HotCache {
    const fn new() -> Self {
        Self {
            frames: [0; HOT_CACHE_CAPACITY],
            len: 0,
        }
    }

    fn push(&mut self, frame: u64) -> bool {
        if self.len >= HOT_CACHE_CAPACITY {
            return false;
        }
        self.frames[self.len] = frame;
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<u64> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.frames[self.len])
    }

    fn contains(&self, frame: u64) -> bool {
        self.frames[..self.len].contains(&frame)
    }

    fn len(&self) -> usize {
        self.len
    }
}

fn word_bit(frame: u64) -> (usize, u32) {
    ((frame / 64) as usize, (frame % 64) as u32)
}

fn bit_is_free(bitmap: &[u64; BITMAP_WORDS], frame: u64) -> bool {
    if frame >= MAX_FRAMES as u64 {
        return false;
    }
    let (word, bit) = word_bit(frame);
    bitmap[word] & (1 << bit) != 0
}

/// Mark free (1).
fn set_bit(bitmap: &mut [u64; BITMAP_WORDS], frame: u64) {
    let (word, bit) = word_bit(frame);
    bitmap[word] |= 1 << bit;
}

/// Mark allocated (0).
fn clear_bit(bitmap: &mut [u64; BITMAP_WORDS], frame: u64) {
    let (word, bit) = word_bit(frame);
    bitmap[word] &= !(1 << bit);
}

/// Scan a zone, restricted to `[start, end)`, for the first free frame.
fn scan_zone(bitmap: &[u64; BITMAP_WORDS], zone: MemoryZone) -> Option<u64> {
    let (start, end) = zone.frame_range();
    let (start, end) = (start.as_u64(), end.as_u64().min(MAX_FRAMES as u64));
    if start >= end {
        return None;
    }
    let first_word = (start / 64) as usize;
    let last_word = ((end - 1) / 64) as usize;
    for word_idx in first_word..=last_word {
        let mut word = bitmap[word_idx];
        if word_idx == first_word {
            // Mask off bits below `start` within the first word.
            let low_bit = start % 64;
            if low_bit > 0 {
                word &= !0u64 << low_bit;
            }
        }
        if word == 0 {
            continue;
        }
        let bit = word.trailing_zeros();
        let candidate = word_idx as u64 * 64 + bit as u64;
        if candidate < end {
            return Some(candidate);
        }
    }
    None
}

/// All mutable allocator state, guarded by one lock so alloc/free/reserve
/// compose without risking cross-structure races.
struct Inner {
    bitmap: [u64; BITMAP_WORDS],
    hot_cache: HotCache,
    reserved_ranges: Vec<(u64, u64)>,
    zones: [ZoneCounters; 3],
}

impl Inner {
    fn new() -> Self {
        let mut zones = [ZoneCounters::default(); 3];
        // The permanent floor is physically present and permanently
        // reserved; count it immediately rather than waiting for a reserve
        // call that will never come for it.
        let dma = MemoryZone::Dma.idx();
        zones[dma].total = PERMANENTLY_RESERVED_FRAMES;
        zones[dma].used = PERMANENTLY_RESERVED_FRAMES;
        zones[dma].reserved = PERMANENTLY_RESERVED_FRAMES;

        Self {
            bitmap: [0u64; BITMAP_WORDS],
            hot_cache: HotCache::new(),
            reserved_ranges: Vec::new(),
            zones,
        }
    }

    fn is_reserved(&self, frame: u64) -> bool {
        if frame < PERMANENTLY_RESERVED_FRAMES {
            return true;
        }
        self.reserved_ranges
            .iter()
            .any(|&(s, e)| frame >= s && frame < e)
    }
}

/// Word-packed bitmap frame allocator with zone fallback and a LIFO
/// hot-cache.
pub struct FrameAllocator {
    inner: Mutex<Inner>,
    allocation_count: AtomicU64,
    allocation_time_ns: AtomicU64,
}

impl FrameAllocator {
    /// Create a new frame allocator. No frames are usable until
    /// [`add_region`](Self::add_region) registers the RAM the bootloader
    /// reported.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            allocation_count: AtomicU64::new(0),
            allocation_time_ns: AtomicU64::new(0),
        }
    }

    fn record_timing(&self, start: u64) {
        let elapsed = crate::bench::read_timestamp().wrapping_sub(start);
        self.allocation_time_ns
            .fetch_add(crate::bench::cycles_to_ns(elapsed), Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Register `frame_count` frames starting at `start_frame` as usable RAM
    /// (called once per bootloader-reported usable region). Frames already
    /// covered by the permanent floor or an explicit reservation are left
    /// untouched.
    pub fn add_region(&self, start_frame: FrameNumber, frame_count: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let start = start_frame.as_u64();
        let end = (start + frame_count as u64).min(MAX_FRAMES as u64);
        let mut f = start;
        while f < end {
            if !inner.is_reserved(f) && !bit_is_free(&inner.bitmap, f) {
                set_bit(&mut inner.bitmap, f);
                let z = MemoryZone::for_frame(FrameNumber::new(f)).idx();
                inner.zones[z].total += 1;
            }
            f += 1;
        }
        Ok(())
    }

    /// Permanently reserve a frame range (kernel image, BIOS/video memory,
    /// local APIC, bootloader-reclaimable-but-unsafe regions). Rejects a
    /// range that overlaps a previously reserved range. A range entirely
    /// within the permanent 2 MiB floor is accepted as a no-op: it is
    /// already covered.
    pub fn add_reserved_region(&self, region: ReservedRegion) -> Result<()> {
        let mut inner = self.inner.lock();
        let start = region.start.as_u64();
        let end = region.end.as_u64().min(MAX_FRAMES as u64);
        if end <= start {
            return Ok(());
        }
        let eff_start = start.max(PERMANENTLY_RESERVED_FRAMES);
        if eff_start >= end {
            return Ok(());
        }
        if inner
            .reserved_ranges
            .iter()
            .any(|&(s, e)| eff_start < e && end > s)
        {
            return Err(FrameAllocatorError::ReservedMemoryConflict);
        }
        inner.reserved_ranges.push((eff_start, end));

        let mut f = eff_start;
        while f < end {
            let z = MemoryZone::for_frame(FrameNumber::new(f)).idx();
            if bit_is_free(&inner.bitmap, f) {
                // Was already counted in `total` as usable RAM; it just
                // becomes permanently unavailable now.
                clear_bit(&mut inner.bitmap, f);
            } else {
                inner.zones[z].total += 1;
            }
            inner.zones[z].used += 1;
            inner.zones[z].reserved += 1;
            f += 1;
        }
        Ok(())
    }

    /// Is this frame within a reserved range (permanent floor or explicit)?
    pub fn is_reserved(&self, frame: FrameNumber) -> bool {
        self.inner.lock().is_reserved(frame.as_u64())
    }

    /// Allocate a single page frame.
    ///
    /// Pops the hot-cache first; on a miss, scans NORMAL, then DMA, then
    /// HIGH for the first free frame.
    pub fn alloc_page(&self) -> Result<FrameNumber> {
        let start = crate::bench::read_timestamp();
        let mut inner = self.inner.lock();

        if let Some(frame) = inner.hot_cache.pop() {
            drop(inner);
            self.record_timing(start);
            return Ok(FrameNumber::new(frame));
        }

        for &zone in MemoryZone::SCAN_ORDER.iter() {
            if let Some(frame) = scan_zone(&inner.bitmap, zone) {
                clear_bit(&mut inner.bitmap, frame);
                inner.zones[zone.idx()].used += 1;
                drop(inner);
                self.record_timing(start);
                return Ok(FrameNumber::new(frame));
            }
        }

        Err(FrameAllocatorError::OutOfMemory)
    }

    /// Allocate a single frame from a specific zone only; does not consult
    /// the hot-cache and does not fall back to another zone.
    pub fn alloc_page_from_zone(&self, zone: MemoryZone) -> Result<FrameNumber> {
        let start = crate::bench::read_timestamp();
        let mut inner = self.inner.lock();
        match scan_zone(&inner.bitmap, zone) {
            Some(frame) => {
                clear_bit(&mut inner.bitmap, frame);
                inner.zones[zone.idx()].used += 1;
                drop(inner);
                self.record_timing(start);
                Ok(FrameNumber::new(frame))
            }
            None => Err(FrameAllocatorError::OutOfMemory),
        }
    }

    /// Allocate `count` physically contiguous frames, zone-agnostic.
    ///
    /// Sequential scan from frame 0; on hitting an allocated frame, the scan
    /// resumes one frame past the conflict (not re-examining it).
    pub fn alloc_contiguous(&self, count: usize) -> Result<FrameNumber> {
        if count == 0 {
            return Err(FrameAllocatorError::InvalidSize);
        }
        if count == 1 {
            return self.alloc_page();
        }

        let start = crate::bench::read_timestamp();
        let mut inner = self.inner.lock();

        let mut base = 0u64;
        let result = loop {
            if base + count as u64 > MAX_FRAMES as u64 {
                break Err(FrameAllocatorError::OutOfMemory);
            }
            let mut conflict = None;
            for i in 0..count as u64 {
                if !bit_is_free(&inner.bitmap, base + i) {
                    conflict = Some(i);
                    break;
                }
            }
            match conflict {
                None => {
                    for i in 0..count as u64 {
                        clear_bit(&mut inner.bitmap, base + i);
                        let z = MemoryZone::for_frame(FrameNumber::new(base + i)).idx();
                        inner.zones[z].used += 1;
                    }
                    break Ok(FrameNumber::new(base));
                }
                Some(i) => base += i + 1,
            }
        };

        drop(inner);
        self.record_timing(start);
        result
    }

    /// Free a single frame.
    ///
    /// Rejected (and left untouched) if out of bounds, within a reserved
    /// range, or already free -- whether sitting in the hot-cache or already
    /// clear in the bitmap (double free). Otherwise pushed onto the
    /// hot-cache when there's room; evicted straight back to the bitmap
    /// otherwise.
    pub fn free_page(&self, frame: FrameNumber) -> Result<()> {
        let mut inner = self.inner.lock();
        let f = frame.as_u64();

        if f >= MAX_FRAMES as u64 {
            return Err(FrameAllocatorError::InvalidFrame);
        }
        if inner.is_reserved(f) {
            return Err(FrameAllocatorError::InvalidFrame);
        }
        if inner.hot_cache.contains(f) {
            return Err(FrameAllocatorError::InvalidFrame);
        }
        if bit_is_free(&inner.bitmap, f) {
            return Err(FrameAllocatorError::InvalidFrame);
        }

        if !inner.hot_cache.push(f) {
            set_bit(&mut inner.bitmap, f);
            let z = MemoryZone::for_frame(frame).idx();
            inner.zones[z].used = inner.zones[z].used.saturating_sub(1);
        }
        Ok(())
    }

    /// Free `count` contiguous frames starting at `frame`. Bypasses the
    /// hot-cache (it exists for single-page reuse); frees straight to the
    /// bitmap, validating every frame before changing any of them.
    pub fn free_contiguous(&self, frame: FrameNumber, count: usize) -> Result<()> {
        if count == 0 {
            return Err(FrameAllocatorError::InvalidSize);
        }
        if count == 1 {
            return self.free_page(frame);
        }

        let mut inner = self.inner.lock();
        let base = frame.as_u64();
        if base + count as u64 > MAX_FRAMES as u64 {
            return Err(FrameAllocatorError::InvalidFrame);
        }
        for i in 0..count as u64 {
            let f = base + i;
            if inner.is_reserved(f) || inner.hot_cache.contains(f) || bit_is_free(&inner.bitmap, f)
            {
                return Err(FrameAllocatorError::InvalidFrame);
            }
        }
        for i in 0..count as u64 {
            let f = base + i;
            set_bit(&mut inner.bitmap, f);
            let z = MemoryZone::for_frame(FrameNumber::new(f)).idx();
            inner.zones[z].used = inner.zones[z].used.saturating_sub(1);
        }
        Ok(())
    }

    /// Compatibility entry point: dispatches to [`alloc_page`](Self::alloc_page)
    /// or [`alloc_contiguous`](Self::alloc_contiguous). The second argument
    /// is accepted for call-site compatibility and ignored -- this allocator
    /// has a single physical address space, not a NUMA topology.
    pub fn allocate_frames(&self, count: usize, _numa_node: Option<usize>) -> Result<FrameNumber> {
        if count == 1 {
            self.alloc_page()
        } else {
            self.alloc_contiguous(count)
        }
    }

    /// Compatibility entry point: dispatches to [`free_page`](Self::free_page)
    /// or [`free_contiguous`](Self::free_contiguous).
    pub fn free_frames(&self, frame: FrameNumber, count: usize) -> Result<()> {
        if count == 1 {
            self.free_page(frame)
        } else {
            self.free_contiguous(frame, count)
        }
    }

    /// Recompute the used-frame count from the bitmap by popcount and
    /// compare against the maintained counter; also verify every
    /// permanently reserved frame is marked used. Returns `true` if the
    /// allocator's bookkeeping is internally consistent.
    pub fn integrity_check(&self) -> bool {
        let inner = self.inner.lock();

        let mut popcount_free = 0u64;
        for word_idx in 0..BITMAP_WORDS {
            popcount_free += inner.bitmap[word_idx].count_ones() as u64;
        }
        let tracked_total: u64 = inner.zones.iter().map(|z| z.total).sum();
        let tracked_used: u64 = inner.zones.iter().map(|z| z.used).sum();
        let hot_cached = inner.hot_cache.len() as u64;

        // Every free bit belongs to a usable frame; hot-cached frames are
        // "used" but keep their bit clear (never set), so popcount_free
        // alone equals total_usable - used_from_usable, i.e. tracked
        // total minus tracked used (reserved frames' bits are always 0).
        if popcount_free != tracked_total.saturating_sub(tracked_used) {
            return false;
        }

        if hot_cached > tracked_used {
            return false;
        }

        for f in 0..PERMANENTLY_RESERVED_FRAMES {
            if bit_is_free(&inner.bitmap, f) {
                return false;
            }
        }
        for &(s, e) in inner.reserved_ranges.iter() {
            let mut f = s;
            while f < e {
                if bit_is_free(&inner.bitmap, f) {
                    return false;
                }
                f += 1;
            }
        }

        true
    }

    /// Get allocator statistics.
    pub fn get_stats(&self) -> FrameAllocatorStats {
        let inner = self.inner.lock();
        let total: u64 = inner.zones.iter().map(|z| z.total).sum();
        let used: u64 = inner.zones.iter().map(|z| z.used).sum();
        let reserved: u64 = inner.zones.iter().map(|z| z.reserved).sum();
        let hot_cache_frames = inner.hot_cache.len() as u64;
        drop(inner);

        FrameAllocatorStats {
            total_frames: total,
            free_frames: total.saturating_sub(used),
            reserved_frames: reserved,
            hot_cache_frames,
            allocation_time_ns: self.allocation_time_ns.load(Ordering::Relaxed),
        }
    }

    /// Deallocate a single frame, logging (not panicking) on failure --
    /// double-free and bounds violations at this layer are never fatal.
    pub fn deallocate_frame(&self, frame: PhysicalAddress) {
        let frame_num = frame.as_frame();
        if let Err(_e) = self.free_page(frame_num) {
            crate::println!(
                "[FrameAllocator] Warning: Failed to deallocate frame at {:#x}: {:?}",
                frame.as_u64(),
                _e
            );
        }
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Global frame allocator instance
pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn fresh() -> FrameAllocator {
        let alloc = FrameAllocator::new();
        alloc
            .add_region(FrameNumber::new(PERMANENTLY_RESERVED_FRAMES), 8192)
            .expect("add_region");
        alloc
    }

    /// S1: alloc, alloc, free(p1), alloc -> third alloc returns p1.
    #[test]
    fn test_hot_cache_lifo_reuse() {
        let alloc = fresh();

        let p1 = alloc.alloc_page().expect("first alloc");
        let _p2 = alloc.alloc_page().expect("second alloc");

        alloc.free_page(p1).expect("free p1");
        let p3 = alloc.alloc_page().expect("third alloc");

        assert_eq!(p1, p3);
    }

    #[test]
    fn test_double_free_rejected_from_hot_cache() {
        let alloc = fresh();
        let p1 = alloc.alloc_page().expect("alloc");
        alloc.free_page(p1).expect("first free");
        assert_eq!(
            alloc.free_page(p1),
            Err(FrameAllocatorError::InvalidFrame)
        );
    }

    #[test]
    fn test_double_free_rejected_from_bitmap() {
        let alloc = fresh();
        let p1 = alloc.alloc_page().expect("alloc");
        // Overflow the hot cache so this free lands straight on the bitmap.
        for _ in 0..HOT_CACHE_CAPACITY {
            let f = alloc.alloc_page().expect("fill alloc");
            alloc.free_page(f).expect("fill free");
        }
        alloc.free_page(p1).expect("first free");
        assert_eq!(
            alloc.free_page(p1),
            Err(FrameAllocatorError::InvalidFrame)
        );
    }

    #[test]
    fn test_reserved_floor_never_allocated() {
        let alloc = fresh();
        for _ in 0..4096 {
            let f = alloc.alloc_page().expect("alloc");
            assert!(f.as_u64() >= PERMANENTLY_RESERVED_FRAMES);
        }
    }

    #[test]
    fn test_free_reserved_frame_rejected() {
        let alloc = fresh();
        assert_eq!(
            alloc.free_page(FrameNumber::new(10)),
            Err(FrameAllocatorError::InvalidFrame)
        );
    }

    #[test]
    fn test_alloc_page_from_zone() {
        let alloc = fresh();
        let f = alloc
            .alloc_page_from_zone(MemoryZone::Normal)
            .expect("zone alloc");
        assert!(MemoryZone::Normal.contains(f));

        assert_eq!(
            alloc.alloc_page_from_zone(MemoryZone::Dma),
            Err(FrameAllocatorError::OutOfMemory)
        );
    }

    #[test]
    fn test_alloc_contiguous_and_reuse() {
        let alloc = fresh();
        let first = alloc.alloc_contiguous(16).expect("contiguous alloc");
        alloc.free_contiguous(first, 16).expect("contiguous free");
        let second = alloc.alloc_contiguous(16).expect("contiguous realloc");
        assert_eq!(first, second);
    }

    #[test]
    fn test_alloc_contiguous_skips_conflict() {
        let alloc = fresh();
        let a = alloc.alloc_page().expect("a");
        let _b = alloc.alloc_page().expect("b");
        alloc.free_page(a).ok();
        // a is back in the hot cache, not the bitmap, so a contiguous scan
        // from frame 0 must skip past both allocated frames and land after
        // them, not hand back `a` via the bitmap path.
        let run = alloc.alloc_contiguous(4).expect("contiguous");
        assert!(run.as_u64() > a.as_u64());
    }

    #[test]
    fn test_out_of_memory() {
        let alloc = FrameAllocator::new();
        alloc
            .add_region(FrameNumber::new(PERMANENTLY_RESERVED_FRAMES), 64)
            .expect("add_region");
        let stats = alloc.get_stats();
        assert_eq!(
            alloc.allocate_frames(stats.total_frames as usize + 16, None),
            Err(FrameAllocatorError::OutOfMemory)
        );
    }

    #[test]
    fn test_integrity_check_passes_after_mixed_traffic() {
        let alloc = fresh();
        let mut held = Vec::new();
        for _ in 0..64 {
            held.push(alloc.alloc_page().expect("alloc"));
        }
        for (i, frame) in held.into_iter().enumerate() {
            if i % 2 == 0 {
                alloc.free_page(frame).expect("free");
            }
        }
        assert!(alloc.integrity_check());
    }

    #[test]
    fn test_reserved_region_excluded_from_free_count() {
        let alloc = FrameAllocator::new();
        alloc
            .add_region(FrameNumber::new(PERMANENTLY_RESERVED_FRAMES), 4096)
            .expect("add_region");
        let before = alloc.get_stats().free_frames;

        alloc
            .add_reserved_region(ReservedRegion {
                start: FrameNumber::new(PERMANENTLY_RESERVED_FRAMES),
                end: FrameNumber::new(PERMANENTLY_RESERVED_FRAMES + 100),
                description: "test reservation",
            })
            .expect("reserve");

        let after = alloc.get_stats().free_frames;
        assert_eq!(before - after, 100);
        assert!(alloc.integrity_check());
    }
}
