//! Memory management integration tests

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(novaos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use novaos_kernel::{
    bench,
    mm::{self, FrameAllocatorError, FRAME_ALLOCATOR},
    serial_println,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {}
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    novaos_kernel::test_panic_handler(info)
}

/// Seed the allocator with enough usable frames for the tests in this file.
fn init_region(frame_count: usize) {
    let allocator = FRAME_ALLOCATOR.lock();
    allocator
        .add_region(mm::FrameNumber::new(256), frame_count)
        .expect("add_region");
}

#[test_case]
fn test_frame_allocator_init() {
    init_region(8192);

    let stats = FRAME_ALLOCATOR.lock().get_stats();
    assert!(stats.total_frames > 0);

    serial_println!("[ok]");
}

#[test_case]
fn test_small_allocation() {
    init_region(8192);

    let frame = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1, None)
        .expect("Failed to allocate single frame");

    let mut frames = alloc::vec::Vec::new();
    for _ in 0..50 {
        let f = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(10, None)
            .expect("Failed to allocate 10 frames");
        frames.push(f);
    }

    FRAME_ALLOCATOR
        .lock()
        .free_frames(frame, 1)
        .expect("free single frame");
    for f in frames {
        FRAME_ALLOCATOR
            .lock()
            .free_frames(f, 10)
            .expect("Failed to free frames");
    }

    let stats = FRAME_ALLOCATOR.lock().get_stats();
    assert!(stats.free_frames > 0);

    serial_println!("[ok]");
}

#[test_case]
fn test_large_allocation() {
    init_region(4096);

    let large_frame = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1024, None)
        .expect("Failed to allocate 1024 frames");

    FRAME_ALLOCATOR
        .lock()
        .free_frames(large_frame, 1024)
        .expect("Failed to free large allocation");

    let large_frame2 = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1024, None)
        .expect("Failed to reallocate");

    assert_eq!(large_frame.as_u64(), large_frame2.as_u64());

    serial_println!("[ok]");
}

/// S1: alloc, alloc, free(p1), alloc -> third alloc returns p1 via the
/// hot-cache rather than the zone scan.
#[test_case]
fn test_hot_cache_lifo_reuse() {
    init_region(8192);

    let p1 = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1, None)
        .expect("first alloc");
    let _p2 = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1, None)
        .expect("second alloc");

    FRAME_ALLOCATOR.lock().free_frames(p1, 1).expect("free p1");

    let p3 = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1, None)
        .expect("third alloc");

    assert_eq!(p1.as_u64(), p3.as_u64());

    serial_println!("[ok]");
}

#[test_case]
fn test_allocation_performance() {
    init_region(8192);

    let start = bench::read_timestamp();

    let mut allocations = alloc::vec::Vec::new();
    for _ in 0..1000 {
        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .expect("Allocation failed");
        allocations.push(frame);
    }

    let alloc_time = bench::read_timestamp() - start;

    let free_start = bench::read_timestamp();
    for frame in allocations {
        FRAME_ALLOCATOR
            .lock()
            .free_frames(frame, 1)
            .expect("Free failed");
    }
    let free_time = bench::read_timestamp() - free_start;

    let alloc_ns = bench::cycles_to_ns(alloc_time) / 1000;
    let free_ns = bench::cycles_to_ns(free_time) / 1000;

    serial_println!("Allocation: {} ns/op, Free: {} ns/op", alloc_ns, free_ns);
    serial_println!("[ok]");
}

#[test_case]
fn test_fragmentation_handling() {
    init_region(8192);

    let mut frames = alloc::vec::Vec::new();

    for i in 0..100 {
        let size = if i % 2 == 0 { 1 } else { 5 };
        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(size, None)
            .expect("Allocation failed");
        frames.push((frame, size));
    }

    for i in (0..100).step_by(2) {
        let (frame, size) = frames[i];
        FRAME_ALLOCATOR
            .lock()
            .free_frames(frame, size)
            .expect("Free failed");
    }

    let _new_frame = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1, None)
        .expect("Allocation after fragmentation failed");

    serial_println!("[ok]");
}

#[test_case]
fn test_out_of_memory() {
    init_region(256);

    let stats = FRAME_ALLOCATOR.lock().get_stats();
    let result = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(stats.total_frames as usize + 1024, None);

    assert!(result.is_err());

    serial_println!("[ok]");
}

#[test_case]
fn test_double_free_detection() {
    init_region(4096);

    let frame = FRAME_ALLOCATOR
        .lock()
        .allocate_frames(1, None)
        .expect("Allocation failed");

    FRAME_ALLOCATOR
        .lock()
        .free_frames(frame, 1)
        .expect("First free failed");

    let result = FRAME_ALLOCATOR.lock().free_frames(frame, 1);

    assert_eq!(result, Err(FrameAllocatorError::InvalidFrame));

    serial_println!("[ok]");
}
