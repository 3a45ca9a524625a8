//! Memory barrier abstractions.
//!
//! Centralizes memory barrier/fence operations so that non-arch code does not
//! need inline assembly of its own.
//!
//! # Barrier types
//!
//! * [`memory_fence`] -- full read/write fence (strongest).
//! * [`data_sync_barrier`] -- data synchronization barrier.
//! * [`instruction_sync_barrier`] -- instruction stream synchronization.

/// Full memory fence -- all reads and writes issued before this barrier are
/// globally visible before any reads or writes issued after it.
///
/// `core::sync::atomic::fence(SeqCst)` -- MFENCE semantics.
#[inline(always)]
pub fn memory_fence() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Data synchronization barrier.
///
/// Equivalent to [`memory_fence`] on x86_64, whose memory model already
/// guarantees the ordering other architectures need a separate barrier for.
#[inline(always)]
pub fn data_sync_barrier() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Instruction synchronization barrier.
///
/// No-op: x86_64's strongly ordered memory model and unified cache make an
/// explicit instruction barrier unnecessary in the cases this kernel hits
/// (no self-modifying code pages).
#[inline(always)]
pub fn instruction_sync_barrier() {}
