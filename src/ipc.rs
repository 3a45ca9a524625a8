//! Inter-process communication
//!
//! Endpoints are bidirectional message queues owned by a process.
//! Messages up to 64 bytes travel as `SmallMessage` and are intended to be
//! passed through registers by the syscall layer; anything larger is the
//! caller's responsibility to stage through shared memory.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::collections::{BTreeMap, VecDeque};
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::Mutex;

use crate::process::ProcessId;

/// Maximum number of queued messages per endpoint
pub const MAX_ENDPOINT_QUEUE_SIZE: usize = 1024;

/// Number of data registers available for small messages
pub const DATA_REGISTERS: usize = 4;

/// Small message for register-based transfers (<= 64 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmallMessage {
    pub capability: u64,
    pub opcode: u32,
    pub flags: u32,
    pub data: [u64; DATA_REGISTERS],
}

impl SmallMessage {
    pub const fn new(capability: u64, opcode: u32) -> Self {
        Self {
            capability,
            opcode,
            flags: 0,
            data: [0; DATA_REGISTERS],
        }
    }

    pub fn with_data(mut self, index: usize, value: u64) -> Self {
        if index < DATA_REGISTERS {
            self.data[index] = value;
        }
        self
    }

    pub const fn size() -> usize {
        core::mem::size_of::<Self>()
    }
}

/// IPC operation result type
pub type Result<T> = core::result::Result<T, IpcError>;

/// IPC error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    InvalidCapability,
    ProcessNotFound,
    EndpointNotFound,
    MessageTooLarge,
    OutOfMemory,
    WouldBlock,
    PermissionDenied,
    EndpointBusy,
}

impl IpcError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCapability => "invalid or revoked capability",
            Self::ProcessNotFound => "target process not found",
            Self::EndpointNotFound => "endpoint not found",
            Self::MessageTooLarge => "message too large",
            Self::OutOfMemory => "out of memory",
            Self::WouldBlock => "operation would block",
            Self::PermissionDenied => "permission denied",
            Self::EndpointBusy => "endpoint is busy",
        }
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identifier for an IPC endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub u64);

static ENDPOINT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A bidirectional message endpoint owned by a single process
pub struct Endpoint {
    pub id: EndpointId,
    pub owner: ProcessId,
    #[cfg(feature = "alloc")]
    queue: Mutex<VecDeque<SmallMessage>>,
    active: AtomicBool,
}

impl Endpoint {
    fn new(id: EndpointId, owner: ProcessId) -> Self {
        Self {
            id,
            owner,
            #[cfg(feature = "alloc")]
            queue: Mutex::new(VecDeque::with_capacity(16)),
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(feature = "alloc")]
struct IpcRegistry {
    endpoints: BTreeMap<EndpointId, Endpoint>,
    process_endpoints: BTreeMap<ProcessId, alloc::vec::Vec<EndpointId>>,
}

#[cfg(feature = "alloc")]
impl IpcRegistry {
    fn new() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            process_endpoints: BTreeMap::new(),
        }
    }
}

#[cfg(feature = "alloc")]
static REGISTRY: Mutex<Option<IpcRegistry>> = Mutex::new(None);

/// Initialize the global IPC registry
pub fn init() {
    println!("[IPC] Initializing IPC subsystem...");
    #[cfg(feature = "alloc")]
    {
        *REGISTRY.lock() = Some(IpcRegistry::new());
    }
    println!("[IPC] IPC subsystem initialized");
}

/// Create a new endpoint owned by `owner`.
#[cfg(feature = "alloc")]
pub fn create_endpoint(owner: ProcessId) -> Result<EndpointId> {
    let mut guard = REGISTRY.lock();
    let registry = guard.as_mut().ok_or(IpcError::OutOfMemory)?;

    let id = EndpointId(ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed));
    registry.endpoints.insert(id, Endpoint::new(id, owner));
    registry
        .process_endpoints
        .entry(owner)
        .or_insert_with(alloc::vec::Vec::new)
        .push(id);
    Ok(id)
}

/// Enqueue a message on `endpoint`. Fails if the queue is full.
#[cfg(feature = "alloc")]
pub fn send(endpoint: EndpointId, msg: SmallMessage) -> Result<()> {
    let guard = REGISTRY.lock();
    let registry = guard.as_ref().ok_or(IpcError::EndpointNotFound)?;
    let ep = registry
        .endpoints
        .get(&endpoint)
        .ok_or(IpcError::EndpointNotFound)?;
    if !ep.is_active() {
        return Err(IpcError::EndpointNotFound);
    }
    let mut queue = ep.queue.lock();
    if queue.len() >= MAX_ENDPOINT_QUEUE_SIZE {
        return Err(IpcError::EndpointBusy);
    }
    queue.push_back(msg);
    Ok(())
}

/// Dequeue the next message from `endpoint`, or `WouldBlock` if empty.
#[cfg(feature = "alloc")]
pub fn receive(endpoint: EndpointId) -> Result<SmallMessage> {
    let guard = REGISTRY.lock();
    let registry = guard.as_ref().ok_or(IpcError::EndpointNotFound)?;
    let ep = registry
        .endpoints
        .get(&endpoint)
        .ok_or(IpcError::EndpointNotFound)?;
    ep.queue.lock().pop_front().ok_or(IpcError::WouldBlock)
}

/// Remove every endpoint owned by `pid`, returning how many were removed.
///
/// Called during process teardown so a dead process's endpoints don't
/// linger in the registry.
#[cfg(feature = "alloc")]
pub fn remove_process_endpoints(pid: ProcessId) -> Result<usize> {
    let mut guard = REGISTRY.lock();
    let registry = guard.as_mut().ok_or(IpcError::ProcessNotFound)?;
    let ids = registry.process_endpoints.remove(&pid).unwrap_or_default();
    for id in &ids {
        registry.endpoints.remove(id);
    }
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_small_message_size() {
        assert!(SmallMessage::size() <= 64);
    }

    #[cfg(feature = "alloc")]
    #[test_case]
    fn test_endpoint_create_and_send() {
        init();
        let owner = ProcessId(1);
        let id = create_endpoint(owner).expect("create endpoint");
        send(id, SmallMessage::new(0, 1)).expect("send");
        let msg = receive(id).expect("receive");
        assert_eq!(msg.opcode, 1);
        remove_process_endpoints(owner).expect("remove");
    }
}
