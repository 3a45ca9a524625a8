//! TCP protocol implementation
//!
//! A per-socket finite state machine over IPv4, with a fixed-size socket
//! pool, a lazily-allocated ring receive buffer per connection, and
//! blocking `connect`/`recv` driven by the global millisecond clock.
//! Reassembly of out-of-order segments is not attempted: a segment that
//! does not land exactly at the expected sequence number is dropped and
//! a duplicate ACK is sent to prod the peer into retransmitting.

use alloc::vec::Vec;

use spin::Mutex;

use super::{ip::IpProtocol, IpAddress, Ipv4Address, SocketAddr};
use crate::error::KernelError;

/// TCP header flags
#[derive(Debug, Clone, Copy)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    pub fn has(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// TCP connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Fixed upper bound on simultaneously-open TCP sockets.
const MAX_TCP_SOCKETS: usize = 256;

/// Capacity in bytes of a connection's receive ring buffer.
const RECV_RING_CAPACITY: usize = 16384;

/// Ephemeral port range used by auto-bind on an unbound active `connect`.
const EPHEMERAL_PORT_START: u16 = 49152;
const EPHEMERAL_PORT_END: u16 = 65535;

/// Number of SYN retransmits attempted before `connect` gives up.
const MAX_RETRANSMITS: u32 = 5;

/// Silence, in milliseconds, before an unacked segment is retransmitted.
const RETRANSMIT_TIMEOUT_MS: u64 = 1000;

/// A receive-side ring buffer. Allocated on first incoming data so that a
/// socket that never receives anything costs nothing beyond its header.
struct RecvRing {
    buf: Option<Vec<u8>>,
    head: usize,
    tail: usize,
    len: usize,
}

impl RecvRing {
    const fn new() -> Self {
        Self {
            buf: None,
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Append as much of `data` as fits; returns the number of bytes
    /// actually absorbed.
    fn push(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let buf = self
            .buf
            .get_or_insert_with(|| alloc::vec![0u8; RECV_RING_CAPACITY]);
        let cap = buf.len();
        let mut written = 0;
        for &byte in data {
            if self.len >= cap {
                break;
            }
            buf[self.tail] = byte;
            self.tail = (self.tail + 1) % cap;
            self.len += 1;
            written += 1;
        }
        written
    }

    /// Drain up to `out.len()` bytes into `out`; returns bytes copied.
    fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let cap = match &self.buf {
            Some(b) => b.len(),
            None => return 0,
        };
        let buf = self.buf.as_ref().unwrap();
        let mut n = 0;
        while n < out.len() && self.len > 0 {
            out[n] = buf[self.head];
            self.head = (self.head + 1) % cap;
            self.len -= 1;
            n += 1;
        }
        n
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn capacity(&self) -> usize {
        self.buf.as_ref().map(|b| b.len()).unwrap_or(RECV_RING_CAPACITY)
    }
}

/// A pending, not-yet-accepted connection queued on a listening socket.
struct PendingConn {
    remote: SocketAddr,
    remote_isn: u32,
}

/// The most recently sent segment that has not yet been acknowledged.
/// Retransmitted verbatim (same sequence number) if no ACK covering it
/// arrives within [`RETRANSMIT_TIMEOUT_MS`].
struct PendingSegment {
    flags: u8,
    seq: u32,
    payload: Vec<u8>,
}

/// A single TCP connection's full state.
struct TcpSocket {
    local: SocketAddr,
    remote: SocketAddr,
    state: TcpState,
    /// Next sequence number this side will send.
    send_next: u32,
    /// Initial sequence number this side chose (for SYN retransmit rollback).
    iss: u32,
    /// Next sequence number expected from the peer (our outgoing ack field).
    recv_next: u32,
    recv_ring: RecvRing,
    window: u16,
    error: bool,
    bound: bool,
    backlog: Vec<PendingConn>,
    accept_queue: Vec<usize>,
    /// Tick (ms) of the last segment we sent that is still unacknowledged.
    last_send_tick: u64,
    retransmit_count: u32,
    /// True once the peer's FIN has been absorbed (used to report EOF).
    peer_fin_seen: bool,
    /// Last data/FIN segment sent, pending acknowledgment; cleared once an
    /// ACK covering it arrives. The handshake SYN is retransmitted by
    /// `connect`'s own poll loop rather than through this field.
    pending: Option<PendingSegment>,
}

impl TcpSocket {
    fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local,
            remote,
            state: TcpState::Closed,
            send_next: 0,
            iss: 0,
            recv_next: 0,
            recv_ring: RecvRing::new(),
            window: RECV_RING_CAPACITY as u16,
            error: false,
            bound: false,
            backlog: Vec::new(),
            accept_queue: Vec::new(),
            last_send_tick: 0,
            retransmit_count: 0,
            peer_fin_seen: false,
            pending: None,
        }
    }
}

/// Global fixed-size socket pool. `None` marks a free slot; the slot
/// index doubles as the socket id.
static SOCKETS: Mutex<Vec<Option<TcpSocket>>> = Mutex::new(Vec::new());

/// Initialize TCP
pub fn init() -> Result<(), KernelError> {
    println!("[TCP] Initializing TCP protocol...");
    let mut sockets = SOCKETS.lock();
    if sockets.is_empty() {
        sockets.resize_with(MAX_TCP_SOCKETS, || None);
    }
    println!("[TCP] TCP initialized");
    Ok(())
}

/// Allocate a new, unconnected socket in the pool. Returns its id.
pub fn create_socket() -> Result<usize, KernelError> {
    let mut sockets = SOCKETS.lock();
    let slot = sockets
        .iter()
        .position(|s| s.is_none())
        .ok_or(KernelError::ResourceExhausted {
            resource: "tcp_sockets",
        })?;
    let unspecified = SocketAddr::v4(Ipv4Address::UNSPECIFIED, 0);
    sockets[slot] = Some(TcpSocket::new(unspecified, unspecified));
    Ok(slot)
}

/// Look up the (local, remote) address pair of a socket, for callers
/// (the generic socket layer) that only see the pool index.
pub fn local_remote(id: usize) -> Result<(SocketAddr, SocketAddr), KernelError> {
    with_socket(id, |s| (s.local, s.remote))
}

/// Destroy a socket, freeing its pool slot.
pub fn destroy_socket(id: usize) {
    let mut sockets = SOCKETS.lock();
    if let Some(slot) = sockets.get_mut(id) {
        *slot = None;
    }
}

fn with_socket<R>(id: usize, f: impl FnOnce(&mut TcpSocket) -> R) -> Result<R, KernelError> {
    let mut sockets = SOCKETS.lock();
    let socket = sockets
        .get_mut(id)
        .and_then(|s| s.as_mut())
        .ok_or(KernelError::NotFound {
            resource: "tcp_socket",
            id: id as u64,
        })?;
    Ok(f(socket))
}

/// Bind a socket to a local address.
pub fn bind(id: usize, local: SocketAddr) -> Result<(), KernelError> {
    with_socket(id, |s| {
        s.local = local;
        s.bound = true;
    })
}

/// Put a socket into passive-open LISTEN.
pub fn listen(id: usize, _backlog: usize) -> Result<(), KernelError> {
    with_socket(id, |s| {
        s.state = TcpState::Listen;
    })
}

/// Pick the next free ephemeral port, wrapping around the range.
fn next_ephemeral_port() -> u16 {
    static NEXT: core::sync::atomic::AtomicU16 =
        core::sync::atomic::AtomicU16::new(EPHEMERAL_PORT_START);
    loop {
        let port = NEXT.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        let port = if port < EPHEMERAL_PORT_START || port > EPHEMERAL_PORT_END {
            NEXT.store(EPHEMERAL_PORT_START + 1, core::sync::atomic::Ordering::Relaxed);
            EPHEMERAL_PORT_START
        } else {
            port
        };
        return port;
    }
}

fn generate_initial_seq() -> u32 {
    static COUNTER: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(1_000_000);
    COUNTER.fetch_add(6400, core::sync::atomic::Ordering::Relaxed)
}

/// Blocking active open: resolve the route and next-hop MAC, send SYN,
/// and poll until the handshake completes, the socket errors out, or
/// `timeout_ms` elapses.
///
/// Implements the retry policy in full: up to [`MAX_RETRANSMITS`] resends
/// of the SYN, each triggered by one second of silence.
pub fn connect(id: usize, remote: SocketAddr, timeout_ms: u64) -> Result<(), KernelError> {
    let IpAddress::V4(remote_ip) = remote.ip() else {
        return Err(KernelError::NotImplemented {
            feature: "ipv6_tcp",
        });
    };

    // Auto-bind to an ephemeral port if the socket is still unbound.
    let needs_bind = with_socket(id, |s| !s.bound)?;
    if needs_bind {
        bind(id, SocketAddr::v4(Ipv4Address::UNSPECIFIED, next_ephemeral_port()))?;
    }

    let next_hop = super::ip::route(remote_ip)?;
    super::arp::resolve_blocking(next_hop, timeout_ms)?;

    let iss = generate_initial_seq();
    let now = crate::timer::get_uptime_ms();
    with_socket(id, |s| {
        s.remote = remote;
        s.state = TcpState::SynSent;
        s.iss = iss;
        s.send_next = iss;
        s.retransmit_count = 0;
        s.last_send_tick = now;
    })?;

    send_segment(id, TcpFlags::SYN, &[])?;

    let start = crate::timer::get_uptime_ms();
    loop {
        let (state, error, retransmits) = with_socket(id, |s| (s.state, s.error, s.retransmit_count))?;

        if error {
            destroy_socket(id);
            return Err(KernelError::BrokenPipe);
        }
        if state == TcpState::Established {
            return Ok(());
        }
        if state == TcpState::Closed {
            return Err(KernelError::BrokenPipe);
        }

        let elapsed = crate::timer::get_uptime_ms().saturating_sub(start);
        if elapsed >= timeout_ms {
            with_socket(id, |s| s.state = TcpState::Closed).ok();
            return Err(KernelError::Timeout {
                operation: "tcp_connect",
                duration_ms: timeout_ms,
            });
        }

        let since_send = crate::timer::get_uptime_ms().saturating_sub(
            with_socket(id, |s| s.last_send_tick)?,
        );
        if since_send >= RETRANSMIT_TIMEOUT_MS {
            if retransmits >= MAX_RETRANSMITS {
                with_socket(id, |s| s.state = TcpState::Closed).ok();
                return Err(KernelError::Timeout {
                    operation: "tcp_connect",
                    duration_ms: timeout_ms,
                });
            }
            // Unacked SYN: roll the sequence number back and resend.
            let now = crate::timer::get_uptime_ms();
            with_socket(id, |s| {
                s.send_next = s.send_next.wrapping_sub(1);
                s.retransmit_count += 1;
                s.last_send_tick = now;
            })?;
            send_segment(id, TcpFlags::SYN, &[])?;
        }

        crate::sched::yield_cpu();
    }
}

/// Accept a connection off a listening socket's backlog, non-blocking.
pub fn accept(id: usize) -> Result<usize, KernelError> {
    let mut sockets = SOCKETS.lock();
    let listener = sockets
        .get_mut(id)
        .and_then(|s| s.as_mut())
        .ok_or(KernelError::NotFound {
            resource: "tcp_socket",
            id: id as u64,
        })?;

    if listener.state != TcpState::Listen {
        return Err(KernelError::InvalidState {
            expected: "Listen",
            actual: "Other",
        });
    }

    let child_id = listener.accept_queue.first().copied();
    if let Some(child_id) = child_id {
        listener.accept_queue.remove(0);
        return Ok(child_id);
    }

    Err(KernelError::WouldBlock)
}

/// Transmit application data over an established connection.
pub fn send(id: usize, data: &[u8]) -> Result<usize, KernelError> {
    let state = with_socket(id, |s| s.state)?;
    if state != TcpState::Established {
        return Err(KernelError::InvalidState {
            expected: "Established",
            actual: "Other",
        });
    }

    let seq = with_socket(id, |s| s.send_next)?;
    send_segment(id, TcpFlags::ACK | TcpFlags::PSH, data)?;
    let now = crate::timer::get_uptime_ms();
    with_socket(id, |s| {
        s.send_next = s.send_next.wrapping_add(data.len() as u32);
        s.last_send_tick = now;
        s.pending = Some(PendingSegment {
            flags: TcpFlags::ACK | TcpFlags::PSH,
            seq,
            payload: data.to_vec(),
        });
    })?;
    Ok(data.len())
}

/// Blocking receive: drains the ring buffer, waiting for data up to
/// `timeout_ms`. Returns `Ok(0)` both on a clean EOF (peer closed, ring
/// empty) and on timeout; callers distinguish the two via socket state.
pub fn recv(id: usize, buffer: &mut [u8], timeout_ms: u64) -> Result<usize, KernelError> {
    let start = crate::timer::get_uptime_ms();
    loop {
        let (n, state, error) = with_socket(id, |s| {
            let n = s.recv_ring.pop_into(buffer);
            (n, s.state, s.error)
        })?;

        if n > 0 {
            return Ok(n);
        }
        if error {
            return Err(KernelError::BrokenPipe);
        }
        if matches!(state, TcpState::Closed | TcpState::CloseWait) {
            return Ok(0);
        }

        if crate::timer::get_uptime_ms().saturating_sub(start) >= timeout_ms {
            return Ok(0);
        }

        crate::sched::yield_cpu();
    }
}

/// Active close, driving the FSM's local-close transitions.
pub fn close(id: usize) -> Result<(), KernelError> {
    let state = with_socket(id, |s| s.state)?;
    match state {
        TcpState::Established => {
            let seq = with_socket(id, |s| s.send_next)?;
            send_segment(id, TcpFlags::FIN | TcpFlags::ACK, &[])?;
            let now = crate::timer::get_uptime_ms();
            with_socket(id, |s| {
                s.send_next = s.send_next.wrapping_add(1);
                s.state = TcpState::FinWait1;
                s.last_send_tick = now;
                s.pending = Some(PendingSegment {
                    flags: TcpFlags::FIN | TcpFlags::ACK,
                    seq,
                    payload: Vec::new(),
                });
            })?;
            Ok(())
        }
        TcpState::CloseWait => {
            let seq = with_socket(id, |s| s.send_next)?;
            send_segment(id, TcpFlags::FIN | TcpFlags::ACK, &[])?;
            let now = crate::timer::get_uptime_ms();
            with_socket(id, |s| {
                s.send_next = s.send_next.wrapping_add(1);
                s.state = TcpState::LastAck;
                s.last_send_tick = now;
                s.pending = Some(PendingSegment {
                    flags: TcpFlags::FIN | TcpFlags::ACK,
                    seq,
                    payload: Vec::new(),
                });
            })?;
            Ok(())
        }
        TcpState::Listen | TcpState::SynSent | TcpState::Closed => {
            with_socket(id, |s| s.state = TcpState::Closed)?;
            destroy_socket(id);
            Ok(())
        }
        _ => Err(KernelError::InvalidState {
            expected: "Established or CloseWait",
            actual: "Other",
        }),
    }
}

/// Build and transmit one TCP segment for socket `id`.
fn send_segment(id: usize, flags: u8, payload: &[u8]) -> Result<(), KernelError> {
    let (local, remote, seq, ack) = with_socket(id, |s| (s.local, s.remote, s.send_next, s.recv_next))?;

    let IpAddress::V4(src_ip) = local.ip() else {
        return Err(KernelError::NotImplemented {
            feature: "ipv6_tcp",
        });
    };
    let IpAddress::V4(dst_ip) = remote.ip() else {
        return Err(KernelError::NotImplemented {
            feature: "ipv6_tcp",
        });
    };

    let segment = build_segment(
        local.port(),
        remote.port(),
        seq,
        ack,
        flags,
        RECV_RING_CAPACITY as u16,
        payload,
        src_ip,
        dst_ip,
    );

    super::ip::send(IpAddress::V4(dst_ip), IpProtocol::Tcp, &segment)
}

/// Construct a 20-byte TCP header (no options) plus payload, with the
/// checksum computed over the standard IPv4 pseudo-header.
#[allow(clippy::too_many_arguments)]
fn build_segment(
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    payload: &[u8],
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
) -> Vec<u8> {
    let mut segment = Vec::with_capacity(20 + payload.len());
    segment.extend_from_slice(&src_port.to_be_bytes());
    segment.extend_from_slice(&dst_port.to_be_bytes());
    segment.extend_from_slice(&seq.to_be_bytes());
    segment.extend_from_slice(&ack.to_be_bytes());
    segment.push(5 << 4); // data offset = 5 words, no options
    segment.push(flags);
    segment.extend_from_slice(&window.to_be_bytes());
    segment.extend_from_slice(&0u16.to_be_bytes()); // checksum placeholder
    segment.extend_from_slice(&0u16.to_be_bytes()); // urgent pointer
    segment.extend_from_slice(payload);

    let checksum = tcp_checksum(src_ip, dst_ip, &segment);
    segment[16..18].copy_from_slice(&checksum.to_be_bytes());
    segment
}

/// Compute the TCP checksum: the standard pseudo-header (source IP,
/// destination IP, zero byte, protocol, TCP length) prefixed to the
/// segment, summed as 16-bit words with end-around carry and
/// one's-complemented.
fn tcp_checksum(src: Ipv4Address, dst: Ipv4Address, segment: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let add_words = |sum: &mut u32, bytes: &[u8]| {
        let mut iter = bytes.chunks_exact(2);
        for chunk in &mut iter {
            *sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }
        if let [last] = iter.remainder() {
            *sum += (*last as u32) << 8;
        }
    };

    add_words(&mut sum, &src.0);
    add_words(&mut sum, &dst.0);
    sum += IpProtocol::Tcp as u32;
    sum += segment.len() as u32;
    add_words(&mut sum, segment);

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Find the pool index of the socket matching an incoming segment: an
/// established connection matching (local, remote) exactly, or a
/// listener bound to the destination port.
fn find_socket(sockets: &[Option<TcpSocket>], local: SocketAddr, remote: SocketAddr) -> Option<usize> {
    sockets.iter().position(|slot| match slot {
        Some(s) => {
            (s.local.port() == local.port() && s.remote == remote)
                || (s.state == TcpState::Listen && s.local.port() == local.port())
        }
        None => false,
    })
}

/// Process an incoming TCP segment, driving the per-socket FSM.
pub fn process_packet(
    src_addr: IpAddress,
    dst_addr: IpAddress,
    data: &[u8],
) -> Result<(), KernelError> {
    if data.len() < 20 {
        return Err(KernelError::InvalidArgument {
            name: "tcp_packet",
            value: "too_short",
        });
    }

    let (IpAddress::V4(src_ip), IpAddress::V4(dst_ip)) = (src_addr, dst_addr) else {
        return Ok(());
    };

    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let seq_num = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ack_num = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let data_offset = ((data[12] >> 4) * 4) as usize;
    let flags = TcpFlags::new(data[13]);

    if tcp_checksum(src_ip, dst_ip, data) != 0 {
        // Checksum failure: drop silently.
        return Ok(());
    }

    let remote = SocketAddr::v4(src_ip, src_port);
    let local = SocketAddr::v4(dst_ip, dst_port);
    let payload = if data.len() > data_offset {
        &data[data_offset..]
    } else {
        &[][..]
    };

    let mut sockets = SOCKETS.lock();
    let Some(idx) = find_socket(&sockets, local, remote) else {
        // No matching socket: bad-port. Reply with RST unless this
        // segment is itself a RST (never RST a RST).
        drop(sockets);
        if !flags.has(TcpFlags::RST) {
            let rst = build_segment(
                dst_port,
                src_port,
                ack_num,
                seq_num.wrapping_add(1),
                TcpFlags::RST,
                0,
                &[],
                dst_ip,
                src_ip,
            );
            let _ = super::ip::send(IpAddress::V4(src_ip), IpProtocol::Tcp, &rst);
        }
        return Ok(());
    };

    if flags.has(TcpFlags::RST) {
        let socket = sockets[idx].as_mut().unwrap();
        socket.state = TcpState::Closed;
        socket.error = true;
        return Ok(());
    }

    // Mutate state while holding the lock, recording which segment (if
    // any) needs to go out once it is released -- send_segment/ack_only
    // re-lock SOCKETS internally, so no transmission happens while
    // `sockets` is still held.
    let mut send_ack = false;
    let mut send_syn_ack = false;
    let mut new_conn = false;

    {
        let socket = sockets[idx].as_mut().unwrap();
        match socket.state {
            TcpState::Listen => {
                if flags.has(TcpFlags::SYN) && !flags.has(TcpFlags::ACK) {
                    socket.backlog.push(PendingConn {
                        remote,
                        remote_isn: seq_num,
                    });
                    new_conn = true;
                }
            }
            TcpState::SynSent => {
                if flags.has(TcpFlags::SYN) && flags.has(TcpFlags::ACK) {
                    socket.recv_next = seq_num.wrapping_add(1);
                    socket.send_next = ack_num;
                    socket.state = TcpState::Established;
                    socket.last_send_tick = crate::timer::get_uptime_ms();
                    send_ack = true;
                } else if flags.has(TcpFlags::SYN) {
                    // Simultaneous open.
                    socket.recv_next = seq_num.wrapping_add(1);
                    socket.state = TcpState::SynReceived;
                    send_syn_ack = true;
                }
            }
            TcpState::SynReceived => {
                if flags.has(TcpFlags::ACK) && ack_num == socket.send_next {
                    socket.state = TcpState::Established;
                }
            }
            TcpState::Established => {
                if flags.has(TcpFlags::ACK) && ack_num == socket.send_next {
                    socket.pending = None;
                    socket.retransmit_count = 0;
                }
                if !payload.is_empty() {
                    if seq_num == socket.recv_next {
                        let absorbed = socket.recv_ring.push(payload);
                        socket.recv_next = socket.recv_next.wrapping_add(absorbed as u32);
                    }
                    // Out-of-order payloads are dropped but still draw an ACK.
                    send_ack = true;
                }
                if flags.has(TcpFlags::FIN) {
                    socket.recv_next = socket.recv_next.wrapping_add(1);
                    socket.peer_fin_seen = true;
                    socket.state = TcpState::CloseWait;
                    send_ack = true;
                }
            }
            TcpState::FinWait1 => {
                if flags.has(TcpFlags::FIN) {
                    socket.recv_next = socket.recv_next.wrapping_add(1);
                    socket.state = TcpState::TimeWait;
                    send_ack = true;
                } else if flags.has(TcpFlags::ACK) && ack_num == socket.send_next {
                    socket.state = TcpState::FinWait2;
                    socket.pending = None;
                }
            }
            TcpState::FinWait2 => {
                if flags.has(TcpFlags::FIN) {
                    socket.recv_next = socket.recv_next.wrapping_add(1);
                    socket.state = TcpState::TimeWait;
                    send_ack = true;
                }
            }
            TcpState::LastAck => {
                if flags.has(TcpFlags::ACK) && ack_num == socket.send_next {
                    socket.state = TcpState::Closed;
                    socket.bound = false;
                    socket.pending = None;
                }
            }
            TcpState::CloseWait | TcpState::Closing | TcpState::TimeWait | TcpState::Closed => {
                // No action required beyond the RST handling already applied above.
            }
        }
    }

    drop(sockets);

    if new_conn {
        spawn_syn_received(local, remote, seq_num, idx)?;
    }
    if send_syn_ack {
        send_segment(idx, TcpFlags::SYN | TcpFlags::ACK, &[])?;
    }
    if send_ack {
        ack_only(idx)?;
    }
    // TIME_WAIT shortens to immediate CLOSED -- no MSL wait is observed.
    with_socket(idx, |s| {
        if s.state == TcpState::TimeWait {
            s.state = TcpState::Closed;
        }
    })
    .ok();

    Ok(())
}

/// Create the child socket for a fresh passive-open connection and push
/// it onto the listener's accept queue once the handshake completes.
fn spawn_syn_received(local: SocketAddr, remote: SocketAddr, remote_isn: u32, listener_idx: usize) -> Result<(), KernelError> {
    let child_id = create_socket()?;
    let iss = generate_initial_seq();
    with_socket(child_id, |s| {
        s.local = local;
        s.remote = remote;
        s.bound = true;
        s.state = TcpState::SynReceived;
        s.iss = iss;
        s.send_next = iss.wrapping_add(1);
        s.recv_next = remote_isn.wrapping_add(1);
    })?;
    send_segment(child_id, TcpFlags::SYN | TcpFlags::ACK, &[])?;

    let mut sockets = SOCKETS.lock();
    if let Some(listener) = sockets.get_mut(listener_idx).and_then(|s| s.as_mut()) {
        listener.accept_queue.push(child_id);
    }
    Ok(())
}

/// Send a bare ACK (no payload, no SYN/FIN) reflecting the socket's
/// current send/recv sequence numbers.
fn ack_only(id: usize) -> Result<(), KernelError> {
    send_segment(id, TcpFlags::ACK, &[])
}

/// Periodic housekeeping: retransmit any data/FIN segment that has gone
/// [`RETRANSMIT_TIMEOUT_MS`] without an acknowledging ACK. Called from the
/// network stack's tick handler, independent of any blocking `connect`
/// poll loop (which retransmits its own SYN).
pub fn tick() {
    let now = crate::timer::get_uptime_ms();
    let candidates: Vec<(usize, u8, u32, Vec<u8>)> = {
        let sockets = SOCKETS.lock();
        sockets
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let s = slot.as_ref()?;
                let pending = s.pending.as_ref()?;
                if now.saturating_sub(s.last_send_tick) < RETRANSMIT_TIMEOUT_MS {
                    return None;
                }
                if s.retransmit_count >= MAX_RETRANSMITS {
                    return None;
                }
                Some((idx, pending.flags, pending.seq, pending.payload.clone()))
            })
            .collect()
    };

    for (idx, flags, seq, payload) in candidates {
        with_socket(idx, |s| {
            s.retransmit_count += 1;
            s.last_send_tick = now;
        })
        .ok();
        // Resend at the original sequence number, not the socket's current
        // send_next (which has already advanced past this segment).
        if let Ok((local, remote, ack)) = with_socket(idx, |s| (s.local, s.remote, s.recv_next)) {
            if let (IpAddress::V4(src_ip), IpAddress::V4(dst_ip)) = (local.ip(), remote.ip()) {
                let segment = build_segment(
                    local.port(),
                    remote.port(),
                    seq,
                    ack,
                    flags,
                    RECV_RING_CAPACITY as u16,
                    &payload,
                    src_ip,
                    dst_ip,
                );
                let _ = super::ip::send(IpAddress::V4(dst_ip), IpProtocol::Tcp, &segment);
            }
        }
    }

    // Sockets that exhausted their retransmit budget are reported as errors.
    let mut sockets = SOCKETS.lock();
    for slot in sockets.iter_mut() {
        if let Some(s) = slot {
            if s.retransmit_count >= MAX_RETRANSMITS && s.pending.is_some() {
                s.error = true;
                s.pending = None;
            }
        }
    }
}

/// Get connection statistics
pub fn get_stats() -> TcpStats {
    let sockets = SOCKETS.lock();
    TcpStats {
        active_connections: sockets.iter().filter(|s| s.is_some()).count(),
        total_bytes_sent: 0,
        total_bytes_recv: 0,
        retransmissions: 0,
    }
}

/// TCP statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpStats {
    pub active_connections: usize,
    pub total_bytes_sent: u64,
    pub total_bytes_recv: u64,
    pub retransmissions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Address;

    #[test_case]
    fn test_tcp_flags() {
        let mut flags = TcpFlags::new(0);
        flags.set(TcpFlags::SYN);
        assert!(flags.has(TcpFlags::SYN));
        assert!(!flags.has(TcpFlags::ACK));
    }

    #[test_case]
    fn test_recv_ring_wraps() {
        let mut ring = RecvRing::new();
        assert_eq!(ring.push(b"hello"), 5);
        let mut out = [0u8; 5];
        assert_eq!(ring.pop_into(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert!(ring.is_empty());
    }

    #[test_case]
    fn test_checksum_self_consistent() {
        let src = Ipv4Address::new(10, 0, 0, 1);
        let dst = Ipv4Address::new(10, 0, 0, 2);
        let segment = build_segment(1234, 80, 0, 0, TcpFlags::SYN, 65535, &[], src, dst);
        assert_eq!(tcp_checksum(src, dst, &segment), 0);
    }

    #[test_case]
    fn test_new_socket_starts_closed() {
        let local = SocketAddr::v4(Ipv4Address::LOCALHOST, 8080);
        let remote = SocketAddr::v4(Ipv4Address::new(192, 168, 1, 1), 80);
        let sock = TcpSocket::new(local, remote);
        assert_eq!(sock.state, TcpState::Closed);
    }
}
