//! Socket API implementation
//!
//! A generic socket table sitting in front of the concrete transports:
//! `Stream` sockets are backed by a connection in [`super::tcp`]'s pool,
//! `Dgram` sockets are backed by a registration in [`super::udp`]'s
//! per-socket receive queue. `Raw` sockets are accepted at creation time
//! but every operation on one is unimplemented.

use alloc::collections::BTreeMap;

use spin::Mutex;

use super::SocketAddr;
use crate::error::KernelError;

/// Socket domain (address family)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDomain {
    /// IPv4 Internet protocols
    Inet,
    /// IPv6 Internet protocols
    Inet6,
    /// Unix domain sockets
    Unix,
}

/// Socket type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Stream socket (TCP)
    Stream,
    /// Datagram socket (UDP)
    Dgram,
    /// Raw socket
    Raw,
}

/// Socket protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtocol {
    /// Default protocol for socket type
    Default,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
}

/// Socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unbound,
    Bound,
    Listening,
    Connected,
    Closed,
}

/// Socket options
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub reuse_addr: bool,
    pub reuse_port: bool,
    pub broadcast: bool,
    pub keepalive: bool,
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
    pub recv_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_addr: false,
            reuse_port: false,
            broadcast: false,
            keepalive: false,
            recv_buffer_size: 65536,
            send_buffer_size: 65536,
            recv_timeout_ms: None,
            send_timeout_ms: None,
        }
    }
}

/// Default time a blocking `recv`/`connect`/`accept` waits before giving
/// up, in the absence of an explicit `SO_RCVTIMEO`/`SO_SNDTIMEO`.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Generic socket handle, as seen by callers outside the socket layer.
#[derive(Debug, Clone)]
pub struct Socket {
    pub id: usize,
    pub domain: SocketDomain,
    pub socket_type: SocketType,
    pub protocol: SocketProtocol,
    pub state: SocketState,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub options: SocketOptions,
    /// Pool index in `tcp::SOCKETS`, for `Stream` sockets only.
    tcp_id: Option<usize>,
}

impl Socket {
    /// Create a new socket
    pub fn new(
        domain: SocketDomain,
        socket_type: SocketType,
        protocol: SocketProtocol,
    ) -> Result<Self, KernelError> {
        // Validate domain/type/protocol combination
        match (domain, socket_type, protocol) {
            (SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp)
            | (SocketDomain::Inet, SocketType::Stream, SocketProtocol::Default)
            | (SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Udp)
            | (SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Default)
            | (SocketDomain::Inet, SocketType::Raw, _) => {}
            _ => {
                return Err(KernelError::InvalidArgument {
                    name: "socket_combination",
                    value: "unsupported",
                })
            }
        }

        Ok(Self {
            id: 0, // Will be assigned by socket table
            domain,
            socket_type,
            protocol,
            state: SocketState::Unbound,
            local_addr: None,
            remote_addr: None,
            options: SocketOptions::default(),
            tcp_id: None,
        })
    }

    /// Bind socket to local address
    pub fn bind(&mut self, addr: SocketAddr) -> Result<(), KernelError> {
        if self.state != SocketState::Unbound {
            return Err(KernelError::InvalidState {
                expected: "unbound",
                actual: "already_bound",
            });
        }

        self.local_addr = Some(addr);
        self.state = SocketState::Bound;
        Ok(())
    }

    /// Set socket option
    pub fn set_option(&mut self, option: SocketOption) -> Result<(), KernelError> {
        match option {
            SocketOption::ReuseAddr(val) => self.options.reuse_addr = val,
            SocketOption::ReusePort(val) => self.options.reuse_port = val,
            SocketOption::Broadcast(val) => self.options.broadcast = val,
            SocketOption::KeepAlive(val) => self.options.keepalive = val,
            SocketOption::RecvBufferSize(val) => self.options.recv_buffer_size = val,
            SocketOption::SendBufferSize(val) => self.options.send_buffer_size = val,
            SocketOption::RecvTimeout(val) => self.options.recv_timeout_ms = val,
            SocketOption::SendTimeout(val) => self.options.send_timeout_ms = val,
        }
        Ok(())
    }
}

/// Socket option values
#[derive(Debug, Clone)]
pub enum SocketOption {
    ReuseAddr(bool),
    ReusePort(bool),
    Broadcast(bool),
    KeepAlive(bool),
    RecvBufferSize(usize),
    SendBufferSize(usize),
    RecvTimeout(Option<u64>),
    SendTimeout(Option<u64>),
}

/// Socket table for managing all sockets, keyed by the id handed back to
/// userspace (the syscall layer treats this id as the file descriptor's
/// payload).
static SOCKET_TABLE: Mutex<BTreeMap<usize, Socket>> = Mutex::new(BTreeMap::new());
static NEXT_SOCKET_ID: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(1);

/// Initialize socket subsystem
pub fn init() -> Result<(), KernelError> {
    println!("[SOCKET] Initializing socket subsystem...");
    println!("[SOCKET] Socket subsystem initialized");
    Ok(())
}

fn alloc_id() -> usize {
    NEXT_SOCKET_ID.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
}

/// Create a new socket and return its ID
pub fn create_socket(
    domain: SocketDomain,
    socket_type: SocketType,
    protocol: SocketProtocol,
) -> Result<usize, KernelError> {
    let mut socket = Socket::new(domain, socket_type, protocol)?;
    let id = alloc_id();
    socket.id = id;

    if socket_type == SocketType::Stream {
        socket.tcp_id = Some(super::tcp::create_socket()?);
    }

    SOCKET_TABLE.lock().insert(id, socket);
    Ok(id)
}

/// Get a snapshot of a socket's state by ID
pub fn get_socket(id: usize) -> Result<Socket, KernelError> {
    SOCKET_TABLE
        .lock()
        .get(&id)
        .cloned()
        .ok_or(KernelError::NotFound {
            resource: "socket",
            id: id as u64,
        })
}

fn with_socket<R>(id: usize, f: impl FnOnce(&mut Socket) -> R) -> Result<R, KernelError> {
    let mut table = SOCKET_TABLE.lock();
    let socket = table.get_mut(&id).ok_or(KernelError::NotFound {
        resource: "socket",
        id: id as u64,
    })?;
    Ok(f(socket))
}

/// Bind a socket to a local address, registering it with the owning
/// transport so inbound traffic can find it.
pub fn bind(id: usize, addr: SocketAddr) -> Result<(), KernelError> {
    let socket_type = with_socket(id, |s| {
        s.bind(addr)?;
        Ok::<_, KernelError>(s.socket_type)
    })??;

    match socket_type {
        SocketType::Stream => {
            let tcp_id = with_socket(id, |s| s.tcp_id)?.ok_or(KernelError::InvalidState {
                expected: "tcp_backed",
                actual: "no_tcp_id",
            })?;
            super::tcp::bind(tcp_id, addr)
        }
        SocketType::Dgram => {
            super::udp::register_socket(id, addr);
            Ok(())
        }
        SocketType::Raw => Err(KernelError::NotImplemented {
            feature: "raw_socket_bind",
        }),
    }
}

/// Listen for connections (TCP only)
pub fn listen(id: usize, backlog: usize) -> Result<(), KernelError> {
    let (socket_type, state) = with_socket(id, |s| (s.socket_type, s.state))?;
    if socket_type != SocketType::Stream {
        return Err(KernelError::InvalidArgument {
            name: "socket_type",
            value: "not_stream",
        });
    }
    if state != SocketState::Bound {
        return Err(KernelError::InvalidState {
            expected: "bound",
            actual: "not_bound",
        });
    }

    let tcp_id = with_socket(id, |s| s.tcp_id)?.ok_or(KernelError::InvalidState {
        expected: "tcp_backed",
        actual: "no_tcp_id",
    })?;
    super::tcp::listen(tcp_id, backlog)?;
    with_socket(id, |s| s.state = SocketState::Listening)
}

/// Connect to remote address. Blocks (for `Stream` sockets) until the
/// handshake completes, fails, or [`DEFAULT_TIMEOUT_MS`] elapses.
pub fn connect(id: usize, addr: SocketAddr) -> Result<(), KernelError> {
    let socket_type = with_socket(id, |s| s.socket_type)?;
    let state = with_socket(id, |s| s.state)?;

    match state {
        SocketState::Unbound | SocketState::Bound => {}
        _ => {
            return Err(KernelError::InvalidState {
                expected: "unbound_or_bound",
                actual: "other",
            })
        }
    }

    match socket_type {
        SocketType::Stream => {
            let tcp_id = with_socket(id, |s| s.tcp_id)?.ok_or(KernelError::InvalidState {
                expected: "tcp_backed",
                actual: "no_tcp_id",
            })?;
            super::tcp::connect(tcp_id, addr, DEFAULT_TIMEOUT_MS)?;
            with_socket(id, |s| {
                s.remote_addr = Some(addr);
                s.state = SocketState::Connected;
            })
        }
        SocketType::Dgram => {
            // UDP "connect" only records a default peer; no handshake.
            if state == SocketState::Unbound {
                let local = SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0);
                bind(id, local)?;
            }
            with_socket(id, |s| {
                s.remote_addr = Some(addr);
                s.state = SocketState::Connected;
            })
        }
        SocketType::Raw => Err(KernelError::NotImplemented {
            feature: "raw_socket_connect",
        }),
    }
}

/// Accept an incoming connection (TCP only). Blocks until a pending
/// connection is available or [`DEFAULT_TIMEOUT_MS`] elapses.
pub fn accept(id: usize) -> Result<(usize, SocketAddr), KernelError> {
    let (socket_type, state, tcp_id) = with_socket(id, |s| (s.socket_type, s.state, s.tcp_id))?;
    if socket_type != SocketType::Stream {
        return Err(KernelError::InvalidArgument {
            name: "socket_type",
            value: "not_stream",
        });
    }
    if state != SocketState::Listening {
        return Err(KernelError::InvalidState {
            expected: "listening",
            actual: "not_listening",
        });
    }
    let tcp_id = tcp_id.ok_or(KernelError::InvalidState {
        expected: "tcp_backed",
        actual: "no_tcp_id",
    })?;

    let start = crate::timer::get_uptime_ms();
    let child_tcp_id = loop {
        match super::tcp::accept(tcp_id) {
            Ok(child) => break child,
            Err(KernelError::WouldBlock) => {
                if crate::timer::get_uptime_ms().saturating_sub(start) >= DEFAULT_TIMEOUT_MS {
                    return Err(KernelError::Timeout {
                        operation: "socket_accept",
                        duration_ms: DEFAULT_TIMEOUT_MS,
                    });
                }
                crate::sched::yield_cpu();
            }
            Err(e) => return Err(e),
        }
    };

    let remote = super::tcp::local_remote(child_tcp_id)?.1;
    let child_id = alloc_id();
    let child = Socket {
        id: child_id,
        domain: SocketDomain::Inet,
        socket_type: SocketType::Stream,
        protocol: SocketProtocol::Tcp,
        state: SocketState::Connected,
        local_addr: Some(super::tcp::local_remote(child_tcp_id)?.0),
        remote_addr: Some(remote),
        options: SocketOptions::default(),
        tcp_id: Some(child_tcp_id),
    };
    SOCKET_TABLE.lock().insert(child_id, child);
    Ok((child_id, remote))
}

/// Send data over a connected socket.
pub fn send(id: usize, data: &[u8]) -> Result<usize, KernelError> {
    let (socket_type, state, tcp_id, local, remote) =
        with_socket(id, |s| (s.socket_type, s.state, s.tcp_id, s.local_addr, s.remote_addr))?;

    if state != SocketState::Connected {
        return Err(KernelError::InvalidState {
            expected: "connected",
            actual: "not_connected",
        });
    }
    let remote = remote.ok_or(KernelError::InvalidState {
        expected: "remote_addr_set",
        actual: "no_remote_addr",
    })?;

    match socket_type {
        SocketType::Stream => {
            let tcp_id = tcp_id.ok_or(KernelError::InvalidState {
                expected: "tcp_backed",
                actual: "no_tcp_id",
            })?;
            super::tcp::send(tcp_id, data)
        }
        SocketType::Dgram => {
            let local = local.ok_or(KernelError::InvalidState {
                expected: "bound",
                actual: "unbound",
            })?;
            super::udp::send_packet(local, remote, data)
        }
        SocketType::Raw => Err(KernelError::NotImplemented {
            feature: "raw_socket_send",
        }),
    }
}

/// Send data to a specific address (UDP semantics; also usable on an
/// unconnected `Stream` socket is rejected as invalid).
pub fn sendto(id: usize, data: &[u8], dest: Option<&SocketAddr>) -> Result<usize, KernelError> {
    let (socket_type, local, remote, state) =
        with_socket(id, |s| (s.socket_type, s.local_addr, s.remote_addr, s.state))?;

    match socket_type {
        SocketType::Dgram => {
            let dest = match dest {
                Some(addr) => *addr,
                None => remote.ok_or(KernelError::InvalidState {
                    expected: "remote_addr_set",
                    actual: "no_remote_addr",
                })?,
            };
            let local = match local {
                Some(addr) => addr,
                None => {
                    let unspecified = SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0);
                    bind(id, unspecified)?;
                    unspecified
                }
            };
            super::udp::send_packet(local, dest, data)
        }
        SocketType::Stream => {
            if state != SocketState::Connected {
                return Err(KernelError::InvalidState {
                    expected: "connected",
                    actual: "not_connected",
                });
            }
            send(id, data)
        }
        SocketType::Raw => Err(KernelError::NotImplemented {
            feature: "raw_socket_sendto",
        }),
    }
}

/// Receive data on a connected socket.
pub fn recv(id: usize, buffer: &mut [u8]) -> Result<usize, KernelError> {
    let (socket_type, state, tcp_id) = with_socket(id, |s| (s.socket_type, s.state, s.tcp_id))?;

    match socket_type {
        SocketType::Stream => {
            if state != SocketState::Connected {
                return Err(KernelError::InvalidState {
                    expected: "connected",
                    actual: "not_connected",
                });
            }
            let tcp_id = tcp_id.ok_or(KernelError::InvalidState {
                expected: "tcp_backed",
                actual: "no_tcp_id",
            })?;
            super::tcp::recv(tcp_id, buffer, DEFAULT_TIMEOUT_MS)
        }
        SocketType::Dgram => recvfrom(id, buffer).map(|(n, _)| n),
        SocketType::Raw => Err(KernelError::NotImplemented {
            feature: "raw_socket_recv",
        }),
    }
}

/// Receive data with source address, blocking up to [`DEFAULT_TIMEOUT_MS`].
pub fn recvfrom(id: usize, buffer: &mut [u8]) -> Result<(usize, Option<SocketAddr>), KernelError> {
    let (socket_type, state) = with_socket(id, |s| (s.socket_type, s.state))?;
    if state == SocketState::Unbound {
        return Err(KernelError::InvalidState {
            expected: "bound",
            actual: "unbound",
        });
    }

    match socket_type {
        SocketType::Dgram => {
            let start = crate::timer::get_uptime_ms();
            loop {
                match super::udp::receive_from(id, buffer) {
                    Ok((n, from)) => return Ok((n, Some(from))),
                    Err(KernelError::WouldBlock) => {
                        if crate::timer::get_uptime_ms().saturating_sub(start) >= DEFAULT_TIMEOUT_MS {
                            return Ok((0, None));
                        }
                        crate::sched::yield_cpu();
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        SocketType::Stream => {
            let n = recv(id, buffer)?;
            let remote = with_socket(id, |s| s.remote_addr)?;
            Ok((n, remote))
        }
        SocketType::Raw => Err(KernelError::NotImplemented {
            feature: "raw_socket_recvfrom",
        }),
    }
}

/// Close socket, releasing any backing transport resources.
pub fn close(id: usize) -> Result<(), KernelError> {
    let socket = SOCKET_TABLE
        .lock()
        .remove(&id)
        .ok_or(KernelError::NotFound {
            resource: "socket",
            id: id as u64,
        })?;

    match socket.socket_type {
        SocketType::Stream => {
            if let Some(tcp_id) = socket.tcp_id {
                super::tcp::close(tcp_id)?;
            }
        }
        SocketType::Dgram => {
            super::udp::unregister_socket(id);
        }
        SocketType::Raw => {}
    }
    Ok(())
}

/// Get the local address bound to a socket.
pub fn getsockname(id: usize) -> Result<SocketAddr, KernelError> {
    with_socket(id, |s| s.local_addr)?.ok_or(KernelError::InvalidState {
        expected: "bound",
        actual: "unbound",
    })
}

/// Get the remote address of a connected socket.
pub fn getpeername(id: usize) -> Result<SocketAddr, KernelError> {
    with_socket(id, |s| s.remote_addr)?.ok_or(KernelError::InvalidState {
        expected: "connected",
        actual: "not_connected",
    })
}

/// Option levels understood by [`setsockopt`]/[`getsockopt`]. Mirrors the
/// handful of `SOL_SOCKET` option names this kernel's toy libc exposes.
const SOL_SOCKET: i32 = 1;
const SO_REUSEADDR: i32 = 2;
const SO_BROADCAST: i32 = 6;
const SO_KEEPALIVE: i32 = 9;
const SO_RCVBUF: i32 = 8;
const SO_SNDBUF: i32 = 7;

/// Apply a socket option read out of a user-space buffer. Only
/// `SOL_SOCKET`-level boolean/integer options are recognized; anything
/// else is rejected rather than silently ignored.
pub fn setsockopt(
    id: usize,
    level: i32,
    optname: i32,
    optval_ptr: usize,
    optlen: usize,
) -> Result<usize, KernelError> {
    if level != SOL_SOCKET {
        return Err(KernelError::NotImplemented {
            feature: "sockopt_level",
        });
    }
    if optlen < 4 {
        return Err(KernelError::InvalidArgument {
            name: "optlen",
            value: "too_short",
        });
    }
    let value = unsafe { *(optval_ptr as *const u32) };
    let flag = value != 0;

    with_socket(id, |s| match optname {
        SO_REUSEADDR => {
            s.options.reuse_addr = flag;
            Ok(())
        }
        SO_BROADCAST => {
            s.options.broadcast = flag;
            Ok(())
        }
        SO_KEEPALIVE => {
            s.options.keepalive = flag;
            Ok(())
        }
        SO_RCVBUF => {
            s.options.recv_buffer_size = value as usize;
            Ok(())
        }
        SO_SNDBUF => {
            s.options.send_buffer_size = value as usize;
            Ok(())
        }
        _ => Err(KernelError::NotImplemented {
            feature: "sockopt_name",
        }),
    })?
    .map(|_| 0)
}

/// Read a socket option into a user-space buffer; always writes a 4-byte
/// integer result.
pub fn getsockopt(
    id: usize,
    level: i32,
    optname: i32,
    optval_ptr: usize,
) -> Result<usize, KernelError> {
    if level != SOL_SOCKET {
        return Err(KernelError::NotImplemented {
            feature: "sockopt_level",
        });
    }

    let value: u32 = with_socket(id, |s| match optname {
        SO_REUSEADDR => Ok(s.options.reuse_addr as u32),
        SO_BROADCAST => Ok(s.options.broadcast as u32),
        SO_KEEPALIVE => Ok(s.options.keepalive as u32),
        SO_RCVBUF => Ok(s.options.recv_buffer_size as u32),
        SO_SNDBUF => Ok(s.options.send_buffer_size as u32),
        _ => Err(KernelError::NotImplemented {
            feature: "sockopt_name",
        }),
    })??;

    unsafe {
        *(optval_ptr as *mut u32) = value;
    }
    Ok(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Address;

    #[test_case]
    fn test_socket_creation() {
        let socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        assert_eq!(socket.state, SocketState::Unbound);
        assert_eq!(socket.socket_type, SocketType::Stream);
    }

    #[test_case]
    fn test_socket_bind() {
        let mut socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        let addr = SocketAddr::v4(Ipv4Address::LOCALHOST, 8080);

        assert_eq!(socket.state, SocketState::Unbound);
        socket.bind(addr).unwrap();
        assert_eq!(socket.state, SocketState::Bound);
        assert_eq!(socket.local_addr, Some(addr));
    }
}
