// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP socket session: one bind-to-close lifetime of a single endpoint.
//!
//! The session encodes the ordering constraints the socket API imposes:
//!
//! - a session is bound exactly once; rebinding requires a fresh instance,
//!   because several options set on a live socket are not revocable;
//! - multicast membership is only attempted while Bound - a join requested
//!   earlier is deferred, not failed;
//! - the multicast send interface, once applied, is only ever replaced,
//!   never cleared, for the lifetime of the instance;
//! - the multicast loopback option is meaningless before bind and is
//!   explicitly reset to disabled as part of `bind`.
//!
//! The socket runs in non-blocking mode: `receive_one` drains at most one
//! pending datagram and returns `None` on an empty queue. A readiness
//! notification can fire with nothing actually retrievable (a datagram
//! dropped on checksum, for instance) - the receive loop treats that as a
//! spurious wake and probes again; this module just reports the empty read.

use crate::config::{BindConfig, MulticastJoinConfig, TtlConfig, MAX_DATAGRAM_SIZE, RECV_BUFFER_SIZE};
use crate::datagram::Datagram;
use crate::error::{BindError, JoinError, SendError};
use crate::net::iface::NetworkInterface;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::SystemTime;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet bound.
    Unbound,
    /// Bound to a local endpoint; all operations available.
    Bound,
    /// Closed; the instance is spent and must be discarded.
    Closed,
}

/// Result of a join request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Membership established for the group.
    Joined(Ipv4Addr),
    /// Join requested before bind completed; retry after binding. No OS
    /// call was made.
    Deferred,
    /// Membership not requested (`enabled == false`).
    Skipped,
}

/// One UDP endpoint, bound at most once, discarded after close.
#[derive(Debug)]
pub struct UdpSession {
    state: SessionState,
    socket: Option<UdpSocket>,
    local_addr: Option<SocketAddr>,
    joined_group: Option<Ipv4Addr>,
    send_interface: Option<Ipv4Addr>,
    ttl: TtlConfig,
}

impl Default for UdpSession {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Lifecycle =====

impl UdpSession {
    /// Create a fresh, unbound session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Unbound,
            socket: None,
            local_addr: None,
            joined_group: None,
            send_interface: None,
            ttl: TtlConfig::from_env(),
        }
    }

    /// Bind the session to its local endpoint.
    ///
    /// Multicast loopback is explicitly disabled before the OS bind (the
    /// option is meaningless pre-bind and must be re-established after via
    /// [`set_loopback`](Self::set_loopback)). Address sharing is resolved
    /// per [`BindConfig::effective_share`]; SO_BROADCAST is enabled so
    /// limited-broadcast destinations work without further setup.
    ///
    /// On failure the instance is spent: it transitions to Closed and must
    /// be discarded, not retried. Calling `bind` on a session that is not
    /// fresh is a controller defect and halts.
    pub fn bind(&mut self, config: &BindConfig) -> Result<(), BindError> {
        assert!(
            self.state == SessionState::Unbound,
            "bind on a session that is not fresh (state={:?})",
            self.state
        );

        match Self::bind_socket(config, self.ttl) {
            Ok((socket, local_addr)) => {
                log::debug!(
                    "[SESSION] bound addr={} share={} ttl={}",
                    local_addr,
                    config.effective_share(),
                    self.ttl.multicast
                );
                self.socket = Some(socket);
                self.local_addr = Some(local_addr);
                self.state = SessionState::Bound;
                Ok(())
            }
            Err(err) => {
                log::debug!("[SESSION] bind failed: {}", err);
                self.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    /// Socket construction and the OS bind, in the order the options
    /// require.
    fn bind_socket(config: &BindConfig, ttl: TtlConfig) -> Result<(UdpSocket, SocketAddr), BindError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        // Loopback option reset; only meaningful once bound
        socket.set_multicast_loop_v4(false)?;

        let share = config.effective_share();
        socket.set_reuse_address(share)?;
        #[cfg(unix)]
        if config.share_address && !config.dont_share_address {
            set_reuseport(&socket)?;
            log::debug!("[SESSION] SO_REUSEPORT enabled (share mode)");
        }

        socket.set_broadcast(true)?;

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(
            config.resolved_addr(),
            config.resolved_port(),
        ));
        if let Err(err) = socket.bind(&bind_addr.into()) {
            return Err(match err.kind() {
                io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => {
                    BindError::AddressInvalid(bind_addr.to_string())
                }
                _ => BindError::Os(err),
            });
        }

        socket.set_nonblocking(true)?;
        socket.set_multicast_ttl_v4(u32::from(ttl.multicast))?;
        #[cfg(target_os = "linux")]
        enable_pktinfo(&socket)?;

        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;
        Ok((socket, local_addr))
    }

    /// Close the session and release the OS resource.
    ///
    /// The caller guarantees a single close per instance; the instance is
    /// discarded afterwards and never reused.
    pub fn close(&mut self) {
        if let Some(addr) = self.local_addr {
            log::debug!("[SESSION] closed addr={}", addr);
        }
        self.socket = None;
        self.state = SessionState::Closed;
    }
}

// ===== Multicast membership and options =====

impl UdpSession {
    /// Request multicast group membership.
    ///
    /// Returns [`JoinOutcome::Skipped`] when membership is not requested,
    /// [`JoinOutcome::Deferred`] (with zero OS calls) when the session is
    /// not yet bound - the controller retries right after bind - and
    /// [`JoinOutcome::Joined`] on success.
    ///
    /// A join failure is not fatal to the session; the caller decides
    /// whether to keep receiving without the membership. Prior memberships
    /// on this instance are not left before a new join: extra joins
    /// accumulate at the OS level, and only the most recent group is
    /// recorded. The only clean reset is a fresh session.
    pub fn join_group(&mut self, config: &MulticastJoinConfig) -> Result<JoinOutcome, JoinError> {
        if !config.enabled {
            return Ok(JoinOutcome::Skipped);
        }
        if self.state != SessionState::Bound {
            log::debug!(
                "[SESSION] join deferred group={} (not bound yet)",
                config.group
            );
            return Ok(JoinOutcome::Deferred);
        }
        if !config.group.is_multicast() {
            return Err(JoinError::NotMulticast(config.group));
        }

        let iface_addr = config
            .interface
            .as_ref()
            .and_then(NetworkInterface::primary_ipv4)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let socket = self.socket.as_ref().expect("bound session owns a socket");
        match socket.join_multicast_v4(&config.group, &iface_addr) {
            Ok(()) => {
                log::debug!(
                    "[SESSION] joined group={} iface={}",
                    config.group,
                    iface_addr
                );
                self.joined_group = Some(config.group);
                Ok(JoinOutcome::Joined(config.group))
            }
            Err(err) => {
                log::debug!(
                    "[SESSION] join failed group={} iface={} err={}",
                    config.group,
                    iface_addr,
                    err
                );
                Err(JoinError::Os(err))
            }
        }
    }

    /// Select the interface used for outgoing multicast.
    ///
    /// Silently skipped while not bound (the option is meaningless then;
    /// presentation events may fire before bind). Once applied, the
    /// setting is only ever replaced, never cleared - recreate the session
    /// to reset it.
    pub fn set_send_interface(&mut self, iface: &NetworkInterface) {
        let Some(addr) = iface.primary_ipv4() else {
            log::debug!(
                "[SESSION] send interface {} has no IPv4 address, skipped",
                iface.name
            );
            return;
        };
        self.set_send_interface_addr(addr);
    }

    /// Address-level variant of [`set_send_interface`](Self::set_send_interface)
    /// (used by the `UDPCAST_MULTICAST_IF` override).
    pub fn set_send_interface_addr(&mut self, addr: Ipv4Addr) {
        if self.state != SessionState::Bound {
            log::debug!("[SESSION] send interface skipped (not bound)");
            return;
        }
        let socket = self.socket.as_ref().expect("bound session owns a socket");
        match SockRef::from(socket).set_multicast_if_v4(&addr) {
            Ok(()) => {
                log::debug!("[SESSION] multicast send interface={}", addr);
                self.send_interface = Some(addr);
            }
            Err(err) => {
                log::debug!("[SESSION] set send interface {} failed: {}", addr, err);
            }
        }
    }

    /// Toggle multicast loopback.
    ///
    /// Meaningful only while bound; applying earlier has no effect (and
    /// `bind` resets the option to disabled anyway).
    pub fn set_loopback(&mut self, enabled: bool) {
        if self.state != SessionState::Bound {
            log::debug!("[SESSION] loopback option skipped (not bound)");
            return;
        }
        let socket = self.socket.as_ref().expect("bound session owns a socket");
        if let Err(err) = socket.set_multicast_loop_v4(enabled) {
            log::debug!("[SESSION] set loopback={} failed: {}", enabled, err);
        }
    }
}

// ===== Send / receive =====

impl UdpSession {
    /// Send one datagram.
    ///
    /// The payload is capped at [`MAX_DATAGRAM_SIZE`] bytes before the OS
    /// write is attempted. A failed or short write is reported, not
    /// thrown: one failed transmission does not stop a periodic schedule.
    pub fn send(&mut self, payload: &[u8], destination: SocketAddr) -> Result<usize, SendError> {
        assert!(
            self.state == SessionState::Bound,
            "send on a session that is not bound (state={:?})",
            self.state
        );
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(SendError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let socket = self.socket.as_ref().expect("bound session owns a socket");
        let written = socket.send_to(payload, destination)?;
        if written != payload.len() {
            return Err(SendError::ShortWrite {
                written,
                expected: payload.len(),
            });
        }
        log::debug!(
            "[SESSION] sent len={} dest={} iface={}",
            written,
            destination,
            self.format_send_iface()
        );
        Ok(written)
    }

    /// Drain one pending datagram, if any.
    ///
    /// Returns `None` when nothing is retrievable. That covers both the
    /// genuine empty queue and the readiness artifact where a notification
    /// fired for a datagram the kernel then discarded - distinguishing the
    /// two is the receive loop's job, this primitive just reports what it
    /// found. Read errors other than an empty queue are logged and mapped
    /// to `None` as well (UDP has no recoverable read-error state).
    pub fn receive_one(&mut self) -> Option<Datagram> {
        if self.state != SessionState::Bound {
            return None;
        }
        let socket = self.socket.as_ref().expect("bound session owns a socket");
        let local = self.local_addr.expect("bound session has a local address");

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, sender, pkt_dest) = match recv_with_destination(socket, &mut buf) {
            Ok(result) => result,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return None,
            Err(err) => {
                log::debug!("[SESSION] recv error: {}", err);
                return None;
            }
        };

        // Destination falls back to the bound address when the platform
        // offers no per-packet info
        let dest_ip = pkt_dest.unwrap_or(match local {
            SocketAddr::V4(v4) => *v4.ip(),
            SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        });
        let destination = SocketAddr::V4(SocketAddrV4::new(dest_ip, local.port()));
        log::debug!(
            "[SESSION] recv len={} src={} dest={}",
            len,
            sender,
            destination
        );

        Some(Datagram {
            payload: buf[..len].to_vec(),
            sender,
            destination,
            received_at: SystemTime::now(),
        })
    }
}

// ===== Accessors =====

impl UdpSession {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Local endpoint after a successful bind.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Most recently joined multicast group.
    #[must_use]
    pub fn joined_group(&self) -> Option<Ipv4Addr> {
        self.joined_group
    }

    /// Multicast send interface, once applied.
    #[must_use]
    pub fn send_interface(&self) -> Option<Ipv4Addr> {
        self.send_interface
    }

    /// Clone of the underlying socket for event-loop registration.
    pub fn try_clone_socket(&self) -> io::Result<UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "session is not bound"))?
            .try_clone()
    }

    fn format_send_iface(&self) -> String {
        match self.send_interface {
            Some(addr) => addr.to_string(),
            None => "default".to_string(),
        }
    }
}

// ===== Platform helpers =====

/// Set SO_REUSEPORT for multi-process port sharing (Unix only).
///
/// SO_REUSEADDR alone does not let two live processes bind the same
/// address/port for multicast reception on Linux; the share mode needs
/// both flags.
#[cfg(unix)]
fn set_reuseport(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let optval: libc::c_int = 1;
    // SAFETY: setsockopt FFI with a valid fd, standard option, correctly
    // sized optval pointer
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            std::ptr::addr_of!(optval).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Enable IP_PKTINFO so each receive carries its destination address
/// (needed to show the group address multicast traffic was sent to).
#[cfg(target_os = "linux")]
fn enable_pktinfo(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let optval: libc::c_int = 1;
    // SAFETY: setsockopt FFI with a valid fd, standard option, correctly
    // sized optval pointer
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            std::ptr::addr_of!(optval).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receive one datagram with its destination address from IP_PKTINFO.
#[cfg(target_os = "linux")]
fn recv_with_destination(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr, Option<Ipv4Addr>)> {
    use std::os::unix::io::AsRawFd;

    let mut src: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // u64-backed control buffer keeps cmsghdr alignment
    let mut cmsg_space = [0u64; 8];
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = std::ptr::addr_of_mut!(src).cast();
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_space.as_mut_ptr().cast();
    msg.msg_controllen = std::mem::size_of_val(&cmsg_space);

    // SAFETY: recvmsg FFI; msg points at valid, correctly sized buffers
    // that outlive the call
    let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let sender = SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(src.sin_addr.s_addr)),
        u16::from_be(src.sin_port),
    ));

    let mut destination = None;
    // SAFETY: cmsg traversal over the control buffer recvmsg just filled,
    // using the kernel-provided lengths
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == libc::IP_PKTINFO {
                let info = &*libc::CMSG_DATA(cmsg).cast::<libc::in_pktinfo>();
                destination = Some(Ipv4Addr::from(u32::from_be(info.ipi_addr.s_addr)));
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok((n as usize, sender, destination))
}

/// Portable fallback: no per-packet destination info.
#[cfg(not(target_os = "linux"))]
fn recv_with_destination(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr, Option<Ipv4Addr>)> {
    let (len, sender) = socket.recv_from(buf)?;
    Ok((len, sender, None))
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_bind() -> BindConfig {
        BindConfig {
            bind_addr: Ipv4Addr::LOCALHOST,
            bind_any: false,
            port: 0,
            random_port: false,
            ..BindConfig::default()
        }
    }

    #[test]
    fn test_fresh_session_is_unbound() {
        let session = UdpSession::new();
        assert_eq!(session.state(), SessionState::Unbound);
        assert!(session.local_addr().is_none());
        assert!(session.joined_group().is_none());
        assert!(session.send_interface().is_none());
    }

    #[test]
    fn test_bind_wildcard_assigns_local_addr() {
        let mut session = UdpSession::new();
        session
            .bind(&BindConfig::default())
            .expect("wildcard bind should succeed");
        assert_eq!(session.state(), SessionState::Bound);
        let local = session.local_addr().expect("bound session has an address");
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn test_failed_bind_spends_the_instance() {
        let mut session = UdpSession::new();
        // TEST-NET-1: never assigned to a local interface
        let result = session.bind(&BindConfig {
            bind_addr: Ipv4Addr::new(192, 0, 2, 1),
            bind_any: false,
            ..BindConfig::default()
        });
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    #[should_panic(expected = "not fresh")]
    fn test_second_bind_on_same_instance_panics() {
        let mut session = UdpSession::new();
        session
            .bind(&loopback_bind())
            .expect("first bind should succeed");
        let _ = session.bind(&loopback_bind());
    }

    #[test]
    fn test_join_before_bind_is_deferred_without_os_call() {
        let mut session = UdpSession::new();
        let outcome = session
            .join_group(&MulticastJoinConfig {
                enabled: true,
                group: Ipv4Addr::new(239, 1, 1, 1),
                interface: None,
            })
            .expect("deferred join is not an error");
        // No socket exists yet, so no OS-level join can have happened
        assert_eq!(outcome, JoinOutcome::Deferred);
        assert!(session.joined_group().is_none());
    }

    #[test]
    fn test_join_disabled_is_skipped() {
        let mut session = UdpSession::new();
        let outcome = session
            .join_group(&MulticastJoinConfig::default())
            .expect("skipped join is not an error");
        assert_eq!(outcome, JoinOutcome::Skipped);
    }

    #[test]
    fn test_join_rejects_non_multicast_group() {
        let mut session = UdpSession::new();
        session
            .bind(&loopback_bind())
            .expect("bind should succeed");
        let result = session.join_group(&MulticastJoinConfig {
            enabled: true,
            group: Ipv4Addr::new(192, 168, 1, 1),
            interface: None,
        });
        assert!(matches!(result, Err(JoinError::NotMulticast(_))));
        assert!(session.joined_group().is_none());
    }

    #[test]
    fn test_options_before_bind_are_skipped() {
        let mut session = UdpSession::new();
        session.set_loopback(true);
        session.set_send_interface_addr(Ipv4Addr::LOCALHOST);
        assert!(session.send_interface().is_none());
    }

    #[test]
    fn test_oversized_payload_rejected_before_os() {
        let mut session = UdpSession::new();
        session
            .bind(&loopback_bind())
            .expect("bind should succeed");
        let payload = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        let dest = session.local_addr().expect("bound session has an address");
        let result = session.send(&payload, dest);
        assert!(matches!(
            result,
            Err(SendError::PayloadTooLarge { len: 513, max: 512 })
        ));
    }

    #[test]
    fn test_send_and_receive_over_loopback() {
        let mut session = UdpSession::new();
        session
            .bind(&loopback_bind())
            .expect("bind should succeed");
        let dest = session.local_addr().expect("bound session has an address");

        let written = session.send(b"ping", dest).expect("send should succeed");
        assert_eq!(written, 4);

        // Non-blocking: give the loopback path a moment
        std::thread::sleep(std::time::Duration::from_millis(50));
        let datagram = session.receive_one().expect("datagram should be pending");
        assert_eq!(datagram.payload, b"ping");
        assert_eq!(datagram.sender.port(), dest.port());
        assert_eq!(datagram.destination.port(), dest.port());
    }

    #[test]
    fn test_receive_on_empty_queue_is_none() {
        let mut session = UdpSession::new();
        session
            .bind(&loopback_bind())
            .expect("bind should succeed");
        assert!(session.receive_one().is_none());
    }

    #[test]
    fn test_close_releases_and_terminates() {
        let mut session = UdpSession::new();
        session
            .bind(&loopback_bind())
            .expect("bind should succeed");
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.receive_one().is_none());
        assert!(session.try_clone_socket().is_err());
    }
}
