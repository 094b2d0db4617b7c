//! Kernel route netlink socket for link state notifications
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel netlink interface
//! - SI-4: System Monitoring - Real-time link state monitoring
//!
//! On Linux, [`NetlinkDialer`] opens a `NETLINK_ROUTE` socket subscribed to
//! `RTMGRP_LINK` and registers it with tokio's epoll integration. Other
//! platforms get [`UnsupportedDialer`], which refuses to dial.

/// Default size of the per-receive datagram buffer
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Default kernel socket receive buffer (SO_RCVBUF)
/// NIST: SC-5 - Adequate buffering prevents event loss under bursts
pub const DEFAULT_SOCKET_RECEIVE_BUFFER: usize = 1024 * 1024;

#[cfg(target_os = "linux")]
mod linux {
    use super::{DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_SOCKET_RECEIVE_BUFFER};
    use crate::source::{Dialer, LinkNotification, NotificationSource, RouteMessage};
    use async_trait::async_trait;
    use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
    use netlink_packet_route::RouteNetlinkMessage;
    use netlink_packet_route::link::{LinkAttribute, LinkMessage};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use std::io;
    use std::os::fd::AsRawFd;
    use tokio::io::unix::AsyncFd;
    use tokio::sync::watch;
    use tokio::time::{Instant, sleep_until};
    use tracing::{debug, instrument, trace, warn};

    /// Opens route netlink sockets
    #[derive(Debug, Clone)]
    pub struct NetlinkDialer {
        receive_buffer_size: usize,
        socket_receive_buffer: usize,
    }

    impl NetlinkDialer {
        pub fn new(receive_buffer_size: usize, socket_receive_buffer: usize) -> Self {
            Self {
                receive_buffer_size,
                socket_receive_buffer,
            }
        }
    }

    impl Default for NetlinkDialer {
        fn default() -> Self {
            Self::new(DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_SOCKET_RECEIVE_BUFFER)
        }
    }

    impl Dialer for NetlinkDialer {
        type Source = RouteSocket;

        /// # NIST Controls
        /// - AC-3: Access Enforcement - Kernel enforces netlink permissions
        #[instrument(skip(self))]
        fn dial(&self, groups: u32) -> io::Result<RouteSocket> {
            let mut socket = Socket::new(NETLINK_ROUTE)?;
            socket.bind(&SocketAddr::new(0, groups))?;
            socket.set_non_blocking(true)?;
            tune_receive_buffer(&socket, self.socket_receive_buffer);

            debug!(groups, "Netlink socket bound");

            let (deadline, _) = watch::channel(None);
            Ok(RouteSocket {
                inner: AsyncFd::new(socket)?,
                deadline,
                receive_buffer_size: self.receive_buffer_size,
            })
        }
    }

    /// Set SO_RCVBUF; failure only costs burst tolerance
    fn tune_receive_buffer(socket: &Socket, size: usize) {
        let size = size.min(libc::c_int::MAX as usize) as libc::c_int;
        // SAFETY: the fd is owned by `socket` and the option value is a
        // properly sized c_int living for the duration of the call.
        let ret = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &size as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            warn!("Failed to set SO_RCVBUF, using default buffer size");
        } else {
            debug!(size, "Set socket receive buffer");
        }
    }

    /// A route netlink socket with a settable read deadline
    ///
    /// The deadline lives in a watch cell so that moving it wakes a receive
    /// that is already parked on socket readiness.
    pub struct RouteSocket {
        inner: AsyncFd<Socket>,
        deadline: watch::Sender<Option<Instant>>,
        receive_buffer_size: usize,
    }

    impl RouteSocket {
        /// Read one whole datagram
        ///
        /// The pending length is peeked first so that a notification larger
        /// than the configured buffer is read in full rather than truncated.
        fn try_recv(&self) -> io::Result<Vec<u8>> {
            let socket = self.inner.get_ref();
            let mut buf = Vec::with_capacity(self.receive_buffer_size);
            let pending = socket.recv(&mut buf, libc::MSG_PEEK | libc::MSG_TRUNC)?;

            buf.clear();
            if pending > buf.capacity() {
                debug!(
                    pending,
                    buffer = self.receive_buffer_size,
                    "Growing receive buffer for oversized datagram"
                );
                buf.reserve_exact(pending);
            }

            let len = socket.recv(&mut buf, 0)?;
            if len > buf.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("netlink datagram truncated: {} of {} bytes", buf.len(), len),
                ));
            }
            Ok(buf)
        }
    }

    #[async_trait]
    impl NotificationSource for RouteSocket {
        async fn receive(&self) -> io::Result<Vec<RouteMessage>> {
            let mut deadline_rx = self.deadline.subscribe();
            loop {
                let deadline = *deadline_rx.borrow_and_update();
                if let Some(at) = deadline {
                    if at <= Instant::now() {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "netlink receive deadline exceeded",
                        ));
                    }
                }

                tokio::select! {
                    guard = self.inner.readable() => {
                        let mut guard = guard?;
                        match guard.try_io(|_| self.try_recv()) {
                            Ok(result) => return parse_datagram(&result?),
                            Err(_would_block) => continue,
                        }
                    }
                    _ = sleep_until_deadline(deadline) => continue,
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            return Err(io::Error::new(
                                io::ErrorKind::BrokenPipe,
                                "netlink socket closed",
                            ));
                        }
                    }
                }
            }
        }

        fn set_read_deadline(&self, deadline: Instant) -> io::Result<()> {
            self.deadline.send_replace(Some(deadline));
            Ok(())
        }
    }

    async fn sleep_until_deadline(deadline: Option<Instant>) {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    /// Decode every netlink message packed in one datagram
    pub fn parse_datagram(buf: &[u8]) -> io::Result<Vec<RouteMessage>> {
        let mut msgs = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..])
                .map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("failed to parse netlink message: {}", e),
                    )
                })?;

            let len = msg.header.length as usize;
            if len == 0 {
                break;
            }
            // Netlink messages are 4-byte aligned
            offset = (offset + len + 3) & !3;

            msgs.push(route_message(msg.payload));
        }

        trace!(count = msgs.len(), "Received route messages");
        Ok(msgs)
    }

    fn route_message(payload: NetlinkPayload<RouteNetlinkMessage>) -> RouteMessage {
        match payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link))
            | NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelLink(link)) => {
                RouteMessage::Link(link_notification(link))
            }
            _ => RouteMessage::Other,
        }
    }

    /// Missing attributes default to the empty name and IF_OPER_UNKNOWN
    fn link_notification(link: LinkMessage) -> LinkNotification {
        let mut name = String::new();
        let mut oper_state = 0u8;

        for attr in link.attributes {
            match attr {
                LinkAttribute::IfName(n) => name = n,
                LinkAttribute::OperState(state) => oper_state = u8::from(state),
                _ => {}
            }
        }

        LinkNotification { name, oper_state }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use netlink_packet_core::NetlinkHeader;
        use netlink_packet_route::link::State;
        use std::time::Duration;
        use tokio::time::timeout;

        fn encode(payload: RouteNetlinkMessage) -> Vec<u8> {
            let mut packet = NetlinkMessage::new(
                NetlinkHeader::default(),
                NetlinkPayload::InnerMessage(payload),
            );
            packet.finalize();
            let mut buf = vec![0u8; packet.buffer_len()];
            packet.serialize(&mut buf);
            buf
        }

        fn new_link(name: &str, state: State) -> RouteNetlinkMessage {
            let mut link = LinkMessage::default();
            link.attributes.push(LinkAttribute::IfName(name.to_string()));
            link.attributes.push(LinkAttribute::OperState(state));
            RouteNetlinkMessage::NewLink(link)
        }

        #[test]
        fn test_parse_new_link() {
            let buf = encode(new_link("dummy0", State::Down));
            let msgs = parse_datagram(&buf).unwrap();
            assert_eq!(
                msgs,
                vec![RouteMessage::Link(LinkNotification::new("dummy0", 2))]
            );
        }

        #[test]
        fn test_parse_multiple_messages_in_datagram() {
            let mut buf = encode(new_link("dummy0", State::Up));
            buf.extend(encode(RouteNetlinkMessage::DelLink(LinkMessage::default())));

            let msgs = parse_datagram(&buf).unwrap();
            assert_eq!(msgs.len(), 2);
            assert_eq!(msgs[0], RouteMessage::Link(LinkNotification::new("dummy0", 6)));
            assert_eq!(msgs[1], RouteMessage::Link(LinkNotification::new("", 0)));
        }

        #[tokio::test]
        async fn test_receive_datagram_larger_than_buffer() {
            let dialer = NetlinkDialer::new(4096, DEFAULT_SOCKET_RECEIVE_BUFFER);
            let receiver = match dialer.dial(0) {
                Ok(socket) => socket,
                Err(e) => {
                    eprintln!("skipping: cannot open netlink socket: {}", e);
                    return;
                }
            };
            let mut addr = SocketAddr::new(0, 0);
            receiver.inner.get_ref().get_address(&mut addr).unwrap();

            let mut link = LinkMessage::default();
            link.attributes.push(LinkAttribute::IfName("dummy0".to_string()));
            link.attributes.push(LinkAttribute::IfAlias("x".repeat(8000)));
            link.attributes.push(LinkAttribute::OperState(State::Up));
            let datagram = encode(RouteNetlinkMessage::NewLink(link));
            assert!(datagram.len() > 4096);

            let mut sender = match Socket::new(NETLINK_ROUTE) {
                Ok(socket) => socket,
                Err(e) => {
                    eprintln!("skipping: cannot open netlink socket: {}", e);
                    return;
                }
            };
            sender.bind_auto().unwrap();
            // Unicast between user sockets needs CAP_NET_ADMIN
            if let Err(e) = sender.send_to(&datagram, &addr, 0) {
                eprintln!("skipping: cannot send to netlink peer: {}", e);
                return;
            }

            let msgs = timeout(Duration::from_secs(5), receiver.receive())
                .await
                .expect("receive timed out")
                .unwrap();
            assert_eq!(
                msgs,
                vec![RouteMessage::Link(LinkNotification::new("dummy0", 6))]
            );
        }

        #[test]
        fn test_parse_garbage_is_error() {
            let err = parse_datagram(&[0xde, 0xad, 0xbe, 0xef, 0x01]).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

/// Dialer for platforms without route netlink
#[derive(Debug, Clone, Default)]
pub struct UnsupportedDialer;

impl UnsupportedDialer {
    pub fn error() -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("watcher not implemented on {:?}", std::env::consts::OS),
        )
    }
}

/// Placeholder source type; never constructed
#[derive(Debug)]
pub enum NoSource {}

#[async_trait::async_trait]
impl crate::source::NotificationSource for NoSource {
    async fn receive(&self) -> std::io::Result<Vec<crate::source::RouteMessage>> {
        match *self {}
    }

    fn set_read_deadline(&self, _deadline: tokio::time::Instant) -> std::io::Result<()> {
        match *self {}
    }
}

impl crate::source::Dialer for UnsupportedDialer {
    type Source = NoSource;

    fn dial(&self, _groups: u32) -> std::io::Result<NoSource> {
        Err(Self::error())
    }
}

/// Dialer used by [`crate::Watcher::watch`] on this platform
#[cfg(target_os = "linux")]
pub type PlatformDialer = NetlinkDialer;

/// Dialer used by [`crate::Watcher::watch`] on this platform
#[cfg(not(target_os = "linux"))]
pub type PlatformDialer = UnsupportedDialer;

/// Build the platform dialer with the given buffer sizes
#[allow(unused_variables)]
pub fn platform_dialer(receive_buffer_size: usize, socket_receive_buffer: usize) -> PlatformDialer {
    #[cfg(target_os = "linux")]
    {
        NetlinkDialer::new(receive_buffer_size, socket_receive_buffer)
    }

    #[cfg(not(target_os = "linux"))]
    {
        UnsupportedDialer
    }
}
