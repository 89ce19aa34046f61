//! UDP transport that preserves the arrival interface of each datagram and
//! can pin the egress interface of replies, via IP_PKTINFO ancillary data.
//!
//! This is the only module that touches OS-level control messages. The
//! cmsg layout is native-endian; all DHCP wire bytes stay big-endian.

use std::io::{self, IoSlice, IoSliceMut};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;

use nix::cmsg_space;
use nix::sys::socket::{
    recvmsg, sendmsg, setsockopt, sockopt, ControlMessage, ControlMessageOwned, MsgFlags,
    SockaddrIn,
};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::Interest;
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

/// A UDPv4 socket bound to 0.0.0.0:67 with IP_PKTINFO enabled.
///
/// Receive and send are independently safe to call concurrently; the
/// receiver and sender tasks share one instance behind an `Arc`.
pub struct PktInfoSocket {
    socket: UdpSocket,
}

impl PktInfoSocket {
    pub fn bind() -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("failed to create socket: {error}")))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("failed to set SO_REUSEADDR: {error}")))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("failed to set SO_BROADCAST: {error}")))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("failed to set non-blocking: {error}")))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_SERVER_PORT);
        socket
            .bind(&bind_addr.into())
            .map_err(|error| Error::Socket(format!("failed to bind to {bind_addr}: {error}")))?;

        setsockopt(&socket, sockopt::Ipv4PacketInfo, &true)
            .map_err(|error| Error::Socket(format!("failed to enable IP_PKTINFO: {error}")))?;

        let socket = UdpSocket::from_std(socket.into())
            .map_err(|error| Error::Socket(format!("failed to register with tokio: {error}")))?;

        Ok(Self { socket })
    }

    /// Receives one datagram, returning its length, the sender, and the
    /// index of the interface it arrived on.
    pub async fn recv(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddrV4, u32)> {
        let fd = self.socket.as_raw_fd();
        let mut cmsg_buffer = cmsg_space!(libc::in_pktinfo);

        loop {
            self.socket.readable().await?;

            let received = self.socket.try_io(Interest::READABLE, || {
                let mut iov = [IoSliceMut::new(buffer)];
                let message =
                    recvmsg::<SockaddrIn>(fd, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())
                        .map_err(io::Error::from)?;

                let peer = message
                    .address
                    .map(|address| SocketAddrV4::new(address.ip(), address.port()));

                let mut ifindex = None;
                for cmsg in message.cmsgs().map_err(io::Error::from)? {
                    if let ControlMessageOwned::Ipv4PacketInfo(info) = cmsg {
                        ifindex = Some(info.ipi_ifindex as u32);
                    }
                }

                Ok((message.bytes, peer, ifindex))
            });

            match received {
                Ok((length, peer, ifindex)) => {
                    let peer = peer
                        .ok_or_else(|| Error::Socket("datagram without source address".into()))?;
                    let ifindex = ifindex.ok_or(Error::MissingPktInfo)?;
                    return Ok((length, peer, ifindex));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => continue,
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Sends a datagram out the interface with the given index. Only the
    /// index is set in the pktinfo header; the kernel selects the source
    /// address and route.
    pub async fn send(&self, buffer: &[u8], dest: SocketAddrV4, ifindex: u32) -> Result<usize> {
        let fd = self.socket.as_raw_fd();
        let address = SockaddrIn::from(dest);
        let pktinfo = libc::in_pktinfo {
            ipi_ifindex: ifindex as libc::c_int,
            ipi_spec_dst: libc::in_addr { s_addr: 0 },
            ipi_addr: libc::in_addr { s_addr: 0 },
        };

        loop {
            self.socket.writable().await?;

            let sent = self.socket.try_io(Interest::WRITABLE, || {
                let iov = [IoSlice::new(buffer)];
                let cmsgs = [ControlMessage::Ipv4PacketInfo(&pktinfo)];
                sendmsg(fd, &iov, &cmsgs, MsgFlags::empty(), Some(&address))
                    .map_err(io::Error::from)
            });

            match sent {
                Ok(length) => return Ok(length),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => continue,
                Err(error) => return Err(error.into()),
            }
        }
    }
}
