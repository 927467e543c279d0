//! Dual-stack UDP listener setup (§5 "UDP listeners are dual-stack: a
//! separate socket per address family, bound with `IPV6_V6ONLY` where
//! required").

use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

pub fn bind_ipv4(addr: SocketAddrV4, port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(*addr.ip(), port));
    socket.bind(&bind_addr.into())?;
    UdpSocket::from_std(socket.into())
}

pub fn bind_ipv6(addr: SocketAddrV6, port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    // Each address family gets its own socket; disable the v4-mapped dual
    // stack so an IPv4 listener can coexist with this one on the same port.
    socket.set_only_v6(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddr::V6(SocketAddrV6::new(*addr.ip(), port, 0, 0));
    socket.bind(&bind_addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// A socket tagged with the address family it was bound on, so replies use
/// the matching family (§5 "inbound datagrams are tagged with their arrival
/// socket").
pub struct Listeners {
    pub ipv4: Option<UdpSocket>,
    pub ipv6: Option<UdpSocket>,
}

impl Listeners {
    pub fn bind(
        bind_ipv4_addr: Option<&str>,
        port_ipv4: u16,
        bind_ipv6_addr: Option<&str>,
        port_ipv6: u16,
        disable_ipv6: bool,
    ) -> std::io::Result<Self> {
        let ipv4 = match bind_ipv4_addr {
            Some(addr) => {
                let ip: std::net::Ipv4Addr = addr
                    .parse()
                    .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid bind_ipv4"))?;
                Some(self::bind_ipv4(SocketAddrV4::new(ip, port_ipv4), port_ipv4)?)
            }
            None => None,
        };

        let ipv6 = if disable_ipv6 {
            None
        } else {
            match bind_ipv6_addr {
                Some(addr) => {
                    let ip: std::net::Ipv6Addr = addr
                        .parse()
                        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid bind_ipv6"))?;
                    Some(self::bind_ipv6(SocketAddrV6::new(ip, port_ipv6, 0, 0), port_ipv6)?)
                }
                None => None,
            }
        };

        Ok(Self { ipv4, ipv6 })
    }
}
