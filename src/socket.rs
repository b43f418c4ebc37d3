use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};

use socket2::{Domain, Protocol, Socket, Type};

use crate::consts::{LISTEN_BACKLOG, SERVER_SOCKET_SEND_BUF_SIZE};
use crate::transceiver::{Listener, Transceiver};

#[derive(thiserror::Error, Debug)]
#[error("failed to create and bind tcp socket: {0}")]
pub struct Error(#[from] std::io::Error);

pub type Result<T> = std::result::Result<T, Error>;

/// Listening sockets for every address family that could be bound.
pub struct NetplayListener {
    listeners: Vec<TcpListener>,
}

impl NetplayListener {
    /// Binds IPv4 and IPv6 (v6-only) wildcard sockets on `port`. A family that
    /// cannot be created is skipped; the call only fails when nothing is left.
    pub fn bind(port: u16) -> Result<Self> {
        let mut listeners = Vec::with_capacity(2);
        for addr in [
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        ] {
            match Self::bind_one(addr) {
                Ok(listener) => {
                    log::info!("listening on {addr}");
                    listeners.push(listener);
                }
                Err(e) => log::warn!("could not listen on {addr}: {e}"),
            }
        }
        if listeners.is_empty() {
            return Err(Error(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no listening socket could be bound",
            )));
        }
        Ok(Self { listeners })
    }

    fn bind_one(addr: SocketAddr) -> Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        if addr.is_ipv6() {
            if let Err(e) = socket.set_only_v6(true) {
                log::warn!("failed to set IPv6 socket to disallow IPv4 connections: {e}");
            }
        }
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        if let Err(e) = socket.set_send_buffer_size(SERVER_SOCKET_SEND_BUF_SIZE) {
            log::warn!("send buffer size set failed: {e}");
        }
        socket.set_nodelay(true)?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }
}

impl Listener for NetplayListener {
    type Stream = NetplayStream;

    fn accept(&mut self) -> io::Result<Option<(NetplayStream, SocketAddr)>> {
        for listener in &self.listeners {
            match listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    return Ok(Some((NetplayStream(stream), addr)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

pub struct NetplayStream(pub TcpStream);

impl Transceiver for NetplayStream {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.0.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.write(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}
