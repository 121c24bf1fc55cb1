//! Socket streams a plugin connection can run over.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::handshake::Network;

/// A connected TCP or Unix domain socket.
#[derive(Debug)]
pub enum Stream {
    /// TCP stream.
    Tcp(TcpStream),
    /// Unix domain socket stream.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Dials `address` on `network`.
    ///
    /// TCP addresses are tried in resolution order, each bounded by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the last connection error, or `Unsupported` for Unix sockets
    /// on platforms without them.
    pub fn connect(network: Network, address: &str, timeout: Duration) -> io::Result<Self> {
        match network {
            Network::Tcp => connect_tcp(address, timeout).map(Self::Tcp),
            Network::Unix => connect_unix(address),
        }
    }

    /// Clones the underlying socket handle.
    ///
    /// # Errors
    ///
    /// Propagates the operating system error.
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    /// Shuts down both directions, unblocking any reader on a clone.
    ///
    /// # Errors
    ///
    /// Propagates the operating system error.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

fn connect_tcp(address: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for candidate in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(error) => last_error = Some(error),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("address {address} did not resolve"),
        )
    }))
}

#[cfg(unix)]
fn connect_unix(address: &str) -> io::Result<Stream> {
    UnixStream::connect(address).map(Stream::Unix)
}

#[cfg(not(unix))]
fn connect_unix(address: &str) -> io::Result<Stream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("unix sockets are unavailable on this platform: {address}"),
    ))
}
