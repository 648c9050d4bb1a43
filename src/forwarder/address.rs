//! Proxy address parsing and socket setup.
//!
//! Addresses have the form `<scheme>:<endpoint>` where the scheme is `tcp`
//! or `unix`. Only the first colon separates the scheme, so
//! `tcp:127.0.0.1:9000` keeps its `host:port` endpoint intact.
//!
//! Binding is blocking and happens before the re-exec, on std sockets.
//! Dialing happens inside the forwarding engine and is async.

use super::error::AddressError;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

/// Transport of a proxy address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// TCP, endpoint is `host:port`.
    Tcp,
    /// Unix stream socket, endpoint is a filesystem path.
    Unix,
}

impl Scheme {
    /// The scheme prefix as written in addresses.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Unix => "unix",
        }
    }
}

/// A parsed `<scheme>:<endpoint>` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    scheme: Scheme,
    endpoint: String,
}

impl Address {
    /// Parse an address string.
    pub fn parse(addr: &str) -> Result<Self, AddressError> {
        let invalid = |reason: String| AddressError::InvalidAddress {
            addr: addr.to_string(),
            reason,
        };

        let (scheme, endpoint) = addr
            .split_once(':')
            .ok_or_else(|| invalid("expected <scheme>:<endpoint>".to_string()))?;

        let scheme = match scheme {
            "tcp" => Scheme::Tcp,
            "unix" => Scheme::Unix,
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        };

        if endpoint.is_empty() {
            return Err(invalid("empty endpoint".to_string()));
        }

        Ok(Self {
            scheme,
            endpoint: endpoint.to_string(),
        })
    }

    /// The transport of this address.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The endpoint part (`host:port` or a path).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve a TCP endpoint synchronously.
    fn resolve_tcp(&self) -> Result<Vec<SocketAddr>, AddressError> {
        let addrs: Vec<SocketAddr> = self
            .endpoint
            .to_socket_addrs()
            .map_err(|e| self.resolution_error(e.to_string()))?
            .collect();

        if addrs.is_empty() {
            return Err(self.resolution_error("no addresses found".to_string()));
        }
        Ok(addrs)
    }

    fn resolution_error(&self, message: String) -> AddressError {
        AddressError::Resolution {
            addr: self.to_string(),
            message,
        }
    }

    /// Bind a listening socket on this address.
    pub fn bind(&self) -> Result<BoundListener, AddressError> {
        let bind_error = |source| AddressError::Bind {
            addr: self.to_string(),
            source,
        };

        match self.scheme {
            Scheme::Tcp => {
                let addrs = self.resolve_tcp()?;
                std::net::TcpListener::bind(&addrs[..])
                    .map(BoundListener::Tcp)
                    .map_err(bind_error)
            }
            Scheme::Unix => std::os::unix::net::UnixListener::bind(Path::new(&self.endpoint))
                .map(BoundListener::Unix)
                .map_err(bind_error),
        }
    }

    /// Connect to this address.
    pub async fn dial(&self) -> Result<Stream, AddressError> {
        let dial_error = |source| AddressError::Dial {
            addr: self.to_string(),
            source,
        };

        match self.scheme {
            Scheme::Tcp => {
                let addrs: Vec<SocketAddr> = tokio::net::lookup_host(self.endpoint.as_str())
                    .await
                    .map_err(|e| self.resolution_error(e.to_string()))?
                    .collect();

                let mut last_error = None;
                for addr in addrs {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => return Ok(Stream::Tcp(stream)),
                        Err(e) => last_error = Some(e),
                    }
                }

                Err(match last_error {
                    Some(e) => dial_error(e),
                    None => self.resolution_error("no addresses found".to_string()),
                })
            }
            Scheme::Unix => UnixStream::connect(&self.endpoint)
                .await
                .map(Stream::Unix)
                .map_err(dial_error),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme.as_str(), self.endpoint)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A bound, blocking listener as created before the re-exec.
#[derive(Debug)]
pub enum BoundListener {
    /// TCP listener.
    Tcp(std::net::TcpListener),
    /// Unix listener.
    Unix(std::os::unix::net::UnixListener),
}

impl AsRawFd for BoundListener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            BoundListener::Tcp(l) => l.as_raw_fd(),
            BoundListener::Unix(l) => l.as_raw_fd(),
        }
    }
}

/// An async listener owned by the forwarding engine.
#[derive(Debug)]
pub enum Listener {
    /// TCP listener.
    Tcp(TcpListener),
    /// Unix listener.
    Unix(UnixListener),
}

impl Listener {
    /// Rebuild a listener from an inherited descriptor.
    ///
    /// Takes ownership of `fd`. The socket is validated by reading its local
    /// address, which fails if the descriptor is not a listener of the
    /// expected family. Must be called from within a tokio runtime.
    pub fn from_inherited_fd(scheme: Scheme, fd: RawFd) -> io::Result<Self> {
        // SAFETY: the descriptor was produced by our own binding phase and
        // nothing else in this process owns it.
        match scheme {
            Scheme::Tcp => {
                let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
                std_listener.local_addr()?;
                std_listener.set_nonblocking(true)?;
                TcpListener::from_std(std_listener).map(Listener::Tcp)
            }
            Scheme::Unix => {
                let std_listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(fd) };
                std_listener.local_addr()?;
                std_listener.set_nonblocking(true)?;
                UnixListener::from_std(std_listener).map(Listener::Unix)
            }
        }
    }

    /// Wrap an already bound listener. Must be called from within a tokio runtime.
    pub fn from_bound(bound: BoundListener) -> io::Result<Self> {
        match bound {
            BoundListener::Tcp(l) => {
                l.set_nonblocking(true)?;
                TcpListener::from_std(l).map(Listener::Tcp)
            }
            BoundListener::Unix(l) => {
                l.set_nonblocking(true)?;
                UnixListener::from_std(l).map(Listener::Unix)
            }
        }
    }

    /// Accept the next connection, returning the stream and a printable peer.
    pub async fn accept(&self) -> io::Result<(Stream, String)> {
        match self {
            Listener::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                Ok((Stream::Tcp(stream), peer.to_string()))
            }
            Listener::Unix(l) => {
                let (stream, peer) = l.accept().await?;
                let peer = peer
                    .as_pathname()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "unnamed".to_string());
                Ok((Stream::Unix(stream), peer))
            }
        }
    }

    /// The local address in `<scheme>:<endpoint>` form, for logging.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            Listener::Tcp(l) => Ok(format!("tcp:{}", l.local_addr()?)),
            Listener::Unix(l) => {
                let addr = l.local_addr()?;
                Ok(match addr.as_pathname() {
                    Some(path) => format!("unix:{}", path.display()),
                    None => "unix:unnamed".to_string(),
                })
            }
        }
    }
}

/// Read half of a relayed connection.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Write half of a relayed connection.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// A connected stream of either transport.
#[derive(Debug)]
pub enum Stream {
    /// TCP stream.
    Tcp(TcpStream),
    /// Unix stream.
    Unix(UnixStream),
}

impl Stream {
    /// Split into independently owned halves.
    pub fn into_split(self) -> (BoxedReader, BoxedWriter) {
        match self {
            Stream::Tcp(s) => {
                let (read, write) = s.into_split();
                (Box::pin(read), Box::pin(write))
            }
            Stream::Unix(s) => {
                let (read, write) = s.into_split();
                (Box::pin(read), Box::pin(write))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_parse_tcp_keeps_port_colon() {
        let addr = Address::parse("tcp:127.0.0.1:9000").unwrap();
        assert_eq!(addr.scheme(), Scheme::Tcp);
        assert_eq!(addr.endpoint(), "127.0.0.1:9000");
        assert_eq!(addr.to_string(), "tcp:127.0.0.1:9000");
    }

    #[test]
    fn test_parse_unix() {
        let addr: Address = "unix:/run/app.sock".parse().unwrap();
        assert_eq!(addr.scheme(), Scheme::Unix);
        assert_eq!(addr.endpoint(), "/run/app.sock");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        for bad in ["ftp:host:21", "udp:127.0.0.1:53", "TCP:127.0.0.1:80"] {
            assert!(
                matches!(Address::parse(bad), Err(AddressError::InvalidAddress { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(matches!(
            Address::parse("127.0.0.1"),
            Err(AddressError::InvalidAddress { .. })
        ));
        assert!(matches!(
            Address::parse("unix:"),
            Err(AddressError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_bind_unparsable_host_port() {
        let addr = Address::parse("tcp:not-a-port").unwrap();
        assert!(matches!(addr.bind(), Err(AddressError::Resolution { .. })));
    }

    #[test]
    fn test_bind_unix_path_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.sock");
        let addr = Address::parse(&format!("unix:{}", path.display())).unwrap();

        let _first = addr.bind().unwrap();
        assert!(matches!(addr.bind(), Err(AddressError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nobody.sock");
        let addr = Address::parse(&format!("unix:{}", path.display())).unwrap();
        assert!(matches!(addr.dial().await, Err(AddressError::Dial { .. })));
    }

    #[tokio::test]
    async fn test_bind_accept_dial_tcp() {
        let bound = Address::parse("tcp:127.0.0.1:0").unwrap().bind().unwrap();
        let listener = Listener::from_bound(bound).unwrap();
        let local = listener.local_addr().unwrap();
        let target = Address::parse(&local).unwrap();

        let client = tokio::spawn(async move {
            let stream = target.dial().await.unwrap();
            let (_read, mut write) = stream.into_split();
            write.write_all(b"hi").await.unwrap();
        });

        let (stream, _peer) = listener.accept().await.unwrap();
        let (mut read, _write) = stream.into_split();
        let mut buf = [0u8; 2];
        read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_rejects_wrong_family() {
        let bound = Address::parse("tcp:127.0.0.1:0").unwrap().bind().unwrap();
        let fd = nix::unistd::dup(bound.as_raw_fd()).unwrap();
        assert!(Listener::from_inherited_fd(Scheme::Unix, fd).is_err());
    }
}
