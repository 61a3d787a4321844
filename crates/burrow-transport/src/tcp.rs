use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// A listening TCP socket whose blocking `accept` can be interrupted.
///
/// `std::net::TcpListener` has no way to cancel a thread parked in
/// `accept()`. [`TcpAcceptor::close`] marks the acceptor closed and then
/// dials it once, so the parked accept returns and observes the flag. The
/// socket itself is released when the last owner drops the acceptor.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl TcpAcceptor {
    /// Bind and listen on `addr` (e.g. `0.0.0.0:8092`, `127.0.0.1:0`).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
            closed: AtomicBool::new(false),
        })
    }

    /// Accept an incoming connection (blocking).
    ///
    /// Returns `Err(TransportError::Shutdown)` once [`close`](Self::close) has run.
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }

        let accepted = self.listener.accept();
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }

        let (stream, peer) = accepted.map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(local = %self.local_addr, %peer, "accepted connection");
        Ok((stream, peer))
    }

    /// Stop accepting. Idempotent; safe to call while another thread is in `accept`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let wake = wake_addr(self.local_addr);
        match TcpStream::connect_timeout(&wake, WAKE_TIMEOUT) {
            Ok(_) => debug!(local = %self.local_addr, "acceptor closed"),
            Err(err) => debug!(local = %self.local_addr, error = %err, "acceptor wake dial failed"),
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The bound address (with the kernel-assigned port when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

/// Dial `addr` (blocking).
pub fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    stream.set_nodelay(true)?;
    debug!(%addr, "connected");
    Ok(stream)
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read, Write};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_bind_accept_connect() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let addr = acceptor.local_addr().to_string();

        let handle = thread::spawn(move || {
            let mut client = connect(&addr).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let (mut server, _peer) = acceptor.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_close_wakes_blocked_accept() {
        let acceptor = Arc::new(TcpAcceptor::bind("127.0.0.1:0").unwrap());

        let waiter = {
            let acceptor = Arc::clone(&acceptor);
            thread::spawn(move || acceptor.accept())
        };

        thread::sleep(Duration::from_millis(50));
        acceptor.close();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(TransportError::Shutdown)));
        assert!(acceptor.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        acceptor.close();
        acceptor.close();
        assert!(matches!(acceptor.accept(), Err(TransportError::Shutdown)));
    }

    #[test]
    fn test_close_wakes_unspecified_bind() {
        let acceptor = Arc::new(TcpAcceptor::bind("0.0.0.0:0").unwrap());
        let waiter = {
            let acceptor = Arc::clone(&acceptor);
            thread::spawn(move || acceptor.accept())
        };

        thread::sleep(Duration::from_millis(50));
        acceptor.close();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(TransportError::Shutdown)
        ));
    }

    #[test]
    fn test_bind_in_use_reports_bind_error() {
        let first = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().to_string();

        let err = TcpAcceptor::bind(&addr).unwrap_err();
        match err {
            TransportError::Bind { addr: failed, source } => {
                assert_eq!(failed, addr);
                assert_eq!(source.kind(), ErrorKind::AddrInUse);
            }
            other => panic!("expected bind error, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_refused_reports_connect_error() {
        let addr = {
            let spare = TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().to_string()
        };

        let err = connect(&addr).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(err.io_error().is_some());
    }

    #[test]
    fn test_wake_addr_maps_unspecified_to_loopback() {
        let v4: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        assert_eq!(wake_addr(v4), "127.0.0.1:9000".parse().unwrap());

        let v6: SocketAddr = "[::]:9000".parse().unwrap();
        assert_eq!(wake_addr(v6), "[::1]:9000".parse().unwrap());

        let concrete: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        assert_eq!(wake_addr(concrete), concrete);
    }
}
