use log::debug;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Stream transport the client talks through.
///
/// Sends may come from several threads; the client serializes them. Only the
/// reader loop receives.
pub trait Transport: Send + Sync + 'static {
    /// Write the whole frame.
    fn send(&self, bytes: &[u8]) -> io::Result<()>;

    /// Read into `buf`, waiting at most the current read timeout.
    ///
    /// `Ok(0)` means the peer closed the connection. An expired timeout is
    /// reported as an error of kind `WouldBlock` or `TimedOut`.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()>;

    fn close(&self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        (**self).send(bytes)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}

/// True for the errors [`Transport::recv`] uses to report an expired timeout
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// TCP transport
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Open a connection, giving up after `timeout`.
    pub fn connect(address: &str, timeout: Duration) -> io::Result<Self> {
        let mut last_err = None;

        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(timeout))?;
                    debug!("🔌 TCP connected to {}", addr);
                    return Ok(Self { stream });
                }
                Err(e) => {
                    debug!("🔌 TCP connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no addresses resolved for {}", address),
            )
        }))
    }
}

impl Transport for TcpTransport {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = &self.stream;
        stream.write_all(bytes)?;
        stream.flush()
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = &self.stream;
        stream.read(buf)
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    fn close(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // Already torn down by the peer
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
