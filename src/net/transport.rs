// Transport abstraction
// Anything that can open a byte stream to the position server

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tracing::debug;

/// Read side of an open connection. Dropping it closes the connection.
pub type BoxedStream = Box<dyn AsyncRead + Send + Unpin>;

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = io::Result<BoxedStream>> + Send + 'a>>;

/// Capability to open a fresh stream to the producer.
///
/// The connection manager calls `connect` once per attempt and owns the
/// returned stream until the receive loop ends.
pub trait Transport: Send + Sync {
    fn connect(&self) -> ConnectFuture<'_>;

    /// Human readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// Plain TCP connection to host:port
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        TcpTransport {
            addr: addr.into(),
            connect_timeout,
        }
    }

    pub fn from_host_port(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self::new(format!("{}:{}", host, port), connect_timeout)
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(async move {
            let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", self.addr, self.connect_timeout),
                    ))
                }
            };
            stream.set_nodelay(true)?;
            debug!("TCP connection established to {} from {:?}", self.addr, stream.local_addr().ok());
            Ok(Box::new(stream) as BoxedStream)
        })
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}
