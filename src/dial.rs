use std::{io, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tracing::warn;

// Any bidirectional byte stream a hop can be reached over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Capability to open a new connection to `host:port`.
///
/// The first hop is dialed with [`TcpDialer`]; every later hop (and every
/// forwarded connection) is dialed through the previous hop's connection.
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

// Plain TCP from this machine.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        TcpDialer { connect_timeout }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "timed out after {}",
                        humantime::format_duration(self.connect_timeout)
                    ),
                )
            })??;
        if let Err(error) = stream.set_nodelay(true) {
            #[cfg(not(coverage_nightly))]
            warn!(%host, %port, %error, "Error setting nodelay.");
        }
        Ok(Box::new(stream))
    }
}
