use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use bon::Builder;
use tokio::{
    io::copy_bidirectional_with_sizes,
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
#[cfg(not(coverage_nightly))]
use tracing::{debug, info, warn};

use crate::{
    config::DEFAULT_BUFFER_SIZE, dial::Dialer, droppable_handle::DroppableHandle,
    error::RelayError, hop::ForwardTarget,
};

// Service that forwards local connections through the last hop of the chain.
#[derive(Builder)]
pub struct Forwarder {
    // Dialer that reaches the target from the last hop.
    dialer: Arc<dyn Dialer>,
    // Destination of every forwarded connection.
    target: ForwardTarget,
    // Buffer size for bidirectional copying.
    #[builder(default = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,
}

impl Forwarder {
    // Pipe one accepted connection to the target. Errors only affect this pair.
    async fn forward(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<(), RelayError> {
        if let Err(error) = stream.set_nodelay(true) {
            #[cfg(not(coverage_nightly))]
            warn!(%peer, %error, "Error setting nodelay.");
        }
        let mut remote = self
            .dialer
            .dial(&self.target.host, self.target.port)
            .await
            .map_err(|source| RelayError::ForwardDial {
                target: self.target.address(),
                source,
            })?;
        #[cfg(not(coverage_nightly))]
        debug!(%peer, target = %self.target.address(), "Forwarding connection.");
        let (sent, received) = copy_bidirectional_with_sizes(
            &mut stream,
            &mut remote,
            self.buffer_size,
            self.buffer_size,
        )
        .await
        .map_err(RelayError::Copy)?;
        #[cfg(not(coverage_nightly))]
        debug!(
            %peer,
            sent = %bytesize::ByteSize::b(sent),
            received = %bytesize::ByteSize::b(received),
            "Forwarded connection closed."
        );
        Ok(())
    }
}

/// A loopback listener whose connections are forwarded through the chain.
pub struct Relay {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Relay {
    /// Binds an OS-assigned port on `127.0.0.1`.
    pub async fn bind() -> Result<Self, RelayError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(RelayError::Bind)?;
        let local_addr = listener.local_addr().map_err(RelayError::Bind)?;
        #[cfg(not(coverage_nightly))]
        info!(%local_addr, "Listening for forwarded connections.");
        Ok(Relay {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections in the background.
    ///
    /// Each connection gets its own task, so a failed dial or a broken pair
    /// never stops the listener. The loop runs until `cancellation` fires or the
    /// returned handle is dropped; connections already forwarded keep going.
    pub fn spawn(self, forwarder: Forwarder, cancellation: CancellationToken) -> DroppableHandle<()> {
        let forwarder = Arc::new(forwarder);
        DroppableHandle(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        #[cfg(not(coverage_nightly))]
                        debug!(local_addr = %self.local_addr, "Relay stopped.");
                        break;
                    }
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let forwarder = Arc::clone(&forwarder);
                            tokio::spawn(async move {
                                if let Err(error) = forwarder.forward(stream, peer).await {
                                    #[cfg(not(coverage_nightly))]
                                    warn!(%peer, ?error, "Forwarded connection failed.");
                                }
                            });
                        }
                        Err(error) => {
                            #[cfg(not(coverage_nightly))]
                            warn!(%error, "Error accepting connection.");
                        }
                    }
                }
            }
        }))
    }
}
