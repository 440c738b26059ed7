use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::{
    dial::{BoxedStream, Dialer},
    error::{ChainError, HopError},
    hop::HopSpec,
};

/// A live, authenticated connection to one hop.
///
/// A connection is itself a [`Dialer`]: anything it dials is routed through
/// the hop, which is how the next hop in the chain is reached.
#[async_trait]
pub trait HopConnection: Dialer {
    /// Closes the connection, invalidating everything tunneled through it.
    async fn close(&self);
}

// Performs the transport handshake and authentication for a single hop over
// an already dialed stream.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: HopConnection + 'static;

    // Bounds dialing each hop, tunneled or not.
    fn connect_timeout(&self) -> Duration;

    async fn handshake(
        &self,
        index: usize,
        hop: &HopSpec,
        stream: BoxedStream,
    ) -> Result<Self::Connection, HopError>;
}

/// Connections to every hop, in order. `connections[i]` was dialed through
/// `connections[i - 1]`.
pub struct Chain<C> {
    connections: Vec<Arc<C>>,
}

impl<C: HopConnection + 'static> Chain<C> {
    /// Connects to each hop in turn, dialing the first one with `direct` and
    /// every following one through its predecessor.
    ///
    /// If any hop fails, every hop already connected is closed in reverse order
    /// and the later hops are never attempted.
    pub async fn establish<K>(
        hops: &[HopSpec],
        connector: &K,
        direct: &dyn Dialer,
    ) -> Result<Self, ChainError>
    where
        K: Connector<Connection = C>,
    {
        if hops.is_empty() {
            return Err(ChainError::Empty);
        }
        let mut connections: Vec<Arc<C>> = Vec::with_capacity(hops.len());
        for (index, hop) in hops.iter().enumerate() {
            let address = hop.address();
            let result = Self::connect_hop(index, hop, connector, connections.last(), direct).await;
            match result {
                Ok(connection) => {
                    #[cfg(not(coverage_nightly))]
                    info!(hop = index, %address, user = %hop.username, "Connected to hop.");
                    connections.push(Arc::new(connection));
                }
                Err(source) => {
                    #[cfg(not(coverage_nightly))]
                    debug!(hop = index, %address, error = %source, "Hop failed, closing chain.");
                    Chain { connections }.close().await;
                    return Err(ChainError::Hop {
                        index,
                        address,
                        source,
                    });
                }
            }
        }
        Ok(Chain { connections })
    }

    async fn connect_hop<K>(
        index: usize,
        hop: &HopSpec,
        connector: &K,
        previous: Option<&Arc<C>>,
        direct: &dyn Dialer,
    ) -> Result<C, HopError>
    where
        K: Connector<Connection = C>,
    {
        let dialer: &dyn Dialer = match previous {
            Some(previous) => previous.as_ref(),
            None => direct,
        };
        #[cfg(not(coverage_nightly))]
        debug!(hop = index, address = %hop.address(), tunneled = previous.is_some(), "Dialing hop.");
        let limit = connector.connect_timeout();
        let stream = timeout(limit, dialer.dial(&hop.host, hop.port))
            .await
            .map_err(|_| HopError::Timeout(limit))?
            .map_err(HopError::Dial)?;
        connector.handshake(index, hop, stream).await
    }

    /// The last hop, over which sessions and forwards are opened.
    pub fn terminal(&self) -> Arc<C> {
        // Never empty, see `establish`.
        Arc::clone(&self.connections[self.connections.len() - 1])
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every hop, the last one first.
    pub async fn close(self) {
        for (index, connection) in self.connections.iter().enumerate().rev() {
            #[cfg(not(coverage_nightly))]
            debug!(hop = index, "Closing hop.");
            connection.close().await;
        }
    }
}
