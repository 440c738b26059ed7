use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{
    Channel, Disconnect,
    client::{self, Handle, Msg},
    keys::{HashAlg, PublicKey, key::PrivateKeyWithHashAlg},
};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::{
    chain::{Connector, HopConnection},
    config::ApplicationConfig,
    dial::{BoxedStream, Dialer},
    error::{HopError, SessionError},
    hop::{AuthMethod, HopSpec},
};

// Client-side callbacks for one hop.
pub(crate) struct ClientHandler {
    index: usize,
    address: String,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host keys aren't pinned; log the fingerprint so it can be checked by hand.
    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        #[cfg(not(coverage_nightly))]
        info!(
            hop = self.index,
            address = %self.address,
            fingerprint = %key.fingerprint(HashAlg::Sha256),
            "Accepting host key."
        );
        Ok(true)
    }
}

/// Establishes SSH connections with `russh`.
pub struct SshConnector {
    config: Arc<client::Config>,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(config: &ApplicationConfig) -> Self {
        SshConnector {
            config: Arc::new(client::Config {
                inactivity_timeout: None,
                keepalive_interval: config.keepalive_interval,
                keepalive_max: 3,
                ..Default::default()
            }),
            connect_timeout: config.connect_timeout,
        }
    }

    async fn connect(
        &self,
        index: usize,
        hop: &HopSpec,
        stream: BoxedStream,
    ) -> Result<SshConnection, HopError> {
        let address = hop.address();
        let handler = ClientHandler {
            index,
            address: address.clone(),
        };
        let mut handle = client::connect_stream(Arc::clone(&self.config), stream, handler)
            .await
            .map_err(HopError::Handshake)?;
        if !authenticate(&mut handle, index, hop)
            .await
            .map_err(HopError::Handshake)?
        {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "")
                .await;
            return Err(HopError::Authentication {
                user: hop.username.clone(),
                offered: hop.offered_methods(),
            });
        }
        Ok(SshConnection {
            index,
            address,
            handle,
        })
    }
}

// Offer each configured method in turn; the server decides which one it takes.
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    index: usize,
    hop: &HopSpec,
) -> Result<bool, russh::Error> {
    if hop.auth.is_empty() {
        return Ok(handle.authenticate_none(&hop.username).await?.success());
    }
    for method in hop.auth.iter() {
        let result = match method {
            AuthMethod::PublicKey(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(
                        &hop.username,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await?
            }
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(&hop.username, password)
                    .await?
            }
        };
        if result.success() {
            #[cfg(not(coverage_nightly))]
            debug!(hop = index, method = method.name(), "Authenticated.");
            return Ok(true);
        }
        #[cfg(not(coverage_nightly))]
        debug!(hop = index, method = method.name(), "Authentication method rejected.");
    }
    Ok(false)
}

#[async_trait]
impl Connector for SshConnector {
    type Connection = SshConnection;

    fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    async fn handshake(
        &self,
        index: usize,
        hop: &HopSpec,
        stream: BoxedStream,
    ) -> Result<SshConnection, HopError> {
        timeout(self.connect_timeout, self.connect(index, hop, stream))
            .await
            .map_err(|_| HopError::Timeout(self.connect_timeout))?
    }
}

/// An authenticated SSH connection to one hop.
pub struct SshConnection {
    index: usize,
    address: String,
    handle: Handle<ClientHandler>,
}

impl SshConnection {
    /// Opens a session channel for running a command or a shell on this hop.
    pub async fn open_session(&self) -> Result<Channel<Msg>, SessionError> {
        self.handle
            .channel_open_session()
            .await
            .map_err(SessionError::Open)
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

// Dialing through a hop opens a direct-tcpip channel from it.
#[async_trait]
impl Dialer for SshConnection {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|error| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("hop {} could not open {host}:{port}: {error}", self.index),
                )
            })?;
        Ok(Box::new(channel.into_stream()))
    }
}

#[async_trait]
impl HopConnection for SshConnection {
    async fn close(&self) {
        if let Err(error) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "")
            .await
        {
            #[cfg(not(coverage_nightly))]
            debug!(hop = self.index, address = %self.address, %error, "Error disconnecting.");
        }
    }
}
