use std::{
    collections::HashSet,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use nssh::{
    ApplicationConfig, Chain, FileKeyLoader, IdentityTable, SshConnection, connect, resolve_all,
};
use russh::{
    Channel, ChannelId, CryptoVec, Pty, Sig,
    keys::{
        PrivateKey, PublicKey,
        ssh_key::{LineEnding, private::Ed25519Keypair},
    },
    server::{self, Auth, Msg, Session},
};
use tokio::{
    io::copy_bidirectional,
    net::{TcpListener, TcpStream},
};

pub(crate) const PASSWORD: &str = "hunter2";
// Authenticates, but every pty request it makes is refused.
pub(crate) const NO_PTY_USER: &str = "nopty";
// Never authenticates.
pub(crate) const REJECTED_USER: &str = "intruder";

// Task handle that aborts when it's dropped.
pub(crate) struct ServerHandle(tokio::task::JoinHandle<()>);

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) fn client_key() -> PrivateKey {
    PrivateKey::from(Ed25519Keypair::from_seed(&[7u8; 32]))
}

fn host_key() -> PrivateKey {
    PrivateKey::from(Ed25519Keypair::from_seed(&[3u8; 32]))
}

// Writes the client key in OpenSSH format to a file unique to this test.
pub(crate) fn client_key_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("nssh-{name}-{}.key", std::process::id()));
    let contents = client_key()
        .to_openssh(LineEnding::LF)
        .expect("key should encode");
    std::fs::write(&path, contents.as_bytes()).unwrap();
    path
}

/// A small SSH server that understands a handful of commands:
///
/// - `echo TEXT`: prints TEXT and exits with 0
/// - `warn TEXT`: prints TEXT on stderr and exits with 0
/// - `exit N`: exits with N
/// - `cat`: echoes input until EOF, then exits with 0
/// - `kill`: terminates with SIGKILL
/// - `vanish`: closes without an exit status
///
/// Anything else is refused. Shells print their pty settings, echo input and
/// report window changes. Direct TCP/IP channels connect to the requested
/// address, so the server can be used as every hop of a chain.
pub(crate) async fn start_server() -> (SocketAddr, ServerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let config = Arc::new(server::Config {
        keys: vec![host_key()],
        auth_rejection_time: Duration::from_millis(10),
        auth_rejection_time_initial: Some(Duration::ZERO),
        inactivity_timeout: None,
        ..Default::default()
    });
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                if let Ok(session) = server::run_stream(config, stream, TestHandler::default()).await
                {
                    let _ = session.await;
                }
            });
        }
    });
    (address, ServerHandle(handle))
}

// Connects through `server` once per user, authenticating with the password.
pub(crate) async fn password_chain(server: SocketAddr, users: &[&str]) -> Chain<SshConnection> {
    let descriptors: Vec<String> = users
        .iter()
        .map(|user| format!("{user}:{PASSWORD}@{server}"))
        .collect();
    let hops = resolve_all(&descriptors, &IdentityTable::default(), "nobody", &FileKeyLoader)
        .expect("hops should resolve");
    connect(&hops, &ApplicationConfig::default())
        .await
        .expect("chain should connect")
}

// Listener that sends back everything it receives.
pub(crate) async fn start_echo_server() -> (SocketAddr, ServerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    (address, ServerHandle(handle))
}

#[derive(Default)]
struct TestHandler {
    user: String,
    pty: Option<(String, u32, u32)>,
    cat: HashSet<ChannelId>,
    shells: HashSet<ChannelId>,
}

impl TestHandler {
    fn finish(session: &mut Session, channel: ChannelId, status: Option<u32>) {
        if let Some(status) = status {
            let _ = session.exit_status_request(channel, status);
        }
        let _ = session.eof(channel);
        let _ = session.close(channel);
    }
}

fn bytes(text: &str) -> CryptoVec {
    CryptoVec::from_slice(text.as_bytes())
}

impl server::Handler for TestHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user != REJECTED_USER && password == PASSWORD {
            self.user = user.to_string();
            return Ok(Auth::Accept);
        }
        Ok(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        })
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if user != REJECTED_USER && public_key.key_data() == client_key().public_key().key_data() {
            self.user = user.to_string();
            return Ok(Auth::Accept);
        }
        Ok(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        })
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Ok(port) = u16::try_from(port_to_connect) else {
            return Ok(false);
        };
        let Ok(mut stream) = TcpStream::connect((host_to_connect, port)).await else {
            return Ok(false);
        };
        tokio::spawn(async move {
            let mut channel = channel.into_stream();
            let _ = copy_bidirectional(&mut channel, &mut stream).await;
        });
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.user == NO_PTY_USER {
            let _ = session.channel_failure(channel);
        } else {
            self.pty = Some((term.to_string(), col_width, row_height));
            let _ = session.channel_success(channel);
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.data(channel, bytes(&format!("resized {col_width}x{row_height}\r\n")));
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.shells.insert(channel);
        let _ = session.channel_success(channel);
        let banner = match &self.pty {
            Some((term, cols, rows)) => format!("{term} {cols}x{rows}\r\n"),
            None => "no pty\n".to_string(),
        };
        let _ = session.data(channel, bytes(&banner));
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        let (program, argument) = command.split_once(' ').unwrap_or((command.as_str(), ""));
        match program {
            "echo" => {
                let _ = session.channel_success(channel);
                let _ = session.data(channel, bytes(&format!("{argument}\n")));
                Self::finish(session, channel, Some(0));
            }
            "warn" => {
                let _ = session.channel_success(channel);
                let _ = session.extended_data(channel, 1, bytes(&format!("{argument}\n")));
                Self::finish(session, channel, Some(0));
            }
            "exit" => match argument.parse::<u32>() {
                Ok(status) => {
                    let _ = session.channel_success(channel);
                    Self::finish(session, channel, Some(status));
                }
                Err(_) => {
                    let _ = session.channel_failure(channel);
                }
            },
            "cat" => {
                self.cat.insert(channel);
                let _ = session.channel_success(channel);
            }
            "kill" => {
                let _ = session.channel_success(channel);
                let _ = session.exit_signal_request(channel, Sig::KILL, false, "killed", "");
                Self::finish(session, channel, None);
            }
            "vanish" => {
                let _ = session.channel_success(channel);
                Self::finish(session, channel, None);
            }
            _ => {
                let _ = session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.cat.contains(&channel) || self.shells.contains(&channel) {
            let _ = session.data(channel, CryptoVec::from_slice(data));
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.cat.remove(&channel) || self.shells.remove(&channel) {
            Self::finish(session, channel, Some(0));
        }
        Ok(())
    }
}
