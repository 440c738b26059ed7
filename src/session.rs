use std::sync::Arc;

use russh::{Channel, ChannelMsg, ChannelWriteHalf, client::Msg};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    droppable_handle::DroppableHandle,
    error::SessionError,
    terminal::{FALLBACK_SIZE, TerminalSize},
};

const STDIN_CHUNK: usize = 8 * 1024;

/// A pseudo-terminal to allocate before the shell or command starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl PtyRequest {
    // Sized after the local terminal, or 80x24 when it can't be queried.
    pub fn for_terminal(term: String, terminal: &dyn TerminalSize) -> Self {
        let (cols, rows) = terminal.size().unwrap_or_else(|error| {
            #[cfg(not(coverage_nightly))]
            debug!(%error, "Unable to query terminal size, using fallback.");
            FALLBACK_SIZE
        });
        PtyRequest {
            term,
            cols: cols.into(),
            rows: rows.into(),
        }
    }
}

/// What to run on the last hop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// `None` starts the login shell.
    pub command: Option<String>,
    pub pty: Option<PtyRequest>,
}

impl SessionRequest {
    fn kind(&self) -> &'static str {
        match self.command {
            Some(_) => "exec",
            None => "shell",
        }
    }
}

/// How the remote side finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteExit {
    Code(u32),
    Signal(String),
    // The channel closed without reporting a status.
    Missing,
}

impl RemoteExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RemoteExit::Code(code) => i32::try_from(*code).unwrap_or(255),
            RemoteExit::Signal(_) | RemoteExit::Missing => 255,
        }
    }
}

/// Resize notifications and where to read the new size from.
pub struct ResizeWatch {
    pub notifications: mpsc::UnboundedReceiver<()>,
    pub terminal: Box<dyn TerminalSize>,
}

// Something that accepts window-change requests. Implemented by session
// channels, and by recorders in tests.
pub(crate) trait WindowResizer {
    async fn resize(&self, cols: u32, rows: u32) -> Result<(), russh::Error>;
}

impl WindowResizer for ChannelWriteHalf<Msg> {
    async fn resize(&self, cols: u32, rows: u32) -> Result<(), russh::Error> {
        self.window_change(cols, rows, 0, 0).await
    }
}

// Sends exactly one window-change with the current local size. A failed query
// sends nothing; neither failure ends the session.
pub(crate) async fn propagate_resize<T, R>(terminal: &T, target: &R) -> bool
where
    T: TerminalSize + ?Sized,
    R: WindowResizer,
{
    let (cols, rows) = match terminal.size() {
        Ok(size) => size,
        Err(error) => {
            #[cfg(not(coverage_nightly))]
            warn!(%error, "Unable to query terminal size.");
            return false;
        }
    };
    match target.resize(cols.into(), rows.into()).await {
        Ok(()) => {
            #[cfg(not(coverage_nightly))]
            debug!(cols, rows, "Propagated window change.");
            true
        }
        Err(error) => {
            #[cfg(not(coverage_nightly))]
            warn!(%error, "Failed to send window change.");
            false
        }
    }
}

// Forwards `stdin` to the remote on its own task, then sends EOF. Writes wait
// on the remote window, so they must never hold up reading the channel.
fn spawn_stdin_pump<R>(mut stdin: R, writer: Arc<ChannelWriteHalf<Msg>>) -> DroppableHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    DroppableHandle(tokio::spawn(async move {
        let mut buf = vec![0u8; STDIN_CHUNK];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => {
                    // The remote side may close first; input it no longer wants is dropped.
                    if let Err(error) = writer.data(&buf[..read]).await {
                        #[cfg(not(coverage_nightly))]
                        debug!(%error, "Remote stopped accepting input.");
                        return;
                    }
                }
                Err(error) => {
                    #[cfg(not(coverage_nightly))]
                    warn!(%error, "Error reading standard input.");
                    break;
                }
            }
        }
        if let Err(error) = writer.eof().await {
            #[cfg(not(coverage_nightly))]
            debug!(%error, "Unable to send EOF.");
        }
    }))
}

async fn next_resize(watch: &mut Option<ResizeWatch>) -> Option<()> {
    match watch {
        Some(watch) => watch.notifications.recv().await,
        None => std::future::pending().await,
    }
}

// Waits for the reply to a request sent with `want_reply`. Data arriving
// first is not expected before the reply, so anything else is skipped.
async fn wait_for_reply(channel: &mut Channel<Msg>, kind: &'static str) -> Result<bool, SessionError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(true),
            Some(ChannelMsg::Failure) => return Ok(false),
            Some(ChannelMsg::Close) | None => return Err(SessionError::ClosedEarly(kind)),
            Some(_) => {}
        }
    }
}

/// Runs a shell or a command on `channel`, relaying standard streams until
/// the remote side closes the channel.
///
/// Local EOF on `stdin` is forwarded as channel EOF; remote output keeps being
/// relayed afterwards. When `resize` is given, each notification sends the
/// local terminal's current size to the remote pseudo-terminal.
pub async fn run_session<R, W, E>(
    mut channel: Channel<Msg>,
    request: SessionRequest,
    stdin: R,
    stdout: &mut W,
    stderr: &mut E,
    mut resize: Option<ResizeWatch>,
) -> Result<RemoteExit, SessionError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    if let Some(pty) = &request.pty {
        channel
            .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &[])
            .await
            .map_err(SessionError::Channel)?;
        if !wait_for_reply(&mut channel, "pty-req").await? {
            return Err(SessionError::PtyRejected);
        }
        #[cfg(not(coverage_nightly))]
        debug!(term = %pty.term, cols = pty.cols, rows = pty.rows, "Allocated remote pty.");
    }
    let kind = request.kind();
    match &request.command {
        Some(command) => {
            #[cfg(not(coverage_nightly))]
            info!(%command, "Running remote command.");
            channel
                .exec(true, command.as_str())
                .await
                .map_err(SessionError::Channel)?;
        }
        None => {
            #[cfg(not(coverage_nightly))]
            info!("Starting remote shell.");
            channel
                .request_shell(true)
                .await
                .map_err(SessionError::Channel)?;
        }
    }

    let (mut reader, writer) = channel.split();
    let writer = Arc::new(writer);
    let _pump = spawn_stdin_pump(stdin, Arc::clone(&writer));
    let mut awaiting_reply = true;
    let mut exit = RemoteExit::Missing;
    loop {
        tokio::select! {
            message = reader.wait() => {
                let Some(message) = message else {
                    break;
                };
                match message {
                    ChannelMsg::Data { data } => {
                        stdout.write_all(&data).await.map_err(SessionError::Io)?;
                        stdout.flush().await.map_err(SessionError::Io)?;
                    }
                    ChannelMsg::ExtendedData { data, .. } => {
                        stderr.write_all(&data).await.map_err(SessionError::Io)?;
                        stderr.flush().await.map_err(SessionError::Io)?;
                    }
                    ChannelMsg::Success if awaiting_reply => awaiting_reply = false,
                    ChannelMsg::Failure if awaiting_reply => {
                        return Err(SessionError::Rejected(kind));
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        #[cfg(not(coverage_nightly))]
                        debug!(exit_status, "Remote exit status.");
                        exit = RemoteExit::Code(exit_status);
                    }
                    ChannelMsg::ExitSignal { signal_name, error_message, .. } => {
                        #[cfg(not(coverage_nightly))]
                        debug!(signal = ?signal_name, %error_message, "Remote terminated by signal.");
                        exit = RemoteExit::Signal(format!("{signal_name:?}"));
                    }
                    ChannelMsg::Close => break,
                    _ => {}
                }
            }
            notification = next_resize(&mut resize), if resize.is_some() => {
                match (notification, &resize) {
                    (Some(()), Some(watch)) => {
                        propagate_resize(watch.terminal.as_ref(), writer.as_ref()).await;
                    }
                    _ => resize = None,
                }
            }
        }
    }
    #[cfg(not(coverage_nightly))]
    debug!(?exit, "Session closed.");
    Ok(exit)
}
