use std::io::{self, IsTerminal};

#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_TERM: &str = "xterm";
pub const FALLBACK_SIZE: (u16, u16) = (80, 24);

// Source of the local terminal's geometry, as (columns, rows).
#[cfg_attr(test, automock)]
pub trait TerminalSize: Send + Sync {
    fn size(&self) -> io::Result<(u16, u16)>;
}

/// The terminal this process is attached to.
pub struct LocalTerminal;

impl TerminalSize for LocalTerminal {
    fn size(&self) -> io::Result<(u16, u16)> {
        crossterm::terminal::size()
    }
}

// Whether both standard input and output are attached to a terminal.
pub fn is_interactive() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

// The terminal type to advertise to the remote pseudo-terminal.
pub fn term_name() -> String {
    std::env::var("TERM")
        .ok()
        .filter(|term| !term.is_empty())
        .unwrap_or_else(|| DEFAULT_TERM.to_string())
}

/// Notifications for every local terminal resize.
///
/// The receiver yields `()` once per resize and closes if notifications aren't
/// available on this platform.
pub fn resize_notifications() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::window_change()) {
            Ok(mut sigwinch) => {
                tokio::spawn(async move {
                    while sigwinch.recv().await.is_some() {
                        if tx.send(()).is_err() {
                            break;
                        }
                    }
                });
            }
            Err(error) => {
                #[cfg(not(coverage_nightly))]
                warn!(%error, "Unable to listen for terminal resizes.");
            }
        }
    }
    #[cfg(not(unix))]
    drop(tx);
    rx
}

// Puts the local terminal in raw mode until dropped.
pub struct RawMode(());

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(RawMode(()))
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(error) = crossterm::terminal::disable_raw_mode() {
            #[cfg(not(coverage_nightly))]
            debug!(%error, "Failed to restore terminal mode.");
        }
    }
}
