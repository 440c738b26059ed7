use std::{collections::BTreeMap, path::PathBuf, time::Duration};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;
pub const FORWARD_PLACEHOLDER: &str = "fwd";

// Whether to request a pseudo-terminal for the remote session.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum TtyMode {
    /// Request a pseudo-terminal only when no command was given.
    #[default]
    Auto,
    /// Always request a pseudo-terminal.
    Force,
    /// Never request a pseudo-terminal.
    Disable,
}

impl TtyMode {
    // Decide whether the session should be interactive, given the command and
    // whether the local standard streams are attached to a terminal.
    pub fn wants_pty(self, command: &[String], is_terminal: bool) -> bool {
        match self {
            TtyMode::Force => true,
            TtyMode::Disable => false,
            TtyMode::Auto => command.is_empty() && is_terminal,
        }
    }
}

// Private key paths, either for every hop or for specific hop indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityTable {
    pub global: Option<PathBuf>,
    pub indexed: BTreeMap<usize, PathBuf>,
}

impl IdentityTable {
    // Indexed paths take precedence over the global one.
    pub fn path_for(&self, index: usize) -> Option<&PathBuf> {
        self.indexed.get(&index).or(self.global.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_none() && self.indexed.is_empty()
    }
}

// Tunables that don't change what the program does, only how it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationConfig {
    // Maximum time to wait for each hop's TCP connection and SSH handshake.
    pub connect_timeout: Duration,
    // Interval between SSH keepalives on every hop. Disabled when unset.
    pub keepalive_interval: Option<Duration>,
    // Buffer size for each direction of a forwarded connection.
    pub buffer_size: usize,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        ApplicationConfig {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive_interval: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Everything parsed from the command line, before any file or network access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HopPlan {
    /// Hop descriptors in connection order, `[user[:password]@]host[:port]`.
    pub hops: Vec<String>,
    /// Private keys to authenticate with.
    pub identities: IdentityTable,
    /// Remote command (or local command in forwarding mode).
    pub command: Vec<String>,
    /// Target reachable from the last hop to expose on a local port.
    pub forward_target: Option<String>,
    /// Pseudo-terminal override.
    pub tty: TtyMode,
    /// Number of `-v` flags.
    pub verbosity: u8,
    pub config: ApplicationConfig,
}

impl HopPlan {
    // Log filter used when `RUST_LOG` isn't set. Other crates stay at warnings.
    pub fn log_directive(&self) -> String {
        let level = match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        format!("warn,{}={level}", env!("CARGO_CRATE_NAME"))
    }
}
