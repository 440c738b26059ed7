use std::{io, path::PathBuf, time::Duration};

// Errors from the command-line scanner and hop descriptors. None of these
// happen after any network activity.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("No SSH hops given (expected at least one user@host argument)")]
    NoHops,
    #[error("Invalid port {port:?} in hop {descriptor:?}")]
    InvalidPort { descriptor: String, port: String },
    #[error("Missing host in hop {0:?}")]
    MissingHost(String),
    #[error("Unknown short option '-{0}'")]
    UnknownShortOption(char),
    #[error("Unknown long option '--{0}'")]
    UnknownLongOption(String),
    #[error("Option {0} requires a value")]
    MissingValue(String),
    #[error("Option --{0} does not take a value")]
    UnexpectedValue(String),
    #[error("Invalid hop index {0:?} for -i")]
    InvalidIdentityIndex(String),
    #[error("Invalid value {value:?} for {option}: {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },
    #[error("--run_local_fwd requires a local command to run")]
    ForwardWithoutCommand,
    #[error("-t and -T cannot be used together")]
    ConflictingTtyFlags,
}

#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    #[error("Unable to read private key {}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid private key {}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },
}

// The reason a single hop couldn't be established.
#[derive(thiserror::Error, Debug)]
pub enum HopError {
    #[error("Connection failed")]
    Dial(#[source] io::Error),
    #[error("SSH handshake failed")]
    Handshake(#[source] russh::Error),
    #[error("Timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    #[error("Authentication as {user:?} failed (offered: {offered})")]
    Authentication { user: String, offered: String },
}

// A chain that couldn't be built. Every hop before `index` has been closed by
// the time this is returned.
#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error("At least one hop is required")]
    Empty,
    #[error("Unable to connect to hop {index} ({address})")]
    Hop {
        index: usize,
        address: String,
        #[source]
        source: HopError,
    },
}

impl ChainError {
    pub fn hop_index(&self) -> Option<usize> {
        match self {
            ChainError::Empty => None,
            ChainError::Hop { index, .. } => Some(*index),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Unable to open session channel")]
    Open(#[source] russh::Error),
    #[error("Pseudo-terminal request was rejected")]
    PtyRejected,
    #[error("Remote rejected the {0} request")]
    Rejected(&'static str),
    #[error("Session channel closed while waiting for the {0} reply")]
    ClosedEarly(&'static str),
    #[error("Session channel error")]
    Channel(#[source] russh::Error),
    #[error("Local I/O error")]
    Io(#[source] io::Error),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unterminated placeholder in argument {argument:?}")]
    Unterminated { argument: String },
    #[error("Empty placeholder in argument {argument:?}")]
    Empty { argument: String },
    #[error("Unknown placeholder {name:?} in argument {argument:?}")]
    Unknown { name: String, argument: String },
}

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("Unable to bind local listener")]
    Bind(#[source] io::Error),
    #[error("Forwarded dial to {target} failed")]
    ForwardDial {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("Forwarded connection I/O failed")]
    Copy(#[source] io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("No local command to run")]
    EmptyCommand,
    #[error("Unable to start local command {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Error waiting for local command {program:?}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

// Errors from turning a hop descriptor into a connection target.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}
