pub use crate::{
    chain::{Chain, Connector, HopConnection},
    cli::{ParseOutcome, USAGE, parse_args},
    config::{ApplicationConfig, HopPlan, IdentityTable, TtyMode},
    dial::{BoxedStream, Dialer, TcpDialer},
    entrypoint::{connect, entrypoint},
    hop::{AuthMethod, FileKeyLoader, ForwardTarget, HopSpec, KeyLoader, resolve, resolve_all},
    relay::{Forwarder, Relay},
    session::{PtyRequest, RemoteExit, ResizeWatch, SessionRequest, run_session},
    ssh::{SshConnection, SshConnector},
};

pub mod chain;
pub mod cli;
pub mod config;
pub mod dial;
pub mod droppable_handle;
mod entrypoint;
pub mod error;
pub mod hop;
pub mod launcher;
pub mod relay;
pub mod session;
pub mod ssh;
pub mod template;
pub mod terminal;
