use std::{path::PathBuf, sync::Arc};

use color_eyre::eyre::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    chain::Chain,
    config::{ApplicationConfig, HopPlan, IdentityTable},
    dial::{Dialer, TcpDialer},
    error::ChainError,
    hop::{FileKeyLoader, ForwardTarget, HopSpec, resolve_all},
    launcher,
    relay::{Forwarder, Relay},
    session::{PtyRequest, RemoteExit, ResizeWatch, SessionRequest, run_session},
    ssh::{SshConnection, SshConnector},
    template,
    terminal::{self, LocalTerminal, RawMode},
};

// Falls back to `~/.ssh/id_rsa` as the global identity when none was given, if
// that file exists. Indexed identities still override it for their own hop.
pub(crate) fn with_default_identity(
    identities: &IdentityTable,
    home: Option<PathBuf>,
) -> IdentityTable {
    let mut identities = identities.clone();
    if identities.global.is_none()
        && let Some(path) = home.map(|home| home.join(".ssh").join("id_rsa"))
        && path.is_file()
    {
        #[cfg(not(coverage_nightly))]
        debug!(path = %path.display(), "Using default identity.");
        identities.global = Some(path);
    }
    identities
}

/// Connects to every hop with SSH, the first one over plain TCP.
pub async fn connect(
    hops: &[HopSpec],
    config: &ApplicationConfig,
) -> Result<Chain<SshConnection>, ChainError> {
    Chain::establish(
        hops,
        &SshConnector::new(config),
        &TcpDialer::new(config.connect_timeout),
    )
    .await
}

#[doc(hidden)]
// Main entrypoint of the application. Returns the process exit code.
pub async fn entrypoint(plan: HopPlan) -> color_eyre::Result<i32> {
    // Everything that can be rejected up front is, before any network activity.
    let forward_target = plan
        .forward_target
        .as_deref()
        .map(ForwardTarget::parse)
        .transpose()?;
    let identities = with_default_identity(&plan.identities, dirs::home_dir());
    let hops = resolve_all(&plan.hops, &identities, &whoami::username(), &FileKeyLoader)?;

    let chain = connect(&hops, &plan.config).await?;
    #[cfg(not(coverage_nightly))]
    info!(hops = chain.len(), last = %chain.terminal().address(), "Connected to every hop.");
    let outcome = match forward_target {
        Some(target) => forward_and_launch(&chain, target, &plan).await,
        None => run_remote(&chain, &plan).await,
    };
    chain.close().await;
    outcome
}

// Exposes `target` on a loopback port and runs the local command against it.
async fn forward_and_launch(
    chain: &Chain<SshConnection>,
    target: ForwardTarget,
    plan: &HopPlan,
) -> color_eyre::Result<i32> {
    let relay = Relay::bind()
        .await
        .with_context(|| "Error setting up local forwarding listener")?;
    let command = template::substitute(&plan.command, &relay.local_addr().to_string())?;
    let dialer: Arc<dyn Dialer> = chain.terminal();
    let cancellation = CancellationToken::new();
    let _relay = relay.spawn(
        Forwarder::builder()
            .dialer(dialer)
            .target(target)
            .buffer_size(plan.config.buffer_size)
            .build(),
        cancellation.clone(),
    );
    let code = launcher::run_local(&command).await?;
    cancellation.cancel();
    Ok(code)
}

// Runs the command or an interactive shell on the last hop.
async fn run_remote(chain: &Chain<SshConnection>, plan: &HopPlan) -> color_eyre::Result<i32> {
    let interactive = terminal::is_interactive();
    let pty = plan.tty.wants_pty(&plan.command, interactive);
    let request = SessionRequest {
        command: (!plan.command.is_empty()).then(|| plan.command.join(" ")),
        pty: pty.then(|| PtyRequest::for_terminal(terminal::term_name(), &LocalTerminal)),
    };
    let resize = pty.then(|| ResizeWatch {
        notifications: terminal::resize_notifications(),
        terminal: Box::new(LocalTerminal),
    });
    let channel = chain.terminal().open_session().await?;
    // `-t` may force a pty over piped input, which can't be put in raw mode.
    let raw_mode = if pty && interactive {
        Some(RawMode::enable().with_context(|| "Error enabling raw terminal mode")?)
    } else {
        None
    };
    let exit = run_session(
        channel,
        request,
        tokio::io::stdin(),
        &mut tokio::io::stdout(),
        &mut tokio::io::stderr(),
        resize,
    )
    .await;
    drop(raw_mode);
    let exit = exit?;
    match &exit {
        RemoteExit::Signal(signal) => {
            #[cfg(not(coverage_nightly))]
            warn!(%signal, "Remote process was killed by a signal.");
        }
        RemoteExit::Missing => {
            #[cfg(not(coverage_nightly))]
            warn!("Remote process exited without a status.");
        }
        RemoteExit::Code(_) => (),
    }
    Ok(exit.exit_code())
}
