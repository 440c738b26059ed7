use color_eyre::eyre::Context;
use nssh::{ParseOutcome, USAGE, entrypoint, parse_args};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let plan = match parse_args(std::env::args().skip(1))
        .with_context(|| "Invalid arguments (see --help)")?
    {
        ParseOutcome::Run(plan) => plan,
        ParseOutcome::Help => {
            print!("{USAGE}");
            return Ok(());
        }
        ParseOutcome::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };

    // Logs go to stderr so stdout only carries the remote session's output.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(plan.log_directive()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(ErrorLayer::default())
        .init();

    let code = entrypoint(plan).await?;
    // Every connection is closed by now.
    std::process::exit(code);
}
