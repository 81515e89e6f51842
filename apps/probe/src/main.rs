use anyhow::Context;
use clap::Parser;
use rundial_logger::Logger;
use rundial_probe::args::Cli;
use rundial_probe::{logging_config, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = logging_config(cli.config.as_deref())?;
    let _log = Logger::from_config(&logging).context("Initializing logger")?;

    let mut stdout = std::io::stdout().lock();
    tokio::select! {
        res = run(cli, &mut stdout) => res,
        _ = tokio::signal::ctrl_c() => {
            // Dropping `run` drops its release guard, which closes opened connections.
            tracing::warn!("Interrupted, closing connections");
            Ok(())
        },
    }
}
