//! `rogueport <config.toml>`

use std::path::PathBuf;
use std::process::ExitCode;

use rogueport::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("config.toml"), PathBuf::from);

    // One thread drives every socket, pipe and timer.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "couldn't start the runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config_path: PathBuf) -> Result<(), RogueportError> {
    let server = RogueportServer::builder()
        .config_path(config_path)
        .build()
        .await?;
    server.run().await
}
