use clap::Parser;
use tracing::debug;

use crate::cli::{process_args, Args, Invocation};
use crate::config::Settings;
use crate::errors::TunnelError;
use crate::k8s::portforward::PortForwardManager;
use crate::k8s::session::TunnelState;
use crate::logging::init_logging;
use crate::signals;
use crate::status::ExitStatus;

/// Main entry point for the CLI.
///
/// Parses arguments, loads the settings file, opens the tunnel and blocks
/// until it ends.
pub fn run(args: Vec<String>) -> ExitStatus {
    let parsed = match Args::try_parse_from(&args) {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion
            {
                ExitStatus::Success
            } else {
                ExitStatus::Error
            };
        }
    };

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}", e);
            Settings::default()
        }
    };

    let invocation = match process_args(&parsed, &settings) {
        Ok(invocation) => invocation,
        Err(e) => return handle_error(e),
    };

    init_logging(invocation.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return handle_error(TunnelError::Io(e)),
    };

    match runtime.block_on(program(invocation)) {
        Ok(status) => status,
        Err(e) => handle_error(e),
    }
}

/// Open the tunnel and wait for it to end
pub async fn program(invocation: Invocation) -> Result<ExitStatus, TunnelError> {
    debug!(request = ?invocation.request, "Starting");

    let manager = PortForwardManager::with_options(invocation.options);
    let handle = manager.forward(&invocation.request).await?;

    println!(
        "Forwarding from {} -> {}/{}:{}",
        handle.local_addr(),
        handle.key().namespace,
        handle.pod(),
        invocation.request.remote_port
    );

    let finished = handle.finished().await;
    if let TunnelState::Failed(message) = &finished {
        eprintln!("podtunnel: tunnel failed: {}", message);
    }

    manager.close_all();
    Ok(exit_status(&finished, signals::was_interrupted()))
}

/// Exit status for a tunnel that has ended
fn exit_status(finished: &TunnelState, interrupted: bool) -> ExitStatus {
    match finished {
        TunnelState::Failed(_) => ExitStatus::Error,
        _ if interrupted => ExitStatus::Interrupted,
        _ => ExitStatus::Success,
    }
}

fn handle_error(error: TunnelError) -> ExitStatus {
    eprintln!("podtunnel: {}", error);
    let mut source = std::error::Error::source(&error);
    while let Some(cause) = source {
        debug!(cause = %cause, "Caused by");
        source = cause.source();
    }
    ExitStatus::Error
}
