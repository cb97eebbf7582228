use blobpush::cli::{run, Cli};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Cancels `token` on SIGINT or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("Received SIGINT, stopping after in-flight uploads"),
        _ = terminate => tracing::warn!("Received SIGTERM, stopping after in-flight uploads"),
    }

    token.cancel();
}

#[tokio::main]
async fn main() {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };
    let working_dir = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let log_file = blobpush::logging::init(cli.verbose, &working_dir);
    tracing::info!(
        log_file = ?log_file,
        "CLI application startup: tracing initialised, environment loaded"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let code = match run(cli, shutdown).await {
        Ok(outcome) => {
            tracing::info!(?outcome, "CLI completed");
            outcome.exit_code()
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "CLI exited with error");
            eprintln!("[ERROR] {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<blobpush_core::UploadError>()
        .map(|e| e.exit_code())
        .unwrap_or(1)
}
