//! LimitRange conformance runner

use clap::Parser;

use limitrange_conformance::cli::Cli;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    match cli.run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be installed if the failure happened that early
            tracing::error!(error = %e, "LimitRange conformance run failed");
            eprintln!("Error: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
