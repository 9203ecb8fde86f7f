use clap::Parser;
use parcel::app::App;
use parcel::cli::Args;
use parcel::config::Config;
use parcel::logging::setup_logging;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config and setup logging before App::new() so startup logs are never silently dropped
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting parcel"
    );

    let app = match App::new(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
