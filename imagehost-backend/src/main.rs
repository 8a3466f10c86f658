use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use imagehost_backend::{config::ImageConfig, build_app, AppState};
use imagehost_shared::AddrInfo;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = imagehost_backend::cli::CliOpts::parse();

    let my_filter = match cli.debug {
        true => "imagehost=debug,imagehost_backend=debug,tower_http=debug",
        false => "imagehost=info,imagehost_backend=info,tower_http=info",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| my_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ImageConfig::from(&cli);
    info!(
        "Storing images in {}, allowed extensions: {:?}, max upload {} bytes",
        config.images_path.display(),
        config.allowed_extensions,
        config.max_upload_size
    );

    let appstate = match AppState::new(config).await {
        Ok(state) => state,
        Err(err) => {
            error!("Failed to initialize application state: {:?}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = appstate.store.reconcile(appstate.config.prune_missing).await {
        error!("Failed to reconcile image storage: {:?}", err);
        return ExitCode::FAILURE;
    }

    let shared_state = Arc::new(appstate);

    let addrinfo = AddrInfo::from_env();

    let app: axum::Router = build_app(&shared_state);

    let listener = match tokio::net::TcpListener::bind(&addrinfo.as_addr()).await {
        Ok(val) => {
            info!("Listening on {}", addrinfo.as_url());
            val
        }
        Err(err) => {
            error!("Failed to bind to {}: {:?}", addrinfo.as_url(), err);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        error!("Server error: {:?}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
