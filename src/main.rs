mod ais_reformatter;
mod app_log;
mod config;
mod dated_file;
mod error;
mod listener;
mod supervisor;

use std::error::Error;

use app_log::AppLog;
use clap::Parser;
use config::{parse_channels, Args};
use error::ConfigError;
use supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let paths = args.resolve_paths()?;
    let rotation = args.rotation_policy();

    std::fs::create_dir_all(&paths.log_dir).map_err(|e| {
        format!(
            "unable to open logfile folder {} for logging: {e}",
            paths.log_dir.display()
        )
    })?;
    // a fresh operational log for every run
    let app_log = AppLog::open(&paths.log_dir, rotation.max_generations)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(app_log.clone()),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    log_panics(app_log.clone());

    info!("{} v{} started", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    debug!("read args: {args:?}");

    if let Err(e) = std::fs::create_dir_all(&paths.data_dir) {
        error!(
            "Fatal: unable to set data directory to {}: {e}",
            paths.data_dir.display()
        );
        return Err(e.into());
    }

    let content = match std::fs::read_to_string(&paths.config_file) {
        Ok(content) => content,
        Err(source) => {
            let e = ConfigError::Read {
                path: paths.config_file.clone(),
                source,
            };
            error!("Fatal: {e}");
            return Err(e.into());
        }
    };
    let channels = parse_channels(&content)
        .into_iter()
        .filter_map(|parsed| {
            parsed
                .inspect_err(|e| warn!(error = %e, "skipping config entry"))
                .ok()
        })
        .collect();

    let shutdown_token = register_ctrl_c_listener();
    let supervisor = Supervisor {
        data_root: paths.data_dir,
        bind_address: args.bind_address,
        app_log,
        rotation,
        shutdown_token,
    };

    let res = supervisor.run(channels).await;
    match &res {
        Ok(()) => info!("Exiting application."),
        Err(e) => error!("Exiting application: {e}"),
    }
    Ok(res?)
}

/// Panics end up in the operational log instead of only on stderr. They are
/// written directly, not through the subscriber.
fn log_panics(app_log: AppLog) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        _ = app_log.write_line(&format!("PANIC: {panic_info}"));
        default_hook(panic_info);
    }));
}

fn register_ctrl_c_listener() -> CancellationToken {
    let shutdown_token = CancellationToken::new();
    let cloned_token = shutdown_token.clone();
    _ = tokio::task::spawn(async move {
        info!("Set up ctrl_c handler");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("could not set up exit handler: {e}");
            return;
        }
        info!("Shutdown requested");
        cloned_token.cancel();
    });

    shutdown_token
}
