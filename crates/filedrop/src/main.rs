//! filedrop daemon: watches a directory and tracks every dropped file
//! through the processing lifecycle.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tracing_subscriber::EnvFilter;

use filedrop::{load_config, Database, IngestService, ReadCheck};

fn init_logging() {
    // Bridge `log` macros from the library into the tracing subscriber.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to install log bridge: {}", e);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".filedrop").join("config.json"))
}

fn run() -> filedrop::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(default_config_path)
        .ok_or_else(|| filedrop::ConfigError::Validation {
            message: "No config path given and no home directory found".to_string(),
        })?;

    info!("Loading config from {}", config_path.display());
    let config = load_config(&config_path)?;

    let db = Database::open_default(config.database_path.as_deref())?;

    let mut service = IngestService::new(config, db);
    service.start(Arc::new(ReadCheck))?;

    let running = Arc::new(AtomicBool::new(true));
    let running_in_handler = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        running_in_handler.store(false, Ordering::Relaxed);
    }) {
        error!("Failed to install signal handler: {}", e);
    }

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    service.stop();
    Ok(())
}

fn main() -> ExitCode {
    init_logging();

    info!("Starting filedrop v{}", env!("CARGO_PKG_VERSION"));

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
