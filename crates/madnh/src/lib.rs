//! # MadNH - Session Runner
//!
//! Embeds the MadNH event system the way a dialog UI does and runs one
//! scripted session: an application emitter follows a dialog, the dialog
//! follows its buttons, and button clicks are dispatched through waiter keys.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (creates madnh.toml if missing)
//! madnh
//!
//! # Specify custom configuration
//! madnh --config session.toml
//!
//! # Verbose JSON logs
//! madnh --log-level debug --json-logs
//! ```

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod session;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Entry point used by the `madnh` binary.
///
/// Parses the command line, sets up logging from the configuration file,
/// then creates and runs the [`Application`].
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging needs the file's settings before the application loads it for real.
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{LoggingSettings, SessionSettings};
pub use session::{Session, SessionReport};
