//! Main application logic and lifecycle management.
//!
//! The `Application` loads and validates configuration, then drives one
//! scripted [`Session`] and reports what it observed.

use crate::{cli::CliArgs, config::AppConfig, session::Session};
use tracing::{info, warn};

/// Main application struct.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        Ok(Self::with_config(config))
    }

    /// Creates an application from an already validated configuration.
    pub fn with_config(config: AppConfig) -> Self {
        Self { config }
    }

    /// Runs the session and logs its report.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting MadNH session v{}", madnh_event_system::VERSION);
        self.log_configuration_summary();

        let session = Session::new(&self.config)?;
        let report = session.run().await?;

        info!("📊 Session Report:");
        info!("  - Buttons: {}", report.buttons);
        info!("  - Clicks noticed by dialog: {}", report.clicks);
        info!("  - Lifecycle events noticed by app: {}", report.lifecycle);
        info!("  - Notices received by app: {}", report.app_notices);

        if !report.dialog_closed {
            warn!("⚠️ The application never saw the dialog close");
        }
        if report.leftover_waiters > 0 {
            warn!("⚠️ {} waiter key(s) were not cleaned up", report.leftover_waiters);
        }

        info!("✅ MadNH session complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🎚️ Default priority: {}", self.config.emitter.default_priority);
        info!("  🚰 Listener limit: {}", self.config.emitter.listener_limit);
        info!("  ⏱️ Async delay: {}ms", self.config.emitter.async_delay_ms);
        info!(
            "  🔘 Buttons: {} ({} notices)",
            self.config.session.buttons,
            if self.config.session.hard_attach { "hard" } else { "async" }
        );
    }
}
