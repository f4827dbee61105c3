// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::{
    ApiConfig, ApiKeys, EngineSettings, ExecutionMode, LoggingSettings, PaperSettings, Settings,
};

/// Loads the application configuration.
///
/// Sources, in precedence order (later wins):
/// 1. `stratum.toml` (or the file given in `path`), optional — every
///    section has serde defaults so a missing file yields a usable config;
/// 2. environment variables prefixed `STRATUM_` with `__` as the section
///    separator (e.g. `STRATUM_ENGINE__CYCLE_SECS=30`).
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = path.unwrap_or("stratum");

    let builder = config::Config::builder()
        .add_source(config::File::with_name(file).required(false))
        .add_source(config::Environment::with_prefix("STRATUM").separator("__"))
        .build()?;

    let settings = builder.try_deserialize::<Settings>()?;
    settings.validate()?;

    Ok(settings)
}

/// Initializes the global `tracing` subscriber from logging settings.
///
/// Honors `RUST_LOG` when set, falling back to the configured filter.
/// When file logging is enabled, output additionally goes to a daily
/// rolling file; the returned guard must be held for the lifetime of the
/// process or buffered lines are lost on exit.
pub fn init_tracing(
    logging: &settings::LoggingSettings,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, ConfigError> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.clone()));

    if logging.file_logging {
        let appender = tracing_appender::rolling::daily(&logging.directory, &logging.file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .try_init()
            .map_err(|e| ConfigError::validation(format!("failed to init tracing: {e}")))?;

        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ConfigError::validation(format!("failed to init tracing: {e}")))?;

        Ok(None)
    }
}
