mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BackendKind, DeliverySettings, LogSettings, ServerSettings, Settings, StorageSettings,
};

/// Prefix of environment variables read by `load_config`, e.g.
/// `CHAT_RELAY__DELIVERY__BACKEND=durable`.
pub const ENV_PREFIX: &str = "CHAT_RELAY";

/// Loads the configuration from `config/default`, a `.env` file and the
/// environment, then merges it onto the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = merge(partial, Settings::default());
    validate(&settings)?;
    Ok(settings)
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        delivery: DeliverySettings {
            backend: partial
                .delivery
                .as_ref()
                .and_then(|d| d.backend)
                .unwrap_or(default.delivery.backend),
            max_backlog: partial
                .delivery
                .as_ref()
                .and_then(|d| d.max_backlog)
                .unwrap_or(default.delivery.max_backlog),
            poll_interval_ms: partial
                .delivery
                .as_ref()
                .and_then(|d| d.poll_interval_ms)
                .unwrap_or(default.delivery.poll_interval_ms),
        },
        storage: StorageSettings {
            path: partial
                .storage
                .as_ref()
                .and_then(|s| s.path.clone())
                .unwrap_or(default.storage.path),
        },
        log: LogSettings {
            level: partial
                .log
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.log.level),
        },
    }
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.delivery.max_backlog == 0 {
        return Err(ConfigError::Message(
            "delivery.max_backlog must be at least 1".to_string(),
        ));
    }
    if settings.delivery.poll_interval_ms == 0 {
        return Err(ConfigError::Message(
            "delivery.poll_interval_ms must be at least 1".to_string(),
        ));
    }
    Ok(())
}
