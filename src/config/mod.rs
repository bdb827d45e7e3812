//! The `config` module loads the relay configuration.
//!
//! Sources, lowest precedence first:
//! - an optional `config/default.{toml,yaml,json}` file
//! - environment variables prefixed with `ASB_` (nested keys use `__`,
//!   e.g. `ASB_SERVER__PORT`)
//!
//! The five broker values (`ASB_BROKER_URL`, `ASB_ACCESS_KEY_NAME`,
//! `ASB_ACCESS_KEY`, `ASB_TOPIC`, `ASB_SUBSCRIPTION`) have no defaults;
//! a missing or empty one is an error naming the variable.

mod settings;

use std::time::Duration;

use ::config::{Config, Environment, File};
use thiserror::Error;

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, ConnectionDescriptor, ServerSettings, Settings, Transport, subscription_path,
};

const DEFAULT_CONFIG_FILE: &str = "config/default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Source(#[from] ::config::ConfigError),
}

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Same as [`load_config`] with an explicit file base name (extension is
/// resolved by the `config` crate).
pub fn load_config_from(file: &str) -> Result<Settings, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix("ASB")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    let default = ServerSettings::default();
    let server = partial.server.unwrap_or_default();

    let connection = ConnectionDescriptor::new(
        required(partial.broker_url, "ASB_BROKER_URL")?,
        required(partial.access_key_name, "ASB_ACCESS_KEY_NAME")?,
        required(partial.access_key, "ASB_ACCESS_KEY")?,
    );
    let topic = required(partial.topic, "ASB_TOPIC")?;
    let subscription = required(partial.subscription, "ASB_SUBSCRIPTION")?;

    Ok(Settings {
        server: ServerSettings {
            host: server.host.unwrap_or(default.host),
            port: server.port.unwrap_or(default.port),
            shutdown_grace: server
                .shutdown_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(default.shutdown_grace),
        },
        broker: BrokerSettings::new(connection, topic, &subscription),
        transport: partial.transport.unwrap_or_default(),
    })
}

fn required(value: Option<String>, variable: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(variable))
}
