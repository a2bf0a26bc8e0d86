mod config;
mod error;
mod validation;

pub use config::{
    resolve_env, ChannelConfig, ChannelKind, Config, PostgresConfig, RetryConfig,
    DEFAULT_CONFIG_PATH,
};
pub use error::{ConfigError, ConfigResult};
pub use validation::validate_config;
