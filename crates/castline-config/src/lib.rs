//! KDL configuration parsing for Castline.
//!
//! This crate handles parsing of:
//! - System configuration (castline.kdl)
//! - Environment variable overrides
//! - Human-readable durations (`700ms`, `1.5s`, `1m`)

pub mod duration;
pub mod error;
pub mod system;

pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use system::{
    CastlineConfig, DatabaseConfig, LogFormat, LoggingConfig, ProviderConfig, ProviderMode,
    RealtimeConfig, RunnerConfig, ServerConfig, SweeperConfig, parse_config,
};
