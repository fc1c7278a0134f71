//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + PORT env
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable) + warnings, logged by the
//!       caller once logging is up
//!     → shared by value/Arc with every subsystem
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; there is no runtime reconfiguration
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigError, ConfigSource};
pub use schema::{
    AuthConfig, BuildConfig, CompressionConfig, ListenerConfig, ObservabilityConfig,
    RenderConfig, ServerConfig, SiteConfig, TunnelConfig,
};
pub use validation::{config_warnings, ConfigWarning};
