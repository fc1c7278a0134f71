//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, lengths > 0)
//! - Check names against the set of supported encodings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, which is before logging
//!   exists; legal-but-suspicious settings come back from [`config_warnings`]
//!   for the caller to log once the subscriber is installed

use thiserror::Error;
use url::Url;

use crate::config::schema::ServerConfig;
use crate::http::middleware::shaping::Encoding;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("tunnel.prefix must start with '/' (got {0:?})")]
    TunnelPrefix(String),

    #[error("tunnel.upstream is not a host:port pair: {0}")]
    TunnelUpstream(String),

    #[error("render.upstream is not an http URL: {0}")]
    RenderUpstream(String),

    #[error("build.command must name a program")]
    EmptyBuildCommand,

    #[error("unsupported compression encoding {0:?}")]
    UnknownEncoding(String),

    #[error("site.entry_page must not be empty")]
    EmptyEntryPage,

    #[error("site.id_length must be between 4 and 64 (got {0})")]
    IdLength(usize),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// A setting that is accepted but probably not what the operator meant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigWarning {
    #[error("auth.challenge is on but auth.users is empty; every request will be rejected")]
    EmptyUserTable,

    #[error("tunnel.upstream is not set; tunnel upgrades will be closed")]
    NoTunnelUpstream,
}

pub fn config_warnings(config: &ServerConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    if config.auth.challenge && config.auth.users.is_empty() {
        warnings.push(ConfigWarning::EmptyUserTable);
    }
    if config.tunnel.upstream.is_none() {
        warnings.push(ConfigWarning::NoTunnelUpstream);
    }
    warnings
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.tunnel.prefix.starts_with('/') {
        errors.push(ValidationError::TunnelPrefix(config.tunnel.prefix.clone()));
    }

    if let Some(upstream) = &config.tunnel.upstream {
        if !is_host_port(upstream) {
            errors.push(ValidationError::TunnelUpstream(upstream.clone()));
        }
    }

    if let Some(upstream) = &config.render.upstream {
        match Url::parse(upstream) {
            Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {}
            _ => errors.push(ValidationError::RenderUpstream(upstream.clone())),
        }
    }

    if config.build.command.first().map_or(true, |p| p.trim().is_empty()) {
        errors.push(ValidationError::EmptyBuildCommand);
    }

    for name in &config.compression.encodings {
        if name.parse::<Encoding>().is_err() {
            errors.push(ValidationError::UnknownEncoding(name.clone()));
        }
    }

    if config.site.entry_page.is_empty() {
        errors.push(ValidationError::EmptyEntryPage);
    }

    if !(4..=64).contains(&config.site.id_length) {
        errors.push(ValidationError::IdLength(config.site.id_length));
    }

    if config.listener.header_read_timeout_secs == 0 {
        errors.push(ValidationError::Zero("listener.header_read_timeout_secs"));
    }
    if config.listener.max_head_bytes == 0 {
        errors.push(ValidationError::Zero("listener.max_head_bytes"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }
    if config.render.timeout_secs == 0 {
        errors.push(ValidationError::Zero("render.timeout_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().map_or(false, |p| p != 0),
        None => false,
    }
}
