//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the edge server.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Port used when neither the environment nor the config file names one.
pub const DEFAULT_PORT: u16 = 8080;

/// Root configuration for the edge server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Listening port. `PORT` in the environment takes precedence.
    pub port: Option<u16>,

    /// Access gate (HTTP Basic) settings.
    pub auth: AuthConfig,

    /// Site layout: page sources, build output, asset root.
    pub site: SiteConfig,

    /// External site compiler invocation.
    pub build: BuildConfig,

    /// Server-rendered page handler.
    pub render: RenderConfig,

    /// Tunnel upgrade hand-off.
    pub tunnel: TunnelConfig,

    /// Response compression negotiation.
    pub compression: CompressionConfig,

    /// Connection-level limits and timeouts.
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            auth: AuthConfig::default(),
            site: SiteConfig::default(),
            build: BuildConfig::default(),
            render: RenderConfig::default(),
            tunnel: TunnelConfig::default(),
            compression: CompressionConfig::default(),
            listener: ListenerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Resolve the listening port: environment override, then config, then default.
    pub fn resolve_port(&self, env_port: Option<&str>) -> u16 {
        resolve_port(env_port, self.port)
    }

    /// Socket address string for the listener.
    pub fn bind_address(&self, env_port: Option<&str>) -> String {
        format!("{}:{}", self.host, self.resolve_port(env_port))
    }
}

/// Port fallback chain. Zero and unparsable values count as unset.
pub fn resolve_port(env_port: Option<&str>, config_port: Option<u16>) -> u16 {
    env_port
        .and_then(|p| p.trim().parse::<u16>().ok())
        .filter(|p| *p != 0)
        .or(config_port.filter(|p| *p != 0))
        .unwrap_or(DEFAULT_PORT)
}

/// Access gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require HTTP Basic credentials on every normal request.
    pub challenge: bool,

    /// Username → password table.
    pub users: BTreeMap<String, String>,

    /// Realm announced in the `WWW-Authenticate` challenge.
    pub realm: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            challenge: false,
            users: BTreeMap::new(),
            realm: "site".to_string(),
        }
    }
}

/// Site layout. Relative paths are resolved against `root`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Project root the compiler runs in.
    pub root: PathBuf,

    /// Directory holding page-definition files.
    pub pages_dir: PathBuf,

    /// Page file that is never renamed.
    pub entry_page: String,

    /// Extension (without dot) that marks a page-definition file.
    pub page_extension: String,

    /// Compiled output; its presence means the site is built.
    pub output_dir: PathBuf,

    /// Static asset root served for exact file matches.
    pub client_dir: PathBuf,

    /// Rename manifest written while page names are randomized.
    pub manifest: PathBuf,

    /// Length of generated page identifiers.
    pub id_length: usize,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            pages_dir: PathBuf::from("src/pages"),
            entry_page: "index.astro".to_string(),
            page_extension: "astro".to_string(),
            output_dir: PathBuf::from("dist"),
            client_dir: PathBuf::from("dist/client"),
            manifest: PathBuf::from(".route-manifest.json"),
            id_length: 9,
        }
    }
}

impl SiteConfig {
    pub fn pages_path(&self) -> PathBuf {
        self.root.join(&self.pages_dir)
    }

    pub fn output_path(&self) -> PathBuf {
        self.root.join(&self.output_dir)
    }

    pub fn client_path(&self) -> PathBuf {
        self.root.join(&self.client_dir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest)
    }
}

/// Site compiler invocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Program and arguments, run in `site.root`.
    pub command: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec!["npx".to_string(), "astro".to_string(), "build".to_string()],
        }
    }
}

/// Rendered-page handler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Base URL of the SSR server (e.g., "http://127.0.0.1:4321").
    /// Without one, unmatched paths get a plain 404.
    pub upstream: Option<String>,

    /// Upstream response timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            upstream: None,
            timeout_secs: 30,
        }
    }
}

/// Tunnel hand-off configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Literal request-target prefix reserved for tunnel upgrades.
    pub prefix: String,

    /// Tunnel engine address (e.g., "127.0.0.1:4000").
    pub upstream: Option<String>,

    /// Connect timeout towards the tunnel engine in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            prefix: "/f".to_string(),
            upstream: None,
            connect_timeout_secs: 5,
        }
    }
}

/// Compression preference list, most preferred first.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub encodings: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            encodings: vec!["br".to_string(), "gzip".to_string(), "deflate".to_string()],
        }
    }
}

/// Connection-level limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Time allowed for the first request head to arrive.
    pub header_read_timeout_secs: u64,

    /// Upper bound on the first request head in bytes.
    pub max_head_bytes: usize,

    /// How long shutdown waits for in-flight connections.
    pub shutdown_grace_secs: u64,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            header_read_timeout_secs: 10,
            max_head_bytes: 16 * 1024,
            shutdown_grace_secs: 10,
            max_connections: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG` is unset.
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_prefers_environment() {
        assert_eq!(resolve_port(Some("3000"), Some(4000)), 3000);
    }

    #[test]
    fn port_falls_back_to_config_then_default() {
        assert_eq!(resolve_port(None, Some(4000)), 4000);
        assert_eq!(resolve_port(Some("not-a-port"), Some(4000)), 4000);
        assert_eq!(resolve_port(Some("0"), None), DEFAULT_PORT);
        assert_eq!(resolve_port(None, None), DEFAULT_PORT);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str("port = 9000\n").unwrap();
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.tunnel.prefix, "/f");
        assert_eq!(config.compression.encodings, vec!["br", "gzip", "deflate"]);
        assert!(!config.auth.challenge);
    }

    #[test]
    fn auth_users_parse_as_table() {
        let config: ServerConfig = toml::from_str(
            r#"
            [auth]
            challenge = true
            [auth.users]
            a = "b"
            "#,
        )
        .unwrap();
        assert!(config.auth.challenge);
        assert_eq!(config.auth.users.get("a").map(String::as_str), Some("b"));
    }
}
