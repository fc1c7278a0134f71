//! Site edge server library.
//!
//! Serves a pre-built static site, hands upgrade connections on a reserved
//! path prefix to a tunnel engine, and builds the site on a cold start with
//! randomized page names.

pub mod build;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use build::{BuildError, BuildTrigger, CommandCompiler, NameObfuscator, RouteMapping, SiteCompiler};
pub use config::ServerConfig;
pub use http::{EdgeServer, PageRenderer, TunnelEngine};
pub use lifecycle::{Shutdown, Startup, StartupError};
