//! Startup orchestration.
//!
//! # Responsibilities
//! - Make sure the compiled site exists, building it if needed
//! - Bind the listener only after the site is ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Build, renames and recovery run sequentially before any socket exists

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::build::{BuildError, BuildOutcome, BuildTrigger, SiteCompiler};
use crate::config::ServerConfig;
use crate::net::{Listener, ListenerError};

/// Process lifecycle phase, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Cold,
    Building,
    Ready,
    Serving,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Cold => "cold",
            Phase::Building => "building",
            Phase::Ready => "ready",
            Phase::Serving => "serving",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("site build failed: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Bind(#[from] ListenerError),
}

/// A process that has not checked for build output yet.
#[derive(Debug)]
pub struct Startup {
    config: ServerConfig,
    trigger: BuildTrigger,
}

impl Startup {
    pub fn new(config: ServerConfig) -> Self {
        let trigger = BuildTrigger::from_config(&config.site);
        Self { config, trigger }
    }

    pub fn phase(&self) -> Phase {
        Phase::Cold
    }

    /// Build the site if its output is missing.
    ///
    /// On failure the process is aborted: there is no way back to a bindable state.
    pub async fn build(self, compiler: &dyn SiteCompiler) -> Result<Ready, StartupError> {
        tracing::debug!(phase = %Phase::Building, root = %self.config.site.root.display(), "Startup phase");

        match self.trigger.ensure_built(compiler).await {
            Ok(outcome) => {
                tracing::info!(phase = %Phase::Ready, outcome = ?outcome, "Startup phase");
                Ok(Ready {
                    config: self.config,
                    outcome,
                })
            }
            Err(e) => {
                tracing::error!(phase = %Phase::Aborted, error = %e, "Startup phase");
                Err(e.into())
            }
        }
    }
}

/// Build output is in place; nothing is listening yet.
#[derive(Debug)]
pub struct Ready {
    config: ServerConfig,
    outcome: BuildOutcome,
}

impl Ready {
    pub fn phase(&self) -> Phase {
        Phase::Ready
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn outcome(&self) -> BuildOutcome {
        self.outcome
    }

    /// Bind the listening socket. `env_port` is the raw `PORT` value, if any.
    pub async fn bind(self, env_port: Option<&str>) -> Result<Serving, StartupError> {
        let address = self.config.bind_address(env_port);
        let listener = match Listener::bind(&address, self.config.listener.max_connections).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(address = %address, error = %e, "Failed to bind listener");
                return Err(e.into());
            }
        };

        let local_addr = listener.local_addr().ok();
        tracing::info!(
            phase = %Phase::Serving,
            address = %address,
            local_addr = ?local_addr,
            "Listening"
        );

        Ok(Serving {
            config: self.config,
            listener,
        })
    }
}

/// The listener is bound and ready to accept.
#[derive(Debug)]
pub struct Serving {
    config: ServerConfig,
    listener: Listener,
}

impl Serving {
    pub fn phase(&self) -> Phase {
        Phase::Serving
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn into_parts(self) -> (ServerConfig, Listener) {
        (self.config, self.listener)
    }
}
