//! Site edge server
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                     SITE EDGE                         │
//!                    │                                                       │
//!   Client ─────────▶│  net listener ─▶ head pre-read ─▶ dispatch            │
//!                    │                                     │                 │
//!                    │           upgrade on /f ◀───────────┤                 │
//!                    │           → tunnel engine           │                 │
//!                    │                                     ▼                 │
//!                    │                        gate → compression            │
//!                    │                        → static asset | renderer     │
//!                    │                                                       │
//!                    │  build (cold start): recover → randomize → compile    │
//!                    │                       → revert, before any bind       │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use site_edge::build::CommandCompiler;
use site_edge::config::loader::load_or_default;
use site_edge::config::{config_warnings, ConfigSource, ServerConfig};
use site_edge::http::{DropEngine, EdgeServer, NotFoundRenderer, PageRenderer, RelayEngine, TunnelEngine, UpstreamRenderer};
use site_edge::lifecycle::{shutdown_signal, Shutdown, Startup};
use site_edge::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "site-edge", version, about = "Static site edge server with tunnel hand-off")]
struct Cli {
    /// Path to the TOML config file. Missing file means defaults.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Site project root, overriding `site.root`.
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (mut config, source) = load_or_default(&cli.config)?;
    if let Some(root) = cli.root {
        config.site.root = root;
    }

    // The subscriber depends on the config, so anything worth reporting about
    // loading it is logged from here on.
    logging::init(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "site-edge starting");
    if source == ConfigSource::Defaults {
        tracing::info!(path = %cli.config.display(), "No config file found, using defaults");
    }
    for warning in config_warnings(&config) {
        tracing::warn!(%warning, "Configuration warning");
    }
    tracing::info!(
        site_root = %config.site.root.display(),
        gate_active = config.auth.challenge,
        tunnel_prefix = %config.tunnel.prefix,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let compiler = CommandCompiler::from_config(&config.build);
    let ready = match Startup::new(config).build(&compiler).await {
        Ok(ready) => ready,
        Err(e) => {
            tracing::error!(error = %e, "Startup aborted");
            return Err(e.into());
        }
    };

    let renderer = renderer(ready.config())?;
    let engine = engine(ready.config());

    let env_port = std::env::var("PORT").ok();
    let serving = ready.bind(env_port.as_deref()).await?;
    let (config, listener) = serving.into_parts();

    let shutdown = Shutdown::new();
    shutdown.trigger_on(shutdown_signal());

    let server = EdgeServer::new(&config, renderer, engine);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn renderer(config: &ServerConfig) -> Result<Arc<dyn PageRenderer>, Box<dyn std::error::Error>> {
    match &config.render.upstream {
        Some(upstream) => {
            let timeout = Duration::from_secs(config.render.timeout_secs);
            let renderer = UpstreamRenderer::new(upstream, timeout)?;
            tracing::info!(upstream = %upstream, "Rendering pages through SSR upstream");
            Ok(Arc::new(renderer))
        }
        None => {
            tracing::info!("No render upstream configured, unmatched paths return 404");
            Ok(Arc::new(NotFoundRenderer))
        }
    }
}

fn engine(config: &ServerConfig) -> Arc<dyn TunnelEngine> {
    match &config.tunnel.upstream {
        Some(upstream) => {
            tracing::info!(upstream = %upstream, "Relaying tunnel upgrades");
            Arc::new(RelayEngine::new(
                upstream.clone(),
                Duration::from_secs(config.tunnel.connect_timeout_secs),
            ))
        }
        None => Arc::new(DropEngine),
    }
}
