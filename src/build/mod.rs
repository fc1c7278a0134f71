//! Build subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     trigger.rs (recover leftovers, probe output dir)
//!         → output present: done
//!         → output absent:
//!             obfuscator.rs randomize() → RouteMapping
//!             compiler.rs compile()
//!             obfuscator.rs revert(RouteMapping)
//! ```
//!
//! # Design Decisions
//! - Runs to completion before the listener binds; nothing else touches
//!   the pages directory, so no locking is needed
//! - A failed compile is fatal; there is no retry

pub mod compiler;
pub mod obfuscator;
pub mod trigger;

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use thiserror::Error;

pub use compiler::{CommandCompiler, SiteCompiler};
pub use obfuscator::{NameObfuscator, RouteMapping};
pub use trigger::{BuildOutcome, BuildState, BuildTrigger};

/// Errors raised while preparing the compiled site.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rename manifest {path} is unreadable: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to start site compiler `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("site compiler exited with {0}")]
    CompilerFailed(ExitStatus),

    #[error("site compiler failed: {0}")]
    Compiler(String),
}

impl BuildError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
