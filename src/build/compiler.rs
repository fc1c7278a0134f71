//! Site compiler invocation.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::build::BuildError;
use crate::config::BuildConfig;

/// The external static-site compiler.
#[async_trait]
pub trait SiteCompiler: Send + Sync {
    /// Compile the site rooted at `root`, returning once output is complete.
    async fn compile(&self, root: &Path) -> Result<(), BuildError>;
}

/// Runs a configured command line (e.g. `npx astro build`).
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from `[build] command`. The first element is the program.
    pub fn from_config(config: &BuildConfig) -> Self {
        let mut parts = config.command.iter().cloned();
        let program = parts.next().unwrap_or_default();
        Self::new(program, parts.collect())
    }
}

#[async_trait]
impl SiteCompiler for CommandCompiler {
    async fn compile(&self, root: &Path) -> Result<(), BuildError> {
        tracing::info!(
            program = %self.program,
            args = ?self.args,
            root = %root.display(),
            "Running site compiler"
        );

        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(root)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| BuildError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(BuildError::CompilerFailed(status))
        }
    }
}
