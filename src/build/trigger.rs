//! Cold-start build trigger.

use std::fs;
use std::path::{Path, PathBuf};

use crate::build::{BuildError, NameObfuscator, SiteCompiler};
use crate::config::SiteConfig;

/// Whether the compiled output exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Present,
    Absent,
}

impl BuildState {
    pub fn probe(output_dir: &Path) -> Self {
        if output_dir.exists() {
            Self::Present
        } else {
            Self::Absent
        }
    }
}

/// What [`BuildTrigger::ensure_built`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Output already existed; nothing ran.
    AlreadyBuilt,
    /// The compiler ran with `renamed` pages randomized.
    Built { renamed: usize },
}

/// Makes sure the compiled site exists before serving.
#[derive(Debug, Clone)]
pub struct BuildTrigger {
    root: PathBuf,
    output_dir: PathBuf,
    obfuscator: NameObfuscator,
}

impl BuildTrigger {
    pub fn new(root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, obfuscator: NameObfuscator) -> Self {
        Self {
            root: root.into(),
            output_dir: output_dir.into(),
            obfuscator,
        }
    }

    pub fn from_config(site: &SiteConfig) -> Self {
        Self::new(site.root.clone(), site.output_path(), NameObfuscator::from_config(site))
    }

    pub fn state(&self) -> BuildState {
        BuildState::probe(&self.output_dir)
    }

    /// Build the site unless output is already present.
    pub async fn ensure_built(&self, compiler: &dyn SiteCompiler) -> Result<BuildOutcome, BuildError> {
        self.obfuscator.recover()?;

        if self.state() == BuildState::Present {
            tracing::debug!(output = %self.output_dir.display(), "Site already built");
            return Ok(BuildOutcome::AlreadyBuilt);
        }

        tracing::info!(output = %self.output_dir.display(), "Site not built yet, building now");

        let mapping = self.obfuscator.randomize()?;
        let renamed = mapping.len();

        let compiled = compiler.compile(&self.root).await;
        let reverted = self.obfuscator.revert(mapping);

        if let Err(e) = compiled {
            tracing::error!(error = %e, "Site build failed");
            if let Err(revert_err) = reverted {
                tracing::error!(error = %revert_err, "Failed to restore page names");
            }
            self.discard_partial_output();
            return Err(e);
        }
        reverted?;

        tracing::info!(pages = renamed, output = %self.output_dir.display(), "Site built");
        Ok(BuildOutcome::Built { renamed })
    }

    fn discard_partial_output(&self) {
        if !self.output_dir.exists() {
            return;
        }
        match fs::remove_dir_all(&self.output_dir) {
            Ok(()) => tracing::warn!(output = %self.output_dir.display(), "Removed partial build output"),
            Err(e) => tracing::error!(
                output = %self.output_dir.display(),
                error = %e,
                "Failed to remove partial build output"
            ),
        }
    }
}
