//! Page-name obfuscation.
//!
//! Renames every non-entry page file to a random identifier before the site
//! compiler runs, so generated routes differ from build to build, then puts
//! the original names back.
//!
//! The planned renames are written to a manifest before the first rename and
//! removed after the last revert. A manifest left on disk means a previous
//! process died mid-build; [`NameObfuscator::recover`] uses it to restore the
//! source tree.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::build::BuildError;
use crate::config::SiteConfig;

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Randomized file name → original file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMapping {
    entries: BTreeMap<String, String>,
}

impl RouteMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(randomized, original)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn contains_randomized(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn insert(&mut self, randomized: String, original: String) {
        self.entries.insert(randomized, original);
    }
}

/// Renames page-definition files in place.
#[derive(Debug, Clone)]
pub struct NameObfuscator {
    pages_dir: PathBuf,
    entry_page: String,
    extension: String,
    manifest: PathBuf,
    id_length: usize,
}

impl NameObfuscator {
    pub fn new(
        pages_dir: impl Into<PathBuf>,
        entry_page: impl Into<String>,
        extension: impl Into<String>,
        manifest: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pages_dir: pages_dir.into(),
            entry_page: entry_page.into(),
            extension: extension.into(),
            manifest: manifest.into(),
            id_length: 9,
        }
    }

    pub fn from_config(site: &SiteConfig) -> Self {
        Self::new(
            site.pages_path(),
            site.entry_page.clone(),
            site.page_extension.clone(),
            site.manifest_path(),
        )
        .with_id_length(site.id_length)
    }

    pub fn with_id_length(mut self, id_length: usize) -> Self {
        self.id_length = id_length;
        self
    }

    pub fn pages_dir(&self) -> &Path {
        &self.pages_dir
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    /// Rename every eligible page to a fresh random identifier.
    ///
    /// The returned mapping must be handed to [`revert`](Self::revert).
    pub fn randomize(&self) -> Result<RouteMapping, BuildError> {
        let originals = self.eligible_pages()?;
        let mut rng = rand::thread_rng();
        let mut mapping = RouteMapping::new();

        for original in originals {
            let randomized = loop {
                let candidate = format!("{}.{}", random_id(&mut rng, self.id_length), self.extension);
                if !mapping.contains_randomized(&candidate)
                    && !self.pages_dir.join(&candidate).exists()
                {
                    break candidate;
                }
            };
            mapping.insert(randomized, original);
        }

        if mapping.is_empty() {
            tracing::debug!(dir = %self.pages_dir.display(), "No pages to randomize");
            return Ok(mapping);
        }

        self.write_manifest(&mapping)?;

        for (randomized, original) in mapping.iter() {
            self.rename(original, randomized)?;
            tracing::debug!(original, randomized, "Page renamed");
        }

        tracing::info!(pages = mapping.len(), "Page names randomized");
        Ok(mapping)
    }

    /// Restore the original names recorded in `mapping`.
    pub fn revert(&self, mapping: RouteMapping) -> Result<(), BuildError> {
        for (randomized, original) in mapping.iter() {
            self.rename(randomized, original)?;
        }
        self.remove_manifest()?;

        if !mapping.is_empty() {
            tracing::info!(pages = mapping.len(), "Page names restored");
        }
        Ok(())
    }

    /// Undo a randomization left behind by a crashed process.
    ///
    /// Returns the number of files restored, or `None` when no manifest exists.
    /// An entry whose original name is taken again is left alone, with both
    /// files in place for the operator to sort out.
    pub fn recover(&self) -> Result<Option<usize>, BuildError> {
        let content = match fs::read_to_string(&self.manifest) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BuildError::io(&self.manifest, e)),
        };
        let mapping: RouteMapping = serde_json::from_str(&content).map_err(|e| BuildError::Manifest {
            path: self.manifest.clone(),
            source: e,
        })?;

        let mut restored = 0;
        for (randomized, original) in mapping.iter() {
            let from = self.pages_dir.join(randomized);
            let to = self.pages_dir.join(original);
            match (from.exists(), to.exists()) {
                (true, false) => {
                    fs::rename(&from, &to).map_err(|e| BuildError::io(&from, e))?;
                    restored += 1;
                }
                (true, true) => tracing::warn!(
                    randomized = %from.display(),
                    original = %to.display(),
                    "Original page name is taken, leaving randomized file in place"
                ),
                (false, true) => {
                    tracing::debug!(original = %to.display(), "Page already has its original name")
                }
                (false, false) => tracing::warn!(
                    randomized = %from.display(),
                    original = %to.display(),
                    "Page from interrupted build is missing"
                ),
            }
        }
        self.remove_manifest()?;

        if restored > 0 {
            tracing::warn!(
                restored,
                manifest = %self.manifest.display(),
                "Recovered page names from an interrupted build"
            );
        }
        Ok(Some(restored))
    }

    fn eligible_pages(&self) -> Result<Vec<String>, BuildError> {
        let entries = fs::read_dir(&self.pages_dir).map_err(|e| BuildError::io(&self.pages_dir, e))?;

        let mut pages = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BuildError::io(&self.pages_dir, e))?;
            let file_type = entry.file_type().map_err(|e| BuildError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if self.is_eligible(&name) {
                pages.push(name);
            }
        }
        pages.sort();
        Ok(pages)
    }

    fn is_eligible(&self, name: &str) -> bool {
        name != self.entry_page
            && Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == self.extension)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), BuildError> {
        let from = self.pages_dir.join(from);
        let to = self.pages_dir.join(to);
        fs::rename(&from, &to).map_err(|e| BuildError::io(&from, e))
    }

    fn write_manifest(&self, mapping: &RouteMapping) -> Result<(), BuildError> {
        let json = serde_json::to_string_pretty(mapping).map_err(|e| BuildError::Manifest {
            path: self.manifest.clone(),
            source: e,
        })?;
        fs::write(&self.manifest, json).map_err(|e| BuildError::io(&self.manifest, e))
    }

    fn remove_manifest(&self) -> Result<(), BuildError> {
        match fs::remove_file(&self.manifest) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BuildError::io(&self.manifest, e)),
        }
    }
}

fn random_id<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn listing(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect()
    }

    fn fixture(names: &[&str]) -> (tempfile::TempDir, NameObfuscator) {
        let root = tempfile::tempdir().unwrap();
        let pages = root.path().join("pages");
        fs::create_dir(&pages).unwrap();
        for name in names {
            fs::write(pages.join(name), name.as_bytes()).unwrap();
        }
        let obfuscator = NameObfuscator::new(&pages, "index.astro", "astro", root.path().join("manifest.json"));
        (root, obfuscator)
    }

    #[test]
    fn randomize_skips_entry_page_and_foreign_extensions() {
        let (_root, obfuscator) = fixture(&["index.astro", "apps.astro", "games.astro", "styles.css"]);

        let mapping = obfuscator.randomize().unwrap();
        assert_eq!(mapping.len(), 2);

        let names = listing(obfuscator.pages_dir());
        assert!(names.contains("index.astro"));
        assert!(names.contains("styles.css"));
        assert!(!names.contains("apps.astro"));
        assert!(!names.contains("games.astro"));

        for (randomized, original) in mapping.iter() {
            assert!(names.contains(randomized));
            assert_eq!(randomized.len(), "123456789.astro".len());
            let content = fs::read_to_string(obfuscator.pages_dir().join(randomized)).unwrap();
            assert_eq!(content, original);
        }

        obfuscator.revert(mapping).unwrap();
    }

    #[test]
    fn randomize_then_revert_restores_tree() {
        let names = ["index.astro", "a.astro", "b.astro", "c.astro", "notes.md"];
        let (_root, obfuscator) = fixture(&names);
        let before = listing(obfuscator.pages_dir());

        let mapping = obfuscator.randomize().unwrap();
        assert!(obfuscator.manifest_path().exists());

        obfuscator.revert(mapping).unwrap();
        assert_eq!(listing(obfuscator.pages_dir()), before);
        assert!(!obfuscator.manifest_path().exists());
    }

    #[test]
    fn identifiers_never_collide() {
        let names: Vec<String> = (0..200).map(|i| format!("page{i}.astro")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (_root, obfuscator) = fixture(&refs);

        let mapping = obfuscator.with_id_length(4).randomize().unwrap();
        let originals: BTreeSet<&str> = mapping.iter().map(|(_, o)| o).collect();
        assert_eq!(mapping.len(), 200);
        assert_eq!(originals.len(), 200);
    }

    #[test]
    fn empty_directory_writes_no_manifest() {
        let (_root, obfuscator) = fixture(&["index.astro"]);
        let mapping = obfuscator.randomize().unwrap();
        assert!(mapping.is_empty());
        assert!(!obfuscator.manifest_path().exists());
    }

    #[test]
    fn recover_restores_interrupted_randomization() {
        let (_root, obfuscator) = fixture(&["index.astro", "about.astro", "faq.astro"]);
        let before = listing(obfuscator.pages_dir());

        // Simulate a crash: the mapping is dropped without revert.
        let mapping = obfuscator.randomize().unwrap();
        drop(mapping);
        assert_ne!(listing(obfuscator.pages_dir()), before);

        assert_eq!(obfuscator.recover().unwrap(), Some(2));
        assert_eq!(listing(obfuscator.pages_dir()), before);
        assert!(!obfuscator.manifest_path().exists());
    }

    #[test]
    fn recover_leaves_both_files_when_original_name_is_taken() {
        let (_root, obfuscator) = fixture(&["index.astro", "about.astro", "faq.astro"]);
        let mapping = obfuscator.randomize().unwrap();
        let (randomized, _) = mapping
            .iter()
            .find(|(_, original)| *original == "about.astro")
            .map(|(r, o)| (r.to_string(), o.to_string()))
            .unwrap();

        // Someone recreated the page while the build was interrupted.
        let pages = obfuscator.pages_dir().to_path_buf();
        fs::write(pages.join("about.astro"), "new about").unwrap();

        assert_eq!(obfuscator.recover().unwrap(), Some(1));
        let names = listing(&pages);
        assert!(names.contains("faq.astro"));
        assert!(names.contains("about.astro"));
        assert!(names.contains(&randomized));
        assert_eq!(fs::read_to_string(pages.join("about.astro")).unwrap(), "new about");
        assert!(!obfuscator.manifest_path().exists());
    }

    #[test]
    fn recover_after_manual_restore_restores_nothing() {
        let (_root, obfuscator) = fixture(&["index.astro", "about.astro"]);
        let before = listing(obfuscator.pages_dir());
        let mapping = obfuscator.randomize().unwrap();
        for (randomized, original) in mapping.iter() {
            fs::rename(obfuscator.pages_dir().join(randomized), obfuscator.pages_dir().join(original)).unwrap();
        }

        assert_eq!(obfuscator.recover().unwrap(), Some(0));
        assert_eq!(listing(obfuscator.pages_dir()), before);
        assert!(!obfuscator.manifest_path().exists());
    }

    #[test]
    fn recover_without_manifest_is_noop() {
        let (_root, obfuscator) = fixture(&["index.astro", "about.astro"]);
        assert_eq!(obfuscator.recover().unwrap(), None);
        assert!(listing(obfuscator.pages_dir()).contains("about.astro"));
    }

    #[test]
    fn generated_ids_use_lowercase_alphanumerics() {
        let id = random_id(&mut rand::thread_rng(), 32);
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| ID_CHARSET.contains(&b)));
    }
}
