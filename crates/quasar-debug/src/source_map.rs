//! Maps the short source names reported by the target runtime back to
//! absolute project files.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::config::DebugConfig;

/// The unqualified file name used to index sources; multiple project files
/// may share one key.
pub fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[derive(Debug, Default)]
pub struct SourceMap {
    by_key: HashMap<String, BTreeSet<PathBuf>>,
}

impl SourceMap {
    pub fn new(config: &DebugConfig) -> Self {
        let mut map = Self::default();
        map.rebuild(config);
        map
    }

    pub fn rebuild(&mut self, config: &DebugConfig) {
        self.by_key.clear();
        for file in &config.source_files {
            self.by_key
                .entry(file_key(file))
                .or_default()
                .insert(file.clone());
        }
    }

    pub fn lookup(&self, short_name: &str) -> Option<&BTreeSet<PathBuf>> {
        self.by_key.get(short_name)
    }

    /// Resolve a short name to one absolute path. An ambiguous key is
    /// reported but not fatal; the lexicographically first path wins so the
    /// choice is stable across sessions.
    pub fn resolve(&self, short_name: &str) -> Option<&Path> {
        let paths = self.by_key.get(short_name)?;
        if paths.len() > 1 {
            tracing::warn!(
                target: "quasar.debug",
                short_name,
                candidates = paths.len(),
                "ambiguous source name, using the first match"
            );
        }
        paths.iter().next().map(PathBuf::as_path)
    }
}
