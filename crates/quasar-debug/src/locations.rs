//! Incremental index of loaded classes by source short name, used to turn a
//! (file, line) breakpoint into concrete wire locations.

use std::collections::{BTreeSet, HashMap, HashSet};

use quasar_jdwp::{ReferenceTypeId, Vm, WireLocation};

use crate::error::DebugResult;

#[derive(Debug, Default)]
pub struct LocationResolver {
    by_key: HashMap<String, BTreeSet<ReferenceTypeId>>,
}

impl LocationResolver {
    /// Register a loaded class under its declared source short name. Nested
    /// classes may report a different key than their enclosing file.
    pub fn register(&mut self, key: &str, class: ReferenceTypeId) {
        self.by_key.entry(key.to_string()).or_default().insert(class);
    }

    pub fn classes_for(&self, key: &str) -> impl Iterator<Item = ReferenceTypeId> + '_ {
        self.by_key.get(key).into_iter().flatten().copied()
    }

    /// All wire locations for the given source key and line across every
    /// class registered under the key, deduplicated by their
    /// (source path, source name, line) tuple. Classes with no line info for
    /// the requested line contribute nothing.
    pub fn locations(&self, vm: &dyn Vm, key: &str, line: u32) -> DebugResult<Vec<WireLocation>> {
        let mut seen: HashSet<(String, String, u32)> = HashSet::new();
        let mut out = Vec::new();
        for class in self.classes_for(key) {
            for loc in vm.locations_of_line(class, line)? {
                let tuple = (loc.source_path.clone(), loc.source_name.clone(), loc.line);
                if seen.insert(tuple) {
                    out.push(loc);
                }
            }
        }
        Ok(out)
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
    }
}
