//! Bookkeeping of active and pending breakpoints.
//!
//! The registry outlives any one session: when the target disconnects, every
//! active breakpoint is demoted to pending so the next session re-installs
//! it as the owning class loads.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::proto::BreakpointList;
use crate::source_map::file_key;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub file: PathBuf,
    pub line: u32,
}

impl Breakpoint {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// Short-name key the pending side is indexed by.
    pub fn key(&self) -> String {
        file_key(&self.file)
    }
}

/// Invariant: a breakpoint is never simultaneously active and pending.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    active: BTreeSet<Breakpoint>,
    pending: HashMap<String, BTreeSet<Breakpoint>>,
}

impl BreakpointRegistry {
    pub fn add_active(&mut self, bp: Breakpoint) {
        self.remove_pending(&bp);
        self.active.insert(bp);
    }

    pub fn add_pending(&mut self, bp: Breakpoint) {
        if self.active.contains(&bp) {
            return;
        }
        self.pending.entry(bp.key()).or_default().insert(bp);
    }

    /// Remove the breakpoint from whichever set holds it. Returns true when
    /// it was active (so the caller also clears the wire request).
    pub fn remove(&mut self, file: &Path, line: u32) -> bool {
        let bp = Breakpoint::new(file, line);
        let was_active = self.active.remove(&bp);
        self.remove_pending(&bp);
        was_active
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.pending.clear();
    }

    /// On disconnect: everything that was installed becomes pending again.
    pub fn demote_all_to_pending(&mut self) {
        let active = std::mem::take(&mut self.active);
        for bp in active {
            self.pending.entry(bp.key()).or_default().insert(bp);
        }
    }

    /// Promote a pending breakpoint that was just installed in the target.
    pub fn promote(&mut self, bp: &Breakpoint) {
        self.remove_pending(bp);
        self.active.insert(bp.clone());
    }

    /// Pending breakpoints whose file shares the given short-name key;
    /// candidates to retry when a class declaring that source loads.
    pub fn pending_for_key(&self, key: &str) -> Vec<Breakpoint> {
        self.pending
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active(&self) -> impl Iterator<Item = &Breakpoint> {
        self.active.iter()
    }

    pub fn list(&self) -> BreakpointList {
        let mut pending: Vec<Breakpoint> = self
            .pending
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect();
        pending.sort();
        BreakpointList {
            active: self.active.iter().cloned().collect(),
            pending,
        }
    }

    fn remove_pending(&mut self, bp: &Breakpoint) {
        if let Some(set) = self.pending.get_mut(&bp.key()) {
            set.remove(bp);
            if set.is_empty() {
                self.pending.remove(&bp.key());
            }
        }
    }
}
