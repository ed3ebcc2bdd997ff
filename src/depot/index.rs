//! The depot's in-memory index.
//!
//! An [`Index`] is an immutable snapshot once published. Mutations clone the
//! current snapshot (entries are `Arc`s, so this is shallow), edit the clone
//! and swap it in, so readers holding an older snapshot are never blocked.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

use crate::product::{Product, ProductKey, SortKey};

/// How far a product has progressed through a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsageStatus {
    /// Indexed, not yet handed out.
    Loaded,
    /// Handed out by `next` or `match_for`.
    Retrieved,
    /// Marked done by the caller.
    Processed,
}

/// Usage status shared by every snapshot's entry for one key, so a mark made
/// through an older snapshot is seen by the newer ones.
pub(crate) type UsageCell = Arc<Mutex<UsageStatus>>;

pub(crate) fn fresh_usage() -> UsageCell {
    Arc::new(Mutex::new(UsageStatus::Loaded))
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) product: Arc<Product>,
    pub(crate) sort_key: SortKey,
    usage: UsageCell,
}

impl Entry {
    pub(crate) fn new(product: Product, usage: UsageCell) -> Self {
        let sort_key = product.sort_key();
        Self {
            product: Arc::new(product),
            sort_key,
            usage,
        }
    }

    pub(crate) fn usage(&self) -> MutexGuard<'_, UsageStatus> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn usage_cell(&self) -> UsageCell {
        Arc::clone(&self.usage)
    }
}

/// A label that lost a key collision and is not indexed.
#[derive(Debug, Clone)]
pub(crate) struct Shadowed {
    key: ProductKey,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Index {
    pub(crate) entries: BTreeMap<ProductKey, Arc<Entry>>,
    /// Keys per kind name, in the kind's sort order.
    pub(crate) by_kind: BTreeMap<String, Vec<ProductKey>>,
    pub(crate) by_path: HashMap<PathBuf, ProductKey>,
    /// Collision losers, so an unchanged tree rescans without re-parsing them.
    shadowed: HashMap<PathBuf, Shadowed>,
    pub(crate) populated: bool,
}

impl Index {
    pub(crate) fn insert(&mut self, entry: Entry) -> Arc<Product> {
        let key = entry.product.identifying_key().clone();
        let product = Arc::clone(&entry.product);
        self.shadowed.remove(product.label_path());
        self.by_path
            .insert(product.label_path().to_path_buf(), key.clone());
        self.entries.insert(key, Arc::new(entry));
        product
    }

    pub(crate) fn remove(&mut self, key: &ProductKey) -> Option<Arc<Entry>> {
        let entry = self.entries.remove(key)?;
        let path = entry.product.label_path();
        if self.by_path.get(path) == Some(key) {
            self.by_path.remove(path);
        }
        Some(entry)
    }

    pub(crate) fn entry_for_path(&self, path: &Path) -> Option<&Arc<Entry>> {
        self.by_path.get(path).and_then(|key| self.entries.get(key))
    }

    pub(crate) fn shadow(&mut self, path: &Path, key: ProductKey, modified: Option<SystemTime>) {
        self.shadowed
            .insert(path.to_path_buf(), Shadowed { key, modified });
    }

    /// Whether the label at `path` was seen with this modification time and
    /// its outcome still stands: either it is indexed, or it lost a collision
    /// to a key that is still indexed.
    pub(crate) fn is_unchanged(&self, path: &Path, modified: Option<SystemTime>) -> bool {
        if modified.is_none() {
            return false;
        }
        if let Some(entry) = self.entry_for_path(path) {
            return entry.product.modified() == modified;
        }
        self.shadowed
            .get(path)
            .is_some_and(|s| s.modified == modified && self.entries.contains_key(&s.key))
    }

    /// Rebuild the per-kind ordering after a batch of mutations.
    pub(crate) fn reindex_kinds(&mut self) {
        let mut by_kind: BTreeMap<String, Vec<(&SortKey, &ProductKey)>> = BTreeMap::new();
        for (key, entry) in &self.entries {
            by_kind
                .entry(entry.product.kind_name().to_string())
                .or_default()
                .push((&entry.sort_key, key));
        }
        self.by_kind = by_kind
            .into_iter()
            .map(|(kind, mut keys)| {
                keys.sort();
                (kind, keys.into_iter().map(|(_, k)| k.clone()).collect())
            })
            .collect();
    }

    pub(crate) fn kind(&self, kind: &str) -> Option<impl Iterator<Item = &Arc<Entry>>> {
        let keys = self.by_kind.get(kind)?;
        Some(keys.iter().filter_map(|k| self.entries.get(k)))
    }
}
