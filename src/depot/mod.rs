/// Depot: a filesystem-backed catalog of products.
///
/// ```text
///   roots ──walk──▶ candidates ──parse──▶ LabelAccessor ──classify──▶ Product
///                                                                       │
///            ┌──────────────────── merge (collision policy) ◀───────────┘
///            ▼
///   ┌────────────────┐  swap   ┌────────────────┐
///   │ Index (draft)   │ ──────▶ │ Arc<Index>      │ ◀── get / query / by_kind
///   └────────────────┘         └────────────────┘
/// ```
///
/// Mutations (`scan`, `load_file`, `release`, `clear`) are serialized by a
/// writer mutex and build a new index snapshot that is swapped in when done.
/// Readers clone the current snapshot under a short read lock, so they never
/// wait for label parsing. Payload reads happen on the products and never
/// involve the depot's locks.

mod index;
pub mod query;
pub mod report;
mod scan;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Instant, SystemTime};

use crate::classify::{Classifier, LabelSignature, SignatureMatcher};
use crate::config::{CollisionPolicy, DepotConfig};
use crate::error::{Error, LabelError, Result};
use crate::label::LabelParser;
use crate::product::{Product, ProductKey, ProductKind};

use index::{fresh_usage, Entry, Index};

pub use index::UsageStatus;
pub use query::Query;
pub use report::{Collision, ScanIssue, ScanReport};

/// Product counts per kind and usage status.
pub type UsageSummary = BTreeMap<String, BTreeMap<UsageStatus, usize>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepotState {
    /// Never scanned, or cleared.
    Empty,
    /// At least one scan or load completed. The index may still be empty.
    Populated,
}

enum Merged {
    Indexed { product: Arc<Product>, refreshed: bool },
    KeptExisting(Arc<Product>),
}

#[derive(Debug)]
pub struct Depot {
    config: DepotConfig,
    parser: Arc<dyn LabelParser>,
    classifier: Classifier,
    index: RwLock<Arc<Index>>,
    writer: Mutex<()>,
}

impl Default for Depot {
    fn default() -> Self {
        Self::new()
    }
}

impl Depot {
    /// An empty depot with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DepotConfig::default())
    }

    pub fn with_config(config: DepotConfig) -> Self {
        let parser = Arc::new(config.parser());
        Self::with_parser(config, parser)
    }

    /// A depot reading labels through `parser` instead of the bundled XML
    /// parser. `config.label_extension` is ignored in favour of the parser's.
    pub fn with_parser(config: DepotConfig, parser: Arc<dyn LabelParser>) -> Self {
        let classifier = config.classifier();
        Self {
            config,
            parser,
            classifier,
            index: RwLock::new(Arc::new(Index::default())),
            writer: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Register a variant after all existing ones. Affects products built by
    /// later scans only.
    pub fn register_variant<F>(&self, predicate: F, kind: Arc<dyn ProductKind>)
    where
        F: Fn(&LabelSignature) -> bool + Send + Sync + 'static,
    {
        self.classifier.register(predicate, kind);
    }

    pub fn register_variant_matcher(&self, matcher: SignatureMatcher, kind: Arc<dyn ProductKind>) {
        self.classifier.register_matcher(matcher, kind);
    }

    fn snapshot(&self) -> Arc<Index> {
        Arc::clone(&self.index.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, index: Index) {
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Population
    // -----------------------------------------------------------------------

    /// Scan `roots` and merge every label found into the index.
    ///
    /// Failures are per candidate and end up in the report. Calling this
    /// again re-synchronizes with the filesystem: unchanged labels are
    /// skipped, changed ones re-read. Labels whose files disappeared stay
    /// indexed until released or cleared.
    pub fn scan<P: AsRef<Path>>(&self, roots: &[P]) -> ScanReport {
        let _writer = self.lock_writer();
        let started = Instant::now();
        let mut report = ScanReport::new(roots);
        let mut next = (*self.snapshot()).clone();

        let candidates = scan::candidates(roots, &self.config, self.parser.extension(), &mut report);
        report.candidates = candidates.len();
        for path in candidates {
            let modified = modified_time(&path);
            if next.is_unchanged(&path, modified) {
                log::trace!("{} unchanged", path.display());
                report.unchanged += 1;
                continue;
            }
            let product = match self.build(&path, modified) {
                Ok(product) => product,
                Err(e) => {
                    report.issue(path, e);
                    continue;
                }
            };
            log::debug!(
                "{} -> {} ({})",
                path.display(),
                product.identifying_key(),
                product.kind_name()
            );
            match self.merge(&mut next, product, &mut report.collisions) {
                Ok(Merged::Indexed { refreshed: true, .. }) => report.refreshed += 1,
                Ok(Merged::Indexed { .. }) => report.added += 1,
                Ok(Merged::KeptExisting(_)) => {}
                Err(e) => report.issue(path, e),
            }
        }

        next.populated = true;
        next.reindex_kinds();
        let total = next.entries.len();
        self.publish(next);
        report.elapsed = started.elapsed();
        log::info!("scan: {report}; {total} products indexed");
        report
    }

    /// Scan the roots named in the configuration.
    pub fn scan_configured(&self) -> ScanReport {
        self.scan(self.config.roots.as_slice())
    }

    /// Load a single label into the index. Unlike `scan`, failures propagate.
    ///
    /// Returns the indexed product for the label's key, which under
    /// [`CollisionPolicy::KeepExisting`] may come from another label.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Arc<Product>> {
        let path = path.as_ref();
        let path = std::fs::canonicalize(path).map_err(|source| LabelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let product = self.build(&path, modified_time(&path))?;

        let _writer = self.lock_writer();
        let mut next = (*self.snapshot()).clone();
        let mut collisions = Vec::new();
        let merged = self.merge(&mut next, product, &mut collisions)?;
        next.populated = true;
        next.reindex_kinds();
        self.publish(next);
        match merged {
            Merged::Indexed { product, .. } | Merged::KeptExisting(product) => Ok(product),
        }
    }

    fn build(&self, path: &Path, modified: Option<SystemTime>) -> Result<Product> {
        let label = self.parser.parse(path)?;
        let kind = self.classifier.classify(label.as_ref());
        if self.config.strict_kinds && Arc::ptr_eq(&kind, self.classifier.base()) {
            return Err(Error::Unclassified {
                path: path.to_path_buf(),
            });
        }
        Ok(Product::new(label, path, kind)?.with_modified(modified))
    }

    fn merge(
        &self,
        index: &mut Index,
        product: Product,
        collisions: &mut Vec<Collision>,
    ) -> Result<Merged> {
        let key = product.identifying_key().clone();
        let path = product.label_path().to_path_buf();
        let policy = self.config.collision_policy;

        let existing = index
            .entries
            .get(&key)
            .filter(|e| e.product.label_path() != path.as_path())
            .map(|e| (e.product.label_path().to_path_buf(), Arc::clone(&e.product)));
        let mut usage = None;
        if let Some((existing_path, existing)) = existing {
            let (kept, discarded) = match policy {
                CollisionPolicy::LastScannedWins => (path.clone(), existing_path.clone()),
                CollisionPolicy::KeepExisting | CollisionPolicy::Reject => {
                    (existing_path.clone(), path.clone())
                }
            };
            log::warn!(
                "{key} is declared by both {} and {}; keeping {}",
                existing_path.display(),
                path.display(),
                kept.display()
            );
            collisions.push(Collision {
                key: key.clone(),
                kept,
                discarded,
                policy,
            });
            match policy {
                CollisionPolicy::LastScannedWins => {
                    if let Some(old) = index.remove(&key) {
                        index.shadow(&existing_path, key.clone(), old.product.modified());
                        usage = Some(old.usage_cell());
                    }
                }
                CollisionPolicy::KeepExisting => {
                    index.shadow(&path, key, product.modified());
                    return Ok(Merged::KeptExisting(existing));
                }
                CollisionPolicy::Reject => {
                    return Err(Error::KeyCollision {
                        key: key.to_string(),
                        existing: existing_path,
                    })
                }
            }
        }

        // Same label file seen before: replace its entry, keeping usage when
        // the key is unchanged.
        let previous = index.by_path.get(&path).cloned();
        let refreshed = previous.is_some();
        if let Some(old) = previous.and_then(|old_key| index.remove(&old_key)) {
            if old.product.identifying_key() == &key {
                usage = Some(old.usage_cell());
            }
        }
        let usage = usage.unwrap_or_else(fresh_usage);
        let product = index.insert(Entry::new(product, usage));
        Ok(Merged::Indexed { product, refreshed })
    }

    /// Empty the index and drop every cached payload. Files are untouched.
    pub fn clear(&self) {
        let _writer = self.lock_writer();
        let old = self.snapshot();
        self.publish(Index::default());
        for entry in old.entries.values() {
            entry.product.invalidate(None);
        }
        log::info!("cleared {} products", old.entries.len());
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get(&self, key: &ProductKey) -> Option<Arc<Product>> {
        self.snapshot()
            .entries
            .get(key)
            .map(|e| Arc::clone(&e.product))
    }

    /// Every indexed product, in key order.
    pub fn all(&self) -> Query {
        Query::all(self.snapshot())
    }

    /// Products satisfying `predicate`, evaluated lazily.
    pub fn query<F>(&self, predicate: F) -> Query
    where
        F: Fn(&Product) -> bool + Send + Sync + 'static,
    {
        self.all().filter(predicate)
    }

    /// Products of one kind, in that kind's sort order.
    pub fn by_kind(&self, kind: &str) -> Query {
        Query::kind(self.snapshot(), kind)
    }

    /// Names of the kinds with at least one indexed product.
    pub fn kinds(&self) -> Vec<String> {
        self.snapshot().by_kind.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> DepotState {
        if self.snapshot().populated {
            DepotState::Populated
        } else {
            DepotState::Empty
        }
    }

    /// Label paths currently indexed, in key order.
    pub fn label_paths(&self) -> Vec<PathBuf> {
        self.snapshot()
            .entries
            .values()
            .map(|e| e.product.label_path().to_path_buf())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Usage tracking
    // -----------------------------------------------------------------------

    fn require_kind(snapshot: &Index, kind: &str) -> Result<()> {
        if snapshot.by_kind.contains_key(kind) {
            Ok(())
        } else {
            Err(Error::KindNotLoaded(kind.to_string()))
        }
    }

    /// Hand out the first not-yet-retrieved product of `kind` in sort order
    /// and mark it retrieved. `Ok(None)` once every product was handed out.
    pub fn next(&self, kind: &str) -> Result<Option<Arc<Product>>> {
        let snapshot = self.snapshot();
        Self::require_kind(&snapshot, kind)?;
        for entry in snapshot.kind(kind).into_iter().flatten() {
            let mut usage = entry.usage();
            if *usage == UsageStatus::Loaded {
                *usage = UsageStatus::Retrieved;
                return Ok(Some(Arc::clone(&entry.product)));
            }
        }
        Ok(None)
    }

    /// First product of `kind`, in sort order, that its kind declares
    /// applicable to `target`. The match is marked retrieved unless already
    /// processed.
    pub fn match_for(&self, kind: &str, target: &Product) -> Result<Option<Arc<Product>>> {
        let snapshot = self.snapshot();
        Self::require_kind(&snapshot, kind)?;
        let found = snapshot
            .kind(kind)
            .into_iter()
            .flatten()
            .find(|e| e.product.is_applicable_to(target));
        Ok(found.map(|entry| {
            let mut usage = entry.usage();
            if *usage == UsageStatus::Loaded {
                *usage = UsageStatus::Retrieved;
            }
            Arc::clone(&entry.product)
        }))
    }

    /// Products whose usage status is one of `statuses` and that pass
    /// `filter`, optionally restricted to one kind. Results come kind by kind,
    /// each in its sort order. With `mark_retrieved`, every selected product
    /// still `loaded` is marked retrieved.
    pub fn retrieve<F>(
        &self,
        kind: Option<&str>,
        statuses: &[UsageStatus],
        filter: F,
        mark_retrieved: bool,
    ) -> Result<Vec<Arc<Product>>>
    where
        F: Fn(&Product) -> bool,
    {
        if statuses.is_empty() {
            return Err(Error::EmptySelection);
        }
        let snapshot = self.snapshot();
        let kinds: Vec<&str> = match kind {
            Some(kind) => {
                Self::require_kind(&snapshot, kind)?;
                vec![kind]
            }
            None => snapshot.by_kind.keys().map(String::as_str).collect(),
        };

        let mut selected = Vec::new();
        for kind in kinds {
            for entry in snapshot.kind(kind).into_iter().flatten() {
                // `filter` runs unlocked; it may itself query usage.
                if !filter(entry.product.as_ref()) {
                    continue;
                }
                let mut usage = entry.usage();
                if !statuses.contains(&*usage) {
                    continue;
                }
                if mark_retrieved && *usage == UsageStatus::Loaded {
                    *usage = UsageStatus::Retrieved;
                }
                selected.push(Arc::clone(&entry.product));
            }
        }
        log::debug!("retrieved {} products", selected.len());
        Ok(selected)
    }

    /// Set the usage status of an indexed product. False if `key` is not
    /// indexed.
    pub fn mark(&self, key: &ProductKey, status: UsageStatus) -> bool {
        match self.snapshot().entries.get(key) {
            Some(entry) => {
                *entry.usage() = status;
                true
            }
            None => false,
        }
    }

    pub fn usage(&self, key: &ProductKey) -> Option<UsageStatus> {
        self.snapshot().entries.get(key).map(|e| *e.usage())
    }

    /// Remove a product from the index. Holders of the returned product keep
    /// it usable; a later scan indexes it afresh.
    pub fn release(&self, key: &ProductKey) -> Option<Arc<Product>> {
        let _writer = self.lock_writer();
        let mut next = (*self.snapshot()).clone();
        let entry = next.remove(key)?;
        next.reindex_kinds();
        self.publish(next);
        log::debug!("released {key}");
        Some(Arc::clone(&entry.product))
    }

    /// Products of `kind`, optionally only those with `status`.
    pub fn count(&self, kind: &str, status: Option<UsageStatus>) -> Result<usize> {
        let snapshot = self.snapshot();
        Self::require_kind(&snapshot, kind)?;
        Ok(snapshot
            .kind(kind)
            .into_iter()
            .flatten()
            .filter(|e| status.map_or(true, |s| *e.usage() == s))
            .count())
    }

    pub fn usage_summary(&self) -> UsageSummary {
        let snapshot = self.snapshot();
        let mut summary = UsageSummary::new();
        for entry in snapshot.entries.values() {
            *summary
                .entry(entry.product.kind_name().to_string())
                .or_default()
                .entry(*entry.usage())
                .or_default() += 1;
        }
        summary
    }

    /// Log every product that was never retrieved, then a count per kind.
    /// Returns the total.
    pub fn log_unused(&self, level: log::Level) -> usize {
        let snapshot = self.snapshot();
        let mut total = 0;
        for kind in snapshot.by_kind.keys() {
            let mut unused = 0;
            for entry in snapshot.kind(kind).into_iter().flatten() {
                if *entry.usage() == UsageStatus::Loaded {
                    log::log!(
                        level,
                        "unused {kind} product {} ({})",
                        entry.product.identifying_key(),
                        entry.product.label_path().display()
                    );
                    unused += 1;
                }
            }
            if unused > 0 {
                log::log!(level, "{unused} {kind} products were never retrieved");
                total += unused;
            }
        }
        total
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::kind::{BASE, CALIBRATION, CAMERA_FIELD, IMAGE_FRAME};
    use crate::sample::{LabelBuilder, SamplePayload};
    use pretty_assertions::assert_eq;

    fn frame(lid: &str, start: &str) -> LabelBuilder {
        LabelBuilder::new(lid, IMAGE_FRAME)
            .start_time(start)
            .payload(SamplePayload::image(1, 2, &[1, 2]))
    }

    #[test]
    fn test_new_depot_is_empty() {
        let depot = Depot::new();
        assert_eq!(depot.state(), DepotState::Empty);
        assert!(depot.is_empty());
        assert!(depot.kinds().is_empty());
    }

    #[test]
    fn test_scan_of_empty_root_populates() {
        let dir = tempfile::tempdir().unwrap();
        let depot = Depot::new();
        let report = depot.scan(&[dir.path()]);
        assert_eq!(report.candidates, 0);
        assert_eq!(depot.state(), DepotState::Populated);
        assert!(depot.is_empty());
    }

    #[test]
    fn test_by_kind_follows_start_time() {
        let dir = tempfile::tempdir().unwrap();
        frame("urn:t:a", "2030-01-03T00:00:00Z").write(dir.path()).unwrap();
        frame("urn:t:b", "2030-01-01T00:00:00Z").write(dir.path()).unwrap();
        frame("urn:t:c", "2030-01-02T00:00:00Z").write(dir.path()).unwrap();

        let depot = Depot::new();
        depot.scan(&[dir.path()]);
        let lids: Vec<_> = depot
            .by_kind(IMAGE_FRAME)
            .iter()
            .map(|p| p.identifying_key().lid().to_string())
            .collect();
        assert_eq!(lids, vec!["urn:t:b", "urn:t:c", "urn:t:a"]);
        assert_eq!(depot.kinds(), vec![IMAGE_FRAME]);
    }

    #[test]
    fn test_next_hands_out_each_product_once() {
        let dir = tempfile::tempdir().unwrap();
        frame("urn:t:a", "2030-01-02T00:00:00Z").write(dir.path()).unwrap();
        frame("urn:t:b", "2030-01-01T00:00:00Z").write(dir.path()).unwrap();
        let depot = Depot::new();
        depot.scan(&[dir.path()]);

        let first = depot.next(IMAGE_FRAME).unwrap().unwrap();
        assert_eq!(first.identifying_key().lid(), "urn:t:b");
        let second = depot.next(IMAGE_FRAME).unwrap().unwrap();
        assert_eq!(second.identifying_key().lid(), "urn:t:a");
        assert!(depot.next(IMAGE_FRAME).unwrap().is_none());
        assert_eq!(
            depot.count(IMAGE_FRAME, Some(UsageStatus::Retrieved)).unwrap(),
            2
        );
        assert!(matches!(
            depot.next(CALIBRATION),
            Err(Error::KindNotLoaded(_))
        ));
    }

    #[test]
    fn test_mark_release_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        frame("urn:t:a", "2030-01-01T00:00:00Z").write(dir.path()).unwrap();
        frame("urn:t:b", "2030-01-02T00:00:00Z").write(dir.path()).unwrap();
        let depot = Depot::new();
        depot.scan(&[dir.path()]);

        let a = ProductKey::new("urn:t:a", "1.0");
        assert!(depot.mark(&a, UsageStatus::Processed));
        assert_eq!(depot.usage(&a), Some(UsageStatus::Processed));
        assert_eq!(depot.log_unused(log::Level::Debug), 1);

        let summary = depot.usage_summary();
        assert_eq!(summary[IMAGE_FRAME][&UsageStatus::Processed], 1);
        assert_eq!(summary[IMAGE_FRAME][&UsageStatus::Loaded], 1);

        let released = depot.release(&a).unwrap();
        assert_eq!(released.identifying_key(), &a);
        assert!(depot.get(&a).is_none());
        assert!(!depot.mark(&a, UsageStatus::Retrieved));
        assert_eq!(depot.len(), 1);
    }

    #[test]
    fn test_refresh_shares_usage_with_older_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = frame("urn:t:a", "2030-01-01T00:00:00Z").write(dir.path()).unwrap();
        let depot = Depot::new();
        depot.scan(&[dir.path()]);
        let key = ProductKey::new("urn:t:a", "1.0");
        let old = depot.snapshot();

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(10))
            .unwrap();
        assert_eq!(depot.scan(&[dir.path()]).refreshed, 1);
        assert!(!Arc::ptr_eq(&old.entries[&key].product, &depot.get(&key).unwrap()));

        // a `next` still running on the older snapshot marks the shared cell
        *old.entries[&key].usage() = UsageStatus::Retrieved;
        assert_eq!(depot.usage(&key), Some(UsageStatus::Retrieved));
        assert!(depot.next(IMAGE_FRAME).unwrap().is_none());
    }

    #[test]
    fn test_match_for_uses_applicability() {
        let dir = tempfile::tempdir().unwrap();
        let target_path = frame("urn:t:obs", "2030-01-01T00:00:00Z")
            .field(CAMERA_FIELD, "WACR")
            .write(dir.path())
            .unwrap();
        for (lid, camera) in [("urn:t:flat_l", "WACL"), ("urn:t:flat_r", "WACR")] {
            LabelBuilder::new(lid, CALIBRATION)
                .field(CAMERA_FIELD, camera)
                .payload(SamplePayload::image(1, 2, &[1, 1]))
                .write(dir.path())
                .unwrap();
        }
        let depot = Depot::new();
        depot.scan(&[dir.path()]);

        let target = depot.load_file(&target_path).unwrap();
        let flat = depot.match_for(CALIBRATION, &target).unwrap().unwrap();
        assert_eq!(flat.identifying_key().lid(), "urn:t:flat_r");
        assert_eq!(
            depot.usage(flat.identifying_key()),
            Some(UsageStatus::Retrieved)
        );
        // image frames declare no applicability
        assert!(depot.match_for(IMAGE_FRAME, &target).unwrap().is_none());
    }

    #[test]
    fn test_strict_kinds_rejects_base_products() {
        let dir = tempfile::tempdir().unwrap();
        LabelBuilder::new("urn:t:odd", "odd-type")
            .write(dir.path())
            .unwrap();
        frame("urn:t:a", "2030-01-01T00:00:00Z").write(dir.path()).unwrap();

        let lenient = Depot::new();
        lenient.scan(&[dir.path()]);
        assert_eq!(lenient.kinds(), vec![IMAGE_FRAME, BASE]);

        let strict = Depot::with_config(DepotConfig {
            strict_kinds: true,
            ..DepotConfig::default()
        });
        let report = strict.scan(&[dir.path()]);
        assert_eq!(strict.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0].error, Error::Unclassified { .. }));
    }

    #[test]
    fn test_clear_invalidates_payloads() {
        let dir = tempfile::tempdir().unwrap();
        frame("urn:t:a", "2030-01-01T00:00:00Z").write(dir.path()).unwrap();
        let depot = Depot::new();
        depot.scan(&[dir.path()]);

        let product = depot.all().first().unwrap();
        product.payload("image").unwrap();
        assert!(product.has_loaded_payload());

        depot.clear();
        assert!(depot.is_empty());
        assert_eq!(depot.state(), DepotState::Empty);
        assert!(!product.has_loaded_payload());
    }
}
