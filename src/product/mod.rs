/// Products: one label plus its lazily materialized payloads.
///
/// ```text
///   label file ──▶ LabelAccessor ──▶ Classifier ──▶ ProductKind
///                        │                              │
///                        ▼                              ▼
///                   ProductKey ─────────────────▶   Product ──▶ views
///                                                       │
///                                          payload(slot)│ first access
///                                                       ▼
///                                             PayloadCache ──▶ Arrow data
/// ```

pub mod cache;
pub mod key;
pub mod kind;
pub mod payload;
pub mod views;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::classify::{Classifier, LabelSignature};
use crate::data::model::MetadataValue;
use crate::error::{IdentityError, MetadataMissing, PayloadError, Result};
use crate::label::{LabelAccessor, LabelParser, PayloadDescriptor};

pub use cache::SlotState;
pub use key::ProductKey;
pub use kind::{ProductKind, SortKey, SortOrder, VariantKind};
pub use payload::{Payload, PayloadData};
pub use views::{ImageFrame, ProductView, SpectrumProduct, TelemetryTable};

use cache::PayloadCache;

/// A data product: label metadata plus declared payload slots.
///
/// The identifying key is derived once at construction. Payloads are read on
/// first access to a slot and cached until [`Product::invalidate`].
#[derive(Debug)]
pub struct Product {
    key: ProductKey,
    label: Box<dyn LabelAccessor>,
    label_path: PathBuf,
    kind: Arc<dyn ProductKind>,
    modified: Option<SystemTime>,
    cache: PayloadCache,
}

impl Product {
    /// Wrap a parsed label.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the label lacks its identity fields.
    pub fn new(
        label: Box<dyn LabelAccessor>,
        label_path: impl Into<PathBuf>,
        kind: Arc<dyn ProductKind>,
    ) -> std::result::Result<Self, IdentityError> {
        let label_path = label_path.into();
        let key = ProductKey::from_label(label.as_ref(), &label_path)?;
        let cache = PayloadCache::new(
            label
                .list_payload_descriptors()
                .iter()
                .map(|d| d.slot.clone()),
        );
        Ok(Self {
            key,
            label,
            label_path,
            kind,
            modified: None,
            cache,
        })
    }

    /// Load a single product from a label file, classifying it with
    /// `classifier`. Parse and identity failures propagate.
    pub fn open(path: &Path, parser: &dyn LabelParser, classifier: &Classifier) -> Result<Self> {
        let label = parser.parse(path)?;
        let kind = classifier.classify(label.as_ref());
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        Ok(Self::new(label, path, kind)?.with_modified(modified))
    }

    pub(crate) fn with_modified(mut self, modified: Option<SystemTime>) -> Self {
        self.modified = modified;
        self
    }

    pub fn identifying_key(&self) -> &ProductKey {
        &self.key
    }

    pub fn kind(&self) -> &Arc<dyn ProductKind> {
        &self.kind
    }

    pub fn kind_name(&self) -> &str {
        self.kind.name()
    }

    pub fn label(&self) -> &dyn LabelAccessor {
        self.label.as_ref()
    }

    pub fn label_path(&self) -> &Path {
        &self.label_path
    }

    /// Modification time of the label file when it was read, if known.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Typed value of a label field.
    ///
    /// An absent field is [`MetadataMissing`]; a present but empty one is
    /// [`MetadataValue::Null`].
    pub fn metadata(&self, path: &str) -> std::result::Result<MetadataValue, MetadataMissing> {
        self.metadata_text(path).map(MetadataValue::parse)
    }

    /// Raw text of a label field.
    pub fn metadata_text(&self, path: &str) -> std::result::Result<&str, MetadataMissing> {
        self.label
            .get_field(path)
            .ok_or_else(|| MetadataMissing::new(path))
    }

    /// Discriminating fields used for classification.
    pub fn signature(&self) -> LabelSignature {
        LabelSignature::from_label(self.label.as_ref())
    }

    /// Declared slot names in label order.
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.label
            .list_payload_descriptors()
            .iter()
            .map(|d| d.slot.as_str())
    }

    pub fn descriptor(&self, slot: &str) -> Option<&PayloadDescriptor> {
        self.label
            .list_payload_descriptors()
            .iter()
            .find(|d| d.slot == slot)
    }

    /// Materialize (or return the cached) payload of `slot`.
    ///
    /// Safe to call from several threads; concurrent callers share one read.
    pub fn payload(&self, slot: &str) -> std::result::Result<Arc<Payload>, PayloadError> {
        let desc = self
            .descriptor(slot)
            .ok_or_else(|| PayloadError::UnknownSlot(slot.to_string()))?;
        let label_dir = self.label_path.parent().unwrap_or_else(|| Path::new(""));
        self.cache
            .get_or_load(slot, || payload::materialize(desc, label_dir))
    }

    /// Drop the cached payload of `slot`, or of every slot when `None`.
    /// Returns false if `slot` is not declared by the label.
    pub fn invalidate(&self, slot: Option<&str>) -> bool {
        self.cache.invalidate(slot)
    }

    pub fn slot_state(&self, slot: &str) -> Option<SlotState> {
        self.cache.state(slot)
    }

    /// True if any payload is currently cached.
    pub fn has_loaded_payload(&self) -> bool {
        self.cache.any_loaded()
    }

    /// Number of payload reads started for this product.
    pub fn materializations(&self) -> usize {
        self.cache.loads()
    }

    pub fn sort_key(&self) -> SortKey {
        self.kind.sort_key(self)
    }

    /// Whether this product serves `target`, per its kind.
    pub fn is_applicable_to(&self, target: &Product) -> bool {
        self.kind.is_applicable(self, target)
    }
}
