//! Depot configuration.
//!
//! Configuration is TOML with kebab-case keys. Every key is optional:
//!
//! ```toml
//! roots = ["/data/exomars/pancam"]
//! recursive = true
//! follow-links = true
//! label-extension = "xml"
//! collision-policy = "last-scanned-wins"   # or "keep-existing", "reject"
//! strict-kinds = false
//!
//! [[variants]]
//! kind = "rad-flat-prm"
//! order = "identifier"                     # or "start-time"
//! applicable-by = "Sub-Instrument/identifier"
//! [variants.match]
//! product-type = "rad-flat-prm"
//! instrument = "PanCam"
//! ```
//!
//! Omitting `[[variants]]` keeps the built-in rules (one per built-in kind,
//! matched on product type name). Giving any `[[variants]]` replaces them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classify::{Classifier, SignatureMatcher};
use crate::error::Result;
use crate::label::Pds4Parser;
use crate::product::kind::{CALIBRATION, IMAGE_FRAME, SPECTRUM, TELEMETRY_TABLE};
use crate::product::{ProductKind, SortOrder, VariantKind};

/// What a scan does when a label's key is already indexed from another path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Replace the indexed product with the newly scanned one.
    #[default]
    LastScannedWins,
    /// Keep the indexed product.
    KeepExisting,
    /// Keep the indexed product and report the candidate as an error.
    Reject,
}

/// One classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct VariantRule {
    /// Kind assigned on match. Built-in names start from the built-in kind.
    pub kind: String,
    #[serde(default)]
    pub order: Option<SortOrder>,
    #[serde(default)]
    pub applicable_by: Option<String>,
    #[serde(default, rename = "match")]
    pub matcher: SignatureMatcher,
}

impl VariantRule {
    pub fn new(kind: impl Into<String>, matcher: SignatureMatcher) -> Self {
        Self {
            kind: kind.into(),
            order: None,
            applicable_by: None,
            matcher,
        }
    }

    fn to_kind(&self) -> VariantKind {
        let mut kind =
            VariantKind::builtin(&self.kind).unwrap_or_else(|| VariantKind::new(&self.kind));
        if let Some(order) = self.order {
            kind = kind.with_order(order);
        }
        if let Some(field) = &self.applicable_by {
            kind = kind.applicable_by(field);
        }
        kind
    }
}

/// The built-in rules: each built-in kind claims labels whose product type
/// name is spelled the same.
pub fn default_variants() -> Vec<VariantRule> {
    [IMAGE_FRAME, TELEMETRY_TABLE, SPECTRUM, CALIBRATION]
        .into_iter()
        .map(|name| VariantRule::new(name, SignatureMatcher::product_type(name)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DepotConfig {
    /// Roots scanned by `Depot::scan_configured`.
    pub roots: Vec<PathBuf>,
    /// Walk subdirectories. When false only the roots' direct entries are
    /// considered.
    pub recursive: bool,
    pub follow_links: bool,
    /// Label file extension, matched case-insensitively.
    pub label_extension: String,
    pub collision_policy: CollisionPolicy,
    /// Reject labels that no variant claims.
    pub strict_kinds: bool,
    pub variants: Vec<VariantRule>,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: true,
            follow_links: true,
            label_extension: "xml".to_string(),
            collision_policy: CollisionPolicy::default(),
            strict_kinds: false,
            variants: default_variants(),
        }
    }
}

impl DepotConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        log::debug!("loaded depot configuration from {}", path.display());
        Self::from_toml(&content)
    }

    /// Classifier with one registration per rule, in rule order. Rules naming
    /// the same kind share one kind instance, defined by the first of them.
    pub fn classifier(&self) -> Classifier {
        let classifier = Classifier::new();
        let mut kinds: HashMap<&str, Arc<dyn ProductKind>> = HashMap::new();
        for rule in &self.variants {
            let kind = kinds
                .entry(rule.kind.as_str())
                .or_insert_with(|| Arc::new(rule.to_kind()) as Arc<dyn ProductKind>);
            classifier.register_matcher(rule.matcher.clone(), Arc::clone(kind));
        }
        classifier
    }

    pub fn parser(&self) -> Pds4Parser {
        Pds4Parser::with_extension(&self.label_extension)
    }
}
