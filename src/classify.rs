//! Assigning product kinds to labels.
//!
//! The classifier holds an ordered list of `(predicate, kind)` registrations.
//! Labels are reduced to a [`LabelSignature`] and tested against each
//! predicate in registration order; the first match wins and a label nobody
//! claims gets the base kind.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::DepotConfig;
use crate::label::LabelAccessor;
use crate::product::kind::VariantKind;
use crate::product::ProductKind;

pub const PRODUCT_CLASS_FIELD: &str = "Identification_Area/product_class";
pub const PRODUCT_TYPE_FIELD: &str = "Mission_Information/product_type_name";
pub const INSTRUMENT_FIELD: &str = "Observing_System_Component[type='Instrument']/name";
pub const PROCESSING_LEVEL_FIELD: &str = "Primary_Result_Summary/processing_level";

/// The label fields classification looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelSignature {
    pub product_class: Option<String>,
    pub product_type: Option<String>,
    pub instrument: Option<String>,
    pub processing_level: Option<String>,
}

impl LabelSignature {
    pub fn from_label(label: &dyn LabelAccessor) -> Self {
        let field = |path| {
            label
                .get_field(path)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            product_class: field(PRODUCT_CLASS_FIELD),
            product_type: field(PRODUCT_TYPE_FIELD),
            instrument: field(INSTRUMENT_FIELD),
            processing_level: field(PROCESSING_LEVEL_FIELD),
        }
    }
}

/// Declarative predicate over a signature: every field that is set must equal
/// the label's. An empty matcher matches every label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SignatureMatcher {
    pub product_class: Option<String>,
    pub product_type: Option<String>,
    pub instrument: Option<String>,
    pub processing_level: Option<String>,
}

impl SignatureMatcher {
    pub fn product_type(product_type: impl Into<String>) -> Self {
        Self {
            product_type: Some(product_type.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, signature: &LabelSignature) -> bool {
        fn eq(want: &Option<String>, have: &Option<String>) -> bool {
            want.is_none() || want == have
        }
        eq(&self.product_class, &signature.product_class)
            && eq(&self.product_type, &signature.product_type)
            && eq(&self.instrument, &signature.instrument)
            && eq(&self.processing_level, &signature.processing_level)
    }
}

type Predicate = dyn Fn(&LabelSignature) -> bool + Send + Sync;

struct Registration {
    predicate: Box<Predicate>,
    kind: Arc<dyn ProductKind>,
}

/// Ordered registry of product kinds.
pub struct Classifier {
    registrations: RwLock<Vec<Registration>>,
    base: Arc<dyn ProductKind>,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("registered", &self.registered())
            .field("base", &self.base.name())
            .finish()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// A classifier with no registrations; everything is the base kind.
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            base: Arc::new(VariantKind::base()),
        }
    }

    /// A classifier that recognises the built-in kinds by product type name.
    pub fn with_builtin_variants() -> Self {
        DepotConfig::default().classifier()
    }

    /// Add a registration after all existing ones.
    pub fn register<F>(&self, predicate: F, kind: Arc<dyn ProductKind>)
    where
        F: Fn(&LabelSignature) -> bool + Send + Sync + 'static,
    {
        log::debug!("registered product kind '{}'", kind.name());
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                predicate: Box::new(predicate),
                kind,
            });
    }

    pub fn register_matcher(&self, matcher: SignatureMatcher, kind: Arc<dyn ProductKind>) {
        self.register(move |sig| matcher.matches(sig), kind);
    }

    pub fn classify(&self, label: &dyn LabelAccessor) -> Arc<dyn ProductKind> {
        self.classify_signature(&LabelSignature::from_label(label))
    }

    pub fn classify_signature(&self, signature: &LabelSignature) -> Arc<dyn ProductKind> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| (r.predicate)(signature))
            .map(|r| Arc::clone(&r.kind))
            .unwrap_or_else(|| Arc::clone(&self.base))
    }

    /// The fallback kind.
    pub fn base(&self) -> &Arc<dyn ProductKind> {
        &self.base
    }

    /// Kind names in registration order.
    pub fn registered(&self) -> Vec<String> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.kind.name().to_string())
            .collect()
    }
}
