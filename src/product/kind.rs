//! Product kinds: the variant side of the product model.
//!
//! A kind never changes how a product is identified or how its payloads are
//! cached. It only contributes the capabilities below; typed accessors for the
//! built-in kinds live in [`super::views`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::Product;

pub const BASE: &str = "product";
pub const IMAGE_FRAME: &str = "image-frame";
pub const TELEMETRY_TABLE: &str = "telemetry-table";
pub const SPECTRUM: &str = "spectrum";
pub const CALIBRATION: &str = "calibration";

pub const START_TIME_FIELD: &str = "Time_Coordinates/start_date_time";
pub const STOP_TIME_FIELD: &str = "Time_Coordinates/stop_date_time";
pub const CAMERA_FIELD: &str = "Sub-Instrument/identifier";

/// Capabilities a product kind contributes.
pub trait ProductKind: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Position of `product` among the depot's products of this kind.
    fn sort_key(&self, product: &Product) -> SortKey {
        SortKey::identifier(product)
    }

    /// Whether `candidate`, a product of this kind, serves `target`
    /// (e.g. a calibration frame for an observation).
    fn is_applicable(&self, candidate: &Product, target: &Product) -> bool {
        let _ = (candidate, target);
        false
    }
}

/// Ordering key within a kind. Products with a start time sort before those
/// ordered by identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    StartTime(DateTime<Utc>),
    Identifier(String),
}

impl SortKey {
    pub fn identifier(product: &Product) -> Self {
        SortKey::Identifier(product.identifying_key().lid().to_string())
    }

    pub fn start_time(product: &Product) -> Self {
        product
            .metadata(START_TIME_FIELD)
            .ok()
            .and_then(|v| v.as_datetime())
            .map(SortKey::StartTime)
            .unwrap_or_else(|| SortKey::identifier(product))
    }
}

/// How a configured kind orders its products.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    Identifier,
    StartTime,
}

/// A kind defined by name, ordering and an optional applicability field.
/// All built-in kinds are instances of this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantKind {
    name: String,
    order: SortOrder,
    applicable_by: Option<String>,
}

impl VariantKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Identifier,
            applicable_by: None,
        }
    }

    /// Fallback kind for labels no registered variant claims.
    pub fn base() -> Self {
        Self::new(BASE)
    }

    /// Built-in kinds by name.
    pub fn builtin(name: &str) -> Option<Self> {
        let kind = match name {
            BASE => Self::base(),
            IMAGE_FRAME | TELEMETRY_TABLE | SPECTRUM => {
                Self::new(name).with_order(SortOrder::StartTime)
            }
            CALIBRATION => Self::new(name).applicable_by(CAMERA_FIELD),
            _ => return None,
        };
        Some(kind)
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Products of this kind apply to targets with an equal value at `field`.
    pub fn applicable_by(mut self, field: impl Into<String>) -> Self {
        self.applicable_by = Some(field.into());
        self
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }
}

impl ProductKind for VariantKind {
    fn name(&self) -> &str {
        &self.name
    }

    fn sort_key(&self, product: &Product) -> SortKey {
        match self.order {
            SortOrder::Identifier => SortKey::identifier(product),
            SortOrder::StartTime => SortKey::start_time(product),
        }
    }

    fn is_applicable(&self, candidate: &Product, target: &Product) -> bool {
        let Some(field) = &self.applicable_by else {
            return false;
        };
        match (candidate.metadata(field), target.metadata(field)) {
            (Ok(a), Ok(b)) => !a.is_null() && a == b,
            _ => false,
        }
    }
}
