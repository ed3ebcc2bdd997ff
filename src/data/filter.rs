use std::collections::{BTreeMap, BTreeSet};

use super::model::{Facets, MetadataValue};
use crate::product::Product;

// ---------------------------------------------------------------------------
// Filter predicate: which values are selected per metadata field
// ---------------------------------------------------------------------------

/// Per-field selection: maps field path → set of selected values.
pub type FieldSelection = BTreeMap<String, BTreeSet<MetadataValue>>;

/// Value-set predicate over product metadata, usable with `Depot::query`.
///
/// A product passes a field constraint when:
/// * the field is not constrained → passes
/// * the selected set is empty → nothing selected → fails
/// * the product's value is in the selected set → passes
/// * the field is absent from the label → passes only if `Null` is selected
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    selection: FieldSelection,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter with every faceted value selected, i.e. one that passes every
    /// product the facets were collected from.
    pub fn from_facets(facets: &Facets) -> Self {
        Self {
            selection: facets.unique_values.clone(),
        }
    }

    /// Constrain `field` to `values`, replacing any earlier constraint.
    pub fn select<I>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = MetadataValue>,
    {
        self.selection
            .insert(field.into(), values.into_iter().collect());
        self
    }

    /// Remove one value from the selection of `field`.
    pub fn deselect(&mut self, field: &str, value: &MetadataValue) -> bool {
        self.selection
            .get_mut(field)
            .is_some_and(|selected| selected.remove(value))
    }

    pub fn selection(&self) -> &FieldSelection {
        &self.selection
    }

    pub fn matches(&self, product: &Product) -> bool {
        self.selection.iter().all(|(field, selected)| {
            if selected.is_empty() {
                return false;
            }
            match product.metadata(field) {
                Ok(value) => selected.contains(&value),
                Err(_) => selected.contains(&MetadataValue::Null),
            }
        })
    }
}
