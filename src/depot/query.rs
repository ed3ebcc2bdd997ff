use std::fmt;
use std::sync::Arc;

use crate::data::model::{Facets, MetadataValue};
use crate::product::Product;

use super::index::Index;

type Predicate = dyn Fn(&Product) -> bool + Send + Sync;

#[derive(Debug, Clone)]
enum Scope {
    All,
    Kind(String),
}

/// A lazy, restartable view over a depot snapshot.
///
/// The snapshot is taken when the query is created; later scans do not
/// change what it yields. Iterating only evaluates predicates, it never
/// touches payloads.
#[derive(Clone)]
pub struct Query {
    snapshot: Arc<Index>,
    scope: Scope,
    predicates: Vec<Arc<Predicate>>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("scope", &self.scope)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl Query {
    pub(crate) fn all(snapshot: Arc<Index>) -> Self {
        Self {
            snapshot,
            scope: Scope::All,
            predicates: Vec::new(),
        }
    }

    pub(crate) fn kind(snapshot: Arc<Index>, kind: &str) -> Self {
        Self {
            snapshot,
            scope: Scope::Kind(kind.to_string()),
            predicates: Vec::new(),
        }
    }

    /// Narrow the query; all predicates must hold.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Product) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Iterate matching products. Whole-depot queries yield key order, kind
    /// queries the kind's sort order. Each call starts over.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Arc<Product>> + '_> {
        let products: Box<dyn Iterator<Item = &Arc<Product>> + '_> = match &self.scope {
            Scope::All => Box::new(self.snapshot.entries.values().map(|e| &e.product)),
            Scope::Kind(kind) => match self.snapshot.kind(kind) {
                Some(entries) => Box::new(entries.map(|e| &e.product)),
                None => Box::new(std::iter::empty()),
            },
        };
        Box::new(products.filter(move |p| {
            let product: &Product = p;
            self.predicates.iter().all(|pred| pred(product))
        }))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn first(&self) -> Option<Arc<Product>> {
        self.iter().next().cloned()
    }

    pub fn to_vec(&self) -> Vec<Arc<Product>> {
        self.iter().cloned().collect()
    }

    /// Distinct values of each field across the matching products. A field
    /// a product's label lacks counts as `Null`.
    pub fn unique_values(&self, fields: &[&str]) -> Facets {
        let observations = self.iter().flat_map(|product| {
            fields.iter().map(move |field| {
                let value = product.metadata(field).unwrap_or(MetadataValue::Null);
                (field.to_string(), value)
            })
        });
        Facets::from_observations(fields, observations)
    }
}

impl<'a> IntoIterator for &'a Query {
    type Item = &'a Arc<Product>;
    type IntoIter = Box<dyn Iterator<Item = &'a Arc<Product>> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
