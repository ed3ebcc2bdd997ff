/// Data layer: typed metadata values and value-set filtering.
///
/// Architecture:
/// ```text
///   label text
///        │
///        ▼
///   ┌──────────────┐
///   │ MetadataValue │  null / integer / float / bool / date / string
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Facets   │  distinct values per field across a query
///   └──────────┘
///        │
///        ▼
///   ┌────────────────┐
///   │ MetadataFilter  │  selected values per field → product predicate
///   └────────────────┘
/// ```

pub mod model;
pub mod filter;
