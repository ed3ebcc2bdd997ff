//! Typed catalog of PDS4 planetary-science data products.
//!
//! A [`Depot`] scans directory trees for labels, builds a [`Product`] for
//! each one through the [`Classifier`] and indexes it by LIDVID. Products
//! expose label metadata immediately and read their payloads into Arrow
//! arrays only when asked.
//!
//! ```no_run
//! use rusty_depot::{Depot, ProductView, SpectrumProduct};
//!
//! # fn example() -> rusty_depot::Result<()> {
//! let depot = Depot::new();
//! let report = depot.scan(&["/data/exomars"]);
//! println!("{report}");
//!
//! for product in &depot.by_kind("spectrum") {
//!     let spectrum = SpectrumProduct::from_product(product)?;
//!     println!("{}: {:?}", product.identifying_key(), spectrum.peak()?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod data;
pub mod depot;
pub mod error;
pub mod inventory;
pub mod label;
pub mod product;
pub mod sample;

pub use classify::{Classifier, LabelSignature, SignatureMatcher};
pub use config::{CollisionPolicy, DepotConfig, VariantRule};
pub use data::filter::MetadataFilter;
pub use data::model::{Facets, MetadataValue};
pub use depot::{Depot, DepotState, Query, ScanIssue, ScanReport, UsageStatus};
pub use error::{Error, IdentityError, LabelError, MetadataMissing, PayloadError, Result};
pub use label::{LabelAccessor, LabelParser, Pds4Parser, PayloadDescriptor};
pub use product::{
    ImageFrame, Payload, Product, ProductKey, ProductKind, ProductView, SlotState,
    SpectrumProduct, TelemetryTable, VariantKind,
};
