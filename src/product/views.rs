//! Typed views over the built-in product kinds.
//!
//! A view borrows a [`Product`] whose kind matches and adds accessors for the
//! fields and payloads that kind is known to carry.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};

use crate::data::model::MetadataValue;
use crate::error::{Error, PayloadError, Result};
use crate::label::PayloadDescriptor;

use super::kind::{self, CAMERA_FIELD, START_TIME_FIELD};
use super::{Payload, Product};

pub const FILTER_NUMBER_FIELD: &str = "Optical_Filter/filter_number";
pub const EXPOSURE_DURATION_FIELD: &str = "Exposure/exposure_duration";

/// A kind-checked borrow of a product.
pub trait ProductView<'a>: Sized {
    const KIND: &'static str;

    fn wrap(product: &'a Product) -> Self;

    fn product(&self) -> &'a Product;

    /// Wrap `product`, failing with [`Error::WrongKind`] if its kind differs.
    fn from_product(product: &'a Product) -> Result<Self> {
        if product.kind_name() == Self::KIND {
            Ok(Self::wrap(product))
        } else {
            Err(Error::WrongKind {
                key: product.identifying_key().to_string(),
                expected: Self::KIND,
                actual: product.kind_name().to_string(),
            })
        }
    }
}

impl Product {
    /// Typed view of this product, e.g. `product.view::<ImageFrame>()`.
    pub fn view<'a, V: ProductView<'a>>(&'a self) -> Result<V> {
        V::from_product(self)
    }
}

fn first_slot<'p>(
    product: &'p Product,
    want: fn(&PayloadDescriptor) -> bool,
    expected: &'static str,
) -> std::result::Result<&'p PayloadDescriptor, PayloadError> {
    product
        .label()
        .list_payload_descriptors()
        .iter()
        .find(|d| want(d))
        .ok_or_else(|| PayloadError::Layout {
            slot: product.identifying_key().to_string(),
            expected,
        })
}

// ---------------------------------------------------------------------------
// Image frames
// ---------------------------------------------------------------------------

/// A single camera frame.
#[derive(Debug, Clone, Copy)]
pub struct ImageFrame<'a> {
    product: &'a Product,
}

impl<'a> ProductView<'a> for ImageFrame<'a> {
    const KIND: &'static str = kind::IMAGE_FRAME;

    fn wrap(product: &'a Product) -> Self {
        Self { product }
    }

    fn product(&self) -> &'a Product {
        self.product
    }
}

impl<'a> ImageFrame<'a> {
    pub fn camera(&self) -> Option<&'a str> {
        self.product.metadata_text(CAMERA_FIELD).ok()
    }

    pub fn filter_number(&self) -> Option<i64> {
        self.product
            .metadata(FILTER_NUMBER_FIELD)
            .ok()
            .and_then(|v| v.as_i64())
    }

    /// Exposure duration in seconds.
    pub fn exposure_duration(&self) -> Option<f64> {
        self.product
            .metadata(EXPOSURE_DURATION_FIELD)
            .ok()
            .and_then(|v| v.as_f64())
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.product
            .metadata(START_TIME_FIELD)
            .ok()
            .and_then(|v| v.as_datetime())
    }

    /// `(lines, samples)` as declared by the label. Reads nothing from disk.
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        let desc = first_slot(self.product, PayloadDescriptor::is_array, "an image").ok()?;
        match desc.shape().as_slice() {
            [.., lines, samples] => Some((*lines, *samples)),
            _ => None,
        }
    }

    /// The pixel array, materialized on first use.
    pub fn image(&self) -> Result<Arc<Payload>> {
        let desc = first_slot(self.product, PayloadDescriptor::is_array, "an image")?;
        Ok(self.product.payload(&desc.slot)?)
    }
}

// ---------------------------------------------------------------------------
// Telemetry tables
// ---------------------------------------------------------------------------

/// A table of housekeeping records keyed by field values.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryTable<'a> {
    product: &'a Product,
}

impl<'a> ProductView<'a> for TelemetryTable<'a> {
    const KIND: &'static str = kind::TELEMETRY_TABLE;

    fn wrap(product: &'a Product) -> Self {
        Self { product }
    }

    fn product(&self) -> &'a Product {
        self.product
    }
}

impl TelemetryTable<'_> {
    fn slot(&self) -> std::result::Result<&PayloadDescriptor, PayloadError> {
        first_slot(self.product, PayloadDescriptor::is_table, "a table")
    }

    /// Number of records declared by the label. Reads nothing from disk.
    pub fn record_count(&self) -> Option<usize> {
        self.slot().ok().map(|d| d.shape()[0])
    }

    pub fn table(&self) -> Result<Arc<Payload>> {
        let slot = &self.slot()?.slot;
        Ok(self.product.payload(slot)?)
    }

    pub fn column(&self, name: &str) -> Result<ArrayRef> {
        let payload = self.table()?;
        let batch = payload.table().ok_or_else(|| PayloadError::Layout {
            slot: payload.slot().to_string(),
            expected: "a table",
        })?;
        batch.column_by_name(name).cloned().ok_or_else(|| {
            PayloadError::Shape {
                slot: payload.slot().to_string(),
                reason: format!("no field named '{name}'"),
            }
            .into()
        })
    }

    /// Rows whose `field` equals `value`. Numeric values compare numerically
    /// against numeric columns; everything else compares as text.
    pub fn rows_where(&self, field: &str, value: &MetadataValue) -> Result<RecordBatch> {
        let payload = self.table()?;
        let column = self.column(field)?;
        let mask: BooleanArray = match value.as_f64() {
            Some(target) if column.data_type().is_numeric() => {
                let widened = cast(&column, &DataType::Float64).map_err(PayloadError::from)?;
                widened
                    .as_primitive::<Float64Type>()
                    .iter()
                    .map(|v| Some(v == Some(target)))
                    .collect()
            }
            _ => {
                let text = cast(&column, &DataType::Utf8).map_err(PayloadError::from)?;
                let target = value.to_string();
                text.as_string::<i32>()
                    .iter()
                    .map(|v| Some(v == Some(target.as_str())))
                    .collect()
            }
        };
        let batch = payload.table().ok_or_else(|| PayloadError::Layout {
            slot: payload.slot().to_string(),
            expected: "a table",
        })?;
        let rows = filter_record_batch(batch, &mask).map_err(PayloadError::from)?;
        if rows.num_rows() == 0 {
            return Err(Error::RowNotFound {
                slot: payload.slot().to_string(),
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Spectra
// ---------------------------------------------------------------------------

/// A one-dimensional spectrum.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumProduct<'a> {
    product: &'a Product,
}

impl<'a> ProductView<'a> for SpectrumProduct<'a> {
    const KIND: &'static str = kind::SPECTRUM;

    fn wrap(product: &'a Product) -> Self {
        Self { product }
    }

    fn product(&self) -> &'a Product {
        self.product
    }
}

impl SpectrumProduct<'_> {
    /// Number of samples declared by the label. Reads nothing from disk.
    pub fn sample_count(&self) -> Option<usize> {
        first_slot(self.product, PayloadDescriptor::is_array, "a spectrum")
            .ok()
            .map(|d| d.shape().iter().product())
    }

    pub fn values(&self) -> Result<Vec<f64>> {
        let desc = first_slot(self.product, PayloadDescriptor::is_array, "a spectrum")?;
        let payload = self.product.payload(&desc.slot)?;
        Ok(payload.to_f64()?)
    }

    /// Index and value of the strongest sample.
    pub fn peak(&self) -> Result<Option<(usize, f64)>> {
        let values = self.values()?;
        Ok(values
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1)))
    }
}
