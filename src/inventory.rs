//! Tabular inventory of a depot, one row per indexed product.

use std::io;

use serde::Serialize;

use crate::classify::LabelSignature;
use crate::depot::{Depot, UsageStatus};
use crate::error::Result;
use crate::product::kind::START_TIME_FIELD;
use crate::product::Product;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryRecord {
    pub lidvid: String,
    pub kind: String,
    pub product_type: Option<String>,
    pub instrument: Option<String>,
    pub start_time: Option<String>,
    /// Slot names joined with `;`.
    pub slots: String,
    pub usage: Option<UsageStatus>,
    pub label: String,
}

impl InventoryRecord {
    pub fn from_product(product: &Product, usage: Option<UsageStatus>) -> Self {
        let LabelSignature {
            product_type,
            instrument,
            ..
        } = product.signature();
        Self {
            lidvid: product.identifying_key().to_string(),
            kind: product.kind_name().to_string(),
            product_type,
            instrument,
            start_time: product
                .metadata_text(START_TIME_FIELD)
                .ok()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            slots: product.slots().collect::<Vec<_>>().join(";"),
            usage,
            label: product.label_path().display().to_string(),
        }
    }
}

impl Depot {
    /// One record per indexed product, in key order. Reads no payloads.
    pub fn inventory(&self) -> Vec<InventoryRecord> {
        self.all()
            .iter()
            .map(|p| InventoryRecord::from_product(p, self.usage(p.identifying_key())))
            .collect()
    }
}

/// Write records as CSV with a header row.
pub fn write_csv<W: io::Write>(records: &[InventoryRecord], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(record).map_err(io::Error::from)?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{LabelBuilder, SamplePayload};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_inventory_csv() {
        let dir = tempfile::tempdir().unwrap();
        LabelBuilder::new("urn:t:hk_1", "telemetry-table")
            .instrument("PanCam")
            .start_time("2030-02-01T00:00:00Z")
            .payload(SamplePayload::housekeeping(&[(1.0, "MAST")]))
            .write(dir.path())
            .unwrap();
        let depot = Depot::new();
        depot.scan(&[dir.path()]);

        let records = depot.inventory();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lidvid, "urn:t:hk_1::1.0");
        assert_eq!(records[0].kind, "telemetry-table");
        assert_eq!(records[0].instrument.as_deref(), Some("PanCam"));
        assert_eq!(records[0].slots, "hk");
        assert_eq!(records[0].usage, Some(UsageStatus::Loaded));

        let mut out = Vec::new();
        write_csv(&records, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("lidvid,kind,product_type,instrument,start_time,slots,usage,label")
        );
        assert!(lines
            .next()
            .unwrap()
            .starts_with("urn:t:hk_1::1.0,telemetry-table,telemetry-table,PanCam,2030-02-01T00:00:00Z,hk,loaded,"));
    }
}
