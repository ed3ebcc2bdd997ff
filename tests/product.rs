use std::sync::{Arc, Barrier};
use std::thread;

use pretty_assertions::assert_eq;
use rusty_depot::product::kind::{SPECTRUM, TELEMETRY_TABLE};
use rusty_depot::sample::{LabelBuilder, SamplePayload};
use rusty_depot::{
    Classifier, Error, MetadataValue, PayloadError, Pds4Parser, Product, ProductView, SlotState,
    SpectrumProduct, TelemetryTable,
};

fn open(path: &std::path::Path) -> Product {
    Product::open(path, &Pds4Parser::default(), &Classifier::with_builtin_variants()).unwrap()
}

#[test]
fn test_payload_is_lazy_and_cached() {
    let dir = tempfile::tempdir().unwrap();
    let path = LabelBuilder::new("urn:t:spec", SPECTRUM)
        .payload(SamplePayload::spectrum(&[1.0, 4.0, 2.0]))
        .write(dir.path())
        .unwrap();
    let product = open(&path);

    assert_eq!(product.slot_state("spectrum"), Some(SlotState::Unloaded));
    assert_eq!(product.materializations(), 0);

    let first = product.payload("spectrum").unwrap();
    let second = product.payload("spectrum").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(product.materializations(), 1);
    assert_eq!(first.to_f64().unwrap(), vec![1.0, 4.0, 2.0]);
    assert_eq!(first.shape(), &[3]);
}

#[test]
fn test_unknown_slot() {
    let dir = tempfile::tempdir().unwrap();
    let path = LabelBuilder::new("urn:t:spec", SPECTRUM)
        .payload(SamplePayload::spectrum(&[1.0]))
        .write(dir.path())
        .unwrap();
    let product = open(&path);
    assert!(matches!(
        product.payload("image"),
        Err(PayloadError::UnknownSlot(slot)) if slot == "image"
    ));
    assert!(!product.invalidate(Some("image")));
}

#[test]
fn test_truncated_payload_fails_on_access_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = LabelBuilder::new("urn:t:short", SPECTRUM)
        .payload(SamplePayload::spectrum(&[1.0, 2.0, 3.0]).truncated(12))
        .write(dir.path())
        .unwrap();
    let product = open(&path);
    assert_eq!(product.slots().collect::<Vec<_>>(), vec!["spectrum"]);

    match product.payload("spectrum") {
        Err(PayloadError::Truncated {
            required, actual, ..
        }) => {
            assert_eq!(required, 24);
            assert_eq!(actual, 12);
        }
        other => panic!("expected truncation, got {other:?}"),
    }
    // a failed load leaves the slot retryable
    assert_eq!(product.slot_state("spectrum"), Some(SlotState::Unloaded));
}

#[test]
fn test_missing_data_file_is_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let path = LabelBuilder::new("urn:t:gone", SPECTRUM)
        .payload(SamplePayload::spectrum(&[1.0]))
        .write(dir.path())
        .unwrap();
    std::fs::remove_file(dir.path().join("gone.dat")).unwrap();

    let product = open(&path);
    assert!(matches!(
        product.payload("spectrum"),
        Err(PayloadError::Unresolved { .. })
    ));
}

#[test]
fn test_concurrent_access_materializes_once() {
    let dir = tempfile::tempdir().unwrap();
    let values: Vec<f64> = (0..4096).map(f64::from).collect();
    let path = LabelBuilder::new("urn:t:big", SPECTRUM)
        .payload(SamplePayload::spectrum(&values))
        .write(dir.path())
        .unwrap();
    let product = Arc::new(open(&path));
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let product = Arc::clone(&product);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                product.payload("spectrum").unwrap()
            })
        })
        .collect();
    let payloads: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(product.materializations(), 1);
    for payload in &payloads {
        assert!(Arc::ptr_eq(payload, &payloads[0]));
        assert_eq!(payload.len(), 4096);
    }
}

#[test]
fn test_invalidate_then_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = LabelBuilder::new("urn:t:spec", SPECTRUM)
        .payload(SamplePayload::spectrum(&[1.0, 2.0]))
        .write(dir.path())
        .unwrap();
    let product = open(&path);

    let before = product.payload("spectrum").unwrap();
    assert!(product.invalidate(Some("spectrum")));
    assert_eq!(product.slot_state("spectrum"), Some(SlotState::Invalidated));
    assert!(!product.has_loaded_payload());

    // the old handle stays valid
    assert_eq!(before.len(), 2);

    let after = product.payload("spectrum").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(product.materializations(), 2);
    assert_eq!(product.slot_state("spectrum"), Some(SlotState::Loaded));
}

#[test]
fn test_metadata_access() {
    let dir = tempfile::tempdir().unwrap();
    let path = LabelBuilder::new("urn:t:spec", SPECTRUM)
        .start_time("2031-02-03T04:05:06Z")
        .field("Exposure/exposure_duration", "0.25")
        .write(dir.path())
        .unwrap();
    let product = open(&path);

    assert_eq!(
        product.metadata("Exposure/exposure_duration"),
        Ok(MetadataValue::Float(0.25))
    );
    let missing = product.metadata("Exposure/gain").unwrap_err();
    assert_eq!(missing.field, "Exposure/gain");
    assert_eq!(product.kind_name(), SPECTRUM);
    assert_eq!(product.signature().product_type.as_deref(), Some(SPECTRUM));
}

#[test]
fn test_spectrum_view() {
    let dir = tempfile::tempdir().unwrap();
    let path = LabelBuilder::new("urn:t:spec", SPECTRUM)
        .payload(SamplePayload::spectrum(&[0.5, 3.0, 1.0]))
        .write(dir.path())
        .unwrap();
    let product = open(&path);

    let view = SpectrumProduct::from_product(&product).unwrap();
    assert_eq!(view.sample_count(), Some(3));
    assert_eq!(view.peak().unwrap(), Some((1, 3.0)));
    assert!(matches!(
        TelemetryTable::from_product(&product),
        Err(Error::WrongKind { .. })
    ));
}

#[test]
fn test_telemetry_rows_where() {
    let dir = tempfile::tempdir().unwrap();
    let path = LabelBuilder::new("urn:t:hk", TELEMETRY_TABLE)
        .payload(SamplePayload::housekeeping(&[
            (10.0, "MAST/PTU"),
            (11.0, "MAST/TILT"),
            (12.0, "MAST/PTU"),
        ]))
        .write(dir.path())
        .unwrap();
    let product = open(&path);
    let table: TelemetryTable = product.view().unwrap();

    assert_eq!(table.record_count(), Some(3));
    let rows = table
        .rows_where("index_id", &MetadataValue::from("MAST/PTU"))
        .unwrap();
    assert_eq!(rows.num_rows(), 2);
    let rows = table
        .rows_where("time", &MetadataValue::Float(11.0))
        .unwrap();
    assert_eq!(rows.num_rows(), 1);
    assert!(matches!(
        table.rows_where("index_id", &MetadataValue::from("ROVER")),
        Err(Error::RowNotFound { .. })
    ));
}
