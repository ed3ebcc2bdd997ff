//! Payload materialization: declared byte ranges → Arrow arrays and tables.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, StringArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::PayloadError;
use crate::label::{ElementType, Endian, FieldDescriptor, PayloadDescriptor, PayloadLayout};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum PayloadData {
    /// Flat array in storage order; see [`Payload::shape`].
    Array(ArrayRef),
    /// One column per record field.
    Table(RecordBatch),
}

/// A materialized payload slot.
#[derive(Debug, Clone)]
pub struct Payload {
    slot: String,
    source: PathBuf,
    shape: Vec<usize>,
    data: PayloadData,
}

impl Payload {
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// File the payload was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Axis sizes (slowest first) for arrays, `[records]` for tables.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &PayloadData {
        &self.data
    }

    pub fn array(&self) -> Option<&ArrayRef> {
        match &self.data {
            PayloadData::Array(a) => Some(a),
            PayloadData::Table(_) => None,
        }
    }

    pub fn table(&self) -> Option<&RecordBatch> {
        match &self.data {
            PayloadData::Table(t) => Some(t),
            PayloadData::Array(_) => None,
        }
    }

    /// Element count for arrays, row count for tables.
    pub fn len(&self) -> usize {
        match &self.data {
            PayloadData::Array(a) => a.len(),
            PayloadData::Table(t) => t.num_rows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Array values widened to `f64`.
    pub fn to_f64(&self) -> Result<Vec<f64>, PayloadError> {
        let array = self.array().ok_or_else(|| PayloadError::Layout {
            slot: self.slot.clone(),
            expected: "an array",
        })?;
        let widened = cast(array, &DataType::Float64)?;
        Ok(widened.as_primitive::<Float64Type>().values().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read and decode the payload described by `desc`. Relative payload paths
/// resolve against `label_dir`.
pub(crate) fn materialize(
    desc: &PayloadDescriptor,
    label_dir: &Path,
) -> Result<Payload, PayloadError> {
    let source = desc.resolve(label_dir);
    let bytes = read_range(desc, &source)?;
    let data = match &desc.layout {
        PayloadLayout::Array { element, .. } => {
            PayloadData::Array(decode_elements(&desc.slot, *element, &bytes)?)
        }
        PayloadLayout::Table {
            records,
            record_length,
            fields,
        } => PayloadData::Table(decode_table(
            &desc.slot,
            *records,
            *record_length,
            fields,
            &bytes,
        )?),
    };
    log::debug!(
        "materialized slot '{}' ({} bytes) from {}",
        desc.slot,
        bytes.len(),
        source.display()
    );
    Ok(Payload {
        slot: desc.slot.clone(),
        source,
        shape: desc.shape(),
        data,
    })
}

fn read_range(desc: &PayloadDescriptor, source: &Path) -> Result<Vec<u8>, PayloadError> {
    let io_error = |source_err: std::io::Error| PayloadError::Io {
        path: source.to_path_buf(),
        source: source_err,
    };
    let shape_error = |reason: &str| PayloadError::Shape {
        slot: desc.slot.clone(),
        reason: reason.to_string(),
    };

    let mut file = File::open(source).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            PayloadError::Unresolved {
                slot: desc.slot.clone(),
                path: source.to_path_buf(),
            }
        } else {
            io_error(e)
        }
    })?;
    let actual = file.metadata().map_err(io_error)?.len();

    let len = desc
        .byte_len()
        .ok_or_else(|| shape_error("declared size overflows"))?;
    let required = desc
        .offset
        .checked_add(len)
        .ok_or_else(|| shape_error("declared range overflows"))?;
    let truncated = || PayloadError::Truncated {
        slot: desc.slot.clone(),
        path: source.to_path_buf(),
        required,
        actual,
    };
    if required > actual {
        return Err(truncated());
    }

    let len = usize::try_from(len).map_err(|_| shape_error("payload does not fit in memory"))?;
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(desc.offset)).map_err(io_error)?;
    file.read_exact(&mut buf).map_err(|e| {
        // The file shrank between the size check and the read.
        if e.kind() == ErrorKind::UnexpectedEof {
            truncated()
        } else {
            io_error(e)
        }
    })?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

macro_rules! decode_numeric {
    ($bytes:expr, $array:ty, $prim:ty, $endian:expr) => {{
        const WIDTH: usize = std::mem::size_of::<$prim>();
        let values: Vec<$prim> = $bytes
            .chunks_exact(WIDTH)
            .map(|chunk| {
                let mut raw = [0u8; WIDTH];
                raw.copy_from_slice(chunk);
                match $endian {
                    Endian::Big => <$prim>::from_be_bytes(raw),
                    Endian::Little => <$prim>::from_le_bytes(raw),
                }
            })
            .collect();
        Arc::new(<$array>::from(values)) as ArrayRef
    }};
}

fn decode_elements(slot: &str, element: ElementType, bytes: &[u8]) -> Result<ArrayRef, PayloadError> {
    use ElementType::*;
    let array = match element {
        Int8 => Arc::new(Int8Array::from(
            bytes.iter().map(|b| *b as i8).collect::<Vec<_>>(),
        )) as ArrayRef,
        UInt8 => Arc::new(UInt8Array::from(bytes.to_vec())) as ArrayRef,
        Int16(e) => decode_numeric!(bytes, Int16Array, i16, e),
        UInt16(e) => decode_numeric!(bytes, UInt16Array, u16, e),
        Int32(e) => decode_numeric!(bytes, Int32Array, i32, e),
        UInt32(e) => decode_numeric!(bytes, UInt32Array, u32, e),
        Int64(e) => decode_numeric!(bytes, Int64Array, i64, e),
        UInt64(e) => decode_numeric!(bytes, UInt64Array, u64, e),
        Float32(e) => decode_numeric!(bytes, Float32Array, f32, e),
        Float64(e) => decode_numeric!(bytes, Float64Array, f64, e),
        Ascii | Utf8 => {
            return Err(PayloadError::Shape {
                slot: slot.to_string(),
                reason: format!("{element} is not an array element type"),
            })
        }
    };
    Ok(array)
}

fn decode_table(
    slot: &str,
    records: usize,
    record_length: usize,
    fields: &[FieldDescriptor],
    bytes: &[u8],
) -> Result<RecordBatch, PayloadError> {
    let shape_error = |reason: String| PayloadError::Shape {
        slot: slot.to_string(),
        reason,
    };
    let field_bytes = |record: usize, field: &FieldDescriptor| {
        record
            .checked_mul(record_length)
            .and_then(|offset| offset.checked_add(field.location))
            .and_then(|start| Some(start..start.checked_add(field.length)?))
            .and_then(|range| bytes.get(range))
            .ok_or_else(|| shape_error(format!("field '{}' lies outside its record", field.name)))
    };

    let mut schema_fields = Vec::with_capacity(fields.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for field in fields {
        let column = match field.element.width() {
            None => {
                let values = (0..records)
                    .map(|r| field_bytes(r, field).map(decode_text))
                    .collect::<Result<Vec<_>, _>>()?;
                Arc::new(StringArray::from(values)) as ArrayRef
            }
            Some(width) if width == field.length => {
                let mut packed = Vec::with_capacity(records * width);
                for r in 0..records {
                    packed.extend_from_slice(field_bytes(r, field)?);
                }
                decode_elements(slot, field.element, &packed)?
            }
            Some(width) => {
                return Err(shape_error(format!(
                    "field '{}' is {} bytes but {} needs {width}",
                    field.name, field.length, field.element
                )))
            }
        };
        schema_fields.push(Field::new(&field.name, column.data_type().clone(), false));
        columns.push(column);
    }
    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(schema_fields)),
        columns,
    )?)
}

fn decode_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_desc(file: &str, offset: u64, element: ElementType, shape: Vec<usize>) -> PayloadDescriptor {
        PayloadDescriptor {
            slot: "data".into(),
            file: file.into(),
            offset,
            layout: PayloadLayout::Array { element, shape },
        }
    }

    #[test]
    fn test_decode_big_and_little_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let be = decode_elements("s", ElementType::UInt16(Endian::Big), &bytes).unwrap();
        let le = decode_elements("s", ElementType::UInt16(Endian::Little), &bytes).unwrap();
        assert_eq!(be.as_primitive::<arrow::datatypes::UInt16Type>().values().to_vec(), vec![0x0102, 0x0304]);
        assert_eq!(le.as_primitive::<arrow::datatypes::UInt16Type>().values().to_vec(), vec![0x0201, 0x0403]);
    }

    #[test]
    fn test_table_field_past_addressable_range_is_shape_error() {
        let field = FieldDescriptor {
            name: "id".into(),
            location: usize::MAX,
            element: ElementType::Ascii,
            length: 2,
        };
        let err = decode_table("hk", 2, 4, &[field], &[0u8; 8]).unwrap_err();
        assert!(matches!(err, PayloadError::Shape { ref slot, .. } if slot == "hk"), "{err}");
    }

    #[test]
    fn test_materialize_array_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![0xAA; 3];
        for v in [1.5f32, -2.0, 8.25] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(dir.path().join("a.dat"), &bytes).unwrap();

        let desc = array_desc("a.dat", 3, ElementType::Float32(Endian::Little), vec![3]);
        let payload = materialize(&desc, dir.path()).unwrap();
        assert_eq!(payload.shape(), &[3]);
        assert_eq!(payload.to_f64().unwrap(), vec![1.5, -2.0, 8.25]);
        assert_eq!(payload.source(), dir.path().join("a.dat"));
    }

    #[test]
    fn test_declared_range_past_end_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.dat"), [0u8; 10]).unwrap();
        let desc = array_desc("a.dat", 4, ElementType::Int32(Endian::Big), vec![2]);
        match materialize(&desc, dir.path()) {
            Err(PayloadError::Truncated {
                required, actual, ..
            }) => assert_eq!((required, actual), (12, 10)),
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let desc = array_desc("nope.dat", 0, ElementType::UInt8, vec![1]);
        assert!(matches!(
            materialize(&desc, dir.path()),
            Err(PayloadError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_decode_table_with_text_field() {
        let mut bytes = Vec::new();
        for (t, id) in [(1.0f64, b"A "), (2.0, b"BC")] {
            bytes.extend_from_slice(&t.to_be_bytes());
            bytes.extend_from_slice(id);
        }
        let fields = vec![
            FieldDescriptor {
                name: "time".into(),
                location: 0,
                element: ElementType::Float64(Endian::Big),
                length: 8,
            },
            FieldDescriptor {
                name: "id".into(),
                location: 8,
                element: ElementType::Ascii,
                length: 2,
            },
        ];
        let batch = decode_table("hk", 2, 10, &fields, &bytes).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let ids = batch.column(1).as_string::<i32>();
        assert_eq!(ids.value(0), "A");
        assert_eq!(ids.value(1), "BC");
    }
}
