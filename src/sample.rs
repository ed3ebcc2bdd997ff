//! Writing small PDS4-style products: one XML label plus one data file.
//!
//! Used by the `generate_sample` binary and by tests that need real label
//! trees on disk.
//!
//! ```no_run
//! use rusty_depot::sample::{LabelBuilder, SamplePayload};
//!
//! # fn example() -> std::io::Result<()> {
//! let label = LabelBuilder::new("urn:esa:psa:demo:data_raw:spec_0001", "spectrum")
//!     .start_time("2030-05-01T10:00:00Z")
//!     .payload(SamplePayload::spectrum(&[0.1, 0.4, 0.2]))
//!     .write(std::path::Path::new("/tmp/depot"))?;
//! println!("wrote {}", label.display());
//! # Ok(())
//! # }
//! ```

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quick_xml::escape::escape;

/// Width of the `index_id` text field of housekeeping records.
pub const HK_ID_WIDTH: usize = 12;

#[derive(Debug, Clone)]
enum SampleLayout {
    Array {
        element: &'static str,
        /// `(axis name, elements)`, slowest first.
        axes: Vec<(&'static str, usize)>,
    },
    Table {
        records: usize,
        record_length: usize,
        /// `(name, 1-based location, data type, length)`.
        fields: Vec<(&'static str, usize, &'static str, usize)>,
    },
}

/// One payload: its declaration and the bytes backing it.
#[derive(Debug, Clone)]
pub struct SamplePayload {
    slot: String,
    layout: SampleLayout,
    bytes: Vec<u8>,
}

impl SamplePayload {
    /// Little-endian doubles along one `Band` axis, slot `spectrum`.
    pub fn spectrum(values: &[f64]) -> Self {
        Self {
            slot: "spectrum".to_string(),
            layout: SampleLayout::Array {
                element: "IEEE754LSBDouble",
                axes: vec![("Band", values.len())],
            },
            bytes: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// Big-endian unsigned 16-bit pixels, `lines × samples`, slot `image`.
    pub fn image(lines: usize, samples: usize, pixels: &[u16]) -> Self {
        Self {
            slot: "image".to_string(),
            layout: SampleLayout::Array {
                element: "UnsignedMSB2",
                axes: vec![("Line", lines), ("Sample", samples)],
            },
            bytes: pixels.iter().flat_map(|v| v.to_be_bytes()).collect(),
        }
    }

    /// Housekeeping records of `time` (big-endian double) and `index_id`
    /// (space-padded ASCII), slot `hk`.
    pub fn housekeeping(rows: &[(f64, &str)]) -> Self {
        let record_length = 8 + HK_ID_WIDTH;
        let mut bytes = Vec::with_capacity(rows.len() * record_length);
        for (time, id) in rows {
            bytes.extend_from_slice(&time.to_be_bytes());
            let mut field = [b' '; HK_ID_WIDTH];
            for (dst, src) in field.iter_mut().zip(id.bytes()) {
                *dst = src;
            }
            bytes.extend_from_slice(&field);
        }
        Self {
            slot: "hk".to_string(),
            layout: SampleLayout::Table {
                records: rows.len(),
                record_length,
                fields: vec![
                    ("time", 1, "IEEE754MSBDouble", 8),
                    ("index_id", 9, "ASCII_String", HK_ID_WIDTH),
                ],
            },
            bytes,
        }
    }

    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    /// Keep only the first `len` bytes on disk while still declaring the
    /// full payload.
    pub fn truncated(mut self, len: usize) -> Self {
        self.bytes.truncate(len);
        self
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    fn write_declaration(&self, xml: &mut String, offset: usize) {
        let slot = escape(self.slot.as_str());
        match &self.layout {
            SampleLayout::Array { element, axes } => {
                let tag = format!("Array_{}D", axes.len());
                let _ = writeln!(xml, "    <{tag}>");
                let _ = writeln!(xml, "      <local_identifier>{slot}</local_identifier>");
                let _ = writeln!(xml, "      <offset unit=\"byte\">{offset}</offset>");
                let _ = writeln!(xml, "      <axes>{}</axes>", axes.len());
                let _ = writeln!(
                    xml,
                    "      <Element_Array><data_type>{element}</data_type></Element_Array>"
                );
                for (i, (name, elements)) in axes.iter().enumerate() {
                    let _ = writeln!(
                        xml,
                        "      <Axis_Array><axis_name>{name}</axis_name><elements>{elements}</elements><sequence_number>{}</sequence_number></Axis_Array>",
                        i + 1
                    );
                }
                let _ = writeln!(xml, "    </{tag}>");
            }
            SampleLayout::Table {
                records,
                record_length,
                fields,
            } => {
                let _ = writeln!(xml, "    <Table_Binary>");
                let _ = writeln!(xml, "      <local_identifier>{slot}</local_identifier>");
                let _ = writeln!(xml, "      <offset unit=\"byte\">{offset}</offset>");
                let _ = writeln!(xml, "      <records>{records}</records>");
                let _ = writeln!(xml, "      <Record_Binary>");
                let _ = writeln!(xml, "        <fields>{}</fields>", fields.len());
                let _ = writeln!(xml, "        <groups>0</groups>");
                let _ = writeln!(
                    xml,
                    "        <record_length unit=\"byte\">{record_length}</record_length>"
                );
                for (name, location, data_type, length) in fields {
                    let _ = writeln!(
                        xml,
                        "        <Field_Binary><name>{name}</name><field_location unit=\"byte\">{location}</field_location><data_type>{data_type}</data_type><field_length unit=\"byte\">{length}</field_length></Field_Binary>"
                    );
                }
                let _ = writeln!(xml, "      </Record_Binary>");
                let _ = writeln!(xml, "    </Table_Binary>");
            }
        }
    }
}

/// Builder for one observational product.
#[derive(Debug, Clone)]
pub struct LabelBuilder {
    lid: String,
    vid: String,
    product_type: String,
    stem: String,
    start_time: Option<String>,
    instrument: Option<String>,
    fields: Vec<(String, String)>,
    payloads: Vec<SamplePayload>,
}

impl LabelBuilder {
    /// File names default to the last `:`-separated segment of `lid`.
    pub fn new(lid: impl Into<String>, product_type: impl Into<String>) -> Self {
        let lid = lid.into();
        let stem = lid.rsplit(':').next().unwrap_or("product").to_string();
        Self {
            lid,
            vid: "1.0".to_string(),
            product_type: product_type.into(),
            stem,
            start_time: None,
            instrument: None,
            fields: Vec::new(),
            payloads: Vec::new(),
        }
    }

    pub fn version(mut self, vid: impl Into<String>) -> Self {
        self.vid = vid.into();
        self
    }

    pub fn file_stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = stem.into();
        self
    }

    pub fn start_time(mut self, time: impl Into<String>) -> Self {
        self.start_time = Some(time.into());
        self
    }

    pub fn instrument(mut self, name: impl Into<String>) -> Self {
        self.instrument = Some(name.into());
        self
    }

    /// Mission-area field at a `/`-separated element path, e.g.
    /// `Sub-Instrument/identifier`.
    pub fn field(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((path.into(), value.into()));
        self
    }

    pub fn payload(mut self, payload: SamplePayload) -> Self {
        self.payloads.push(payload);
        self
    }

    pub fn label_file_name(&self) -> String {
        format!("{}.xml", self.stem)
    }

    pub fn data_file_name(&self) -> String {
        format!("{}.dat", self.stem)
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<Product_Observational xmlns=\"http://pds.nasa.gov/pds4/pds/v1\">\n");
        xml.push_str("  <Identification_Area>\n");
        let _ = writeln!(
            xml,
            "    <logical_identifier>{}</logical_identifier>",
            escape(self.lid.as_str())
        );
        let _ = writeln!(xml, "    <version_id>{}</version_id>", escape(self.vid.as_str()));
        xml.push_str("    <product_class>Product_Observational</product_class>\n");
        xml.push_str("  </Identification_Area>\n");

        xml.push_str("  <Observation_Area>\n");
        if let Some(start) = &self.start_time {
            let start = escape(start.as_str());
            let _ = writeln!(
                xml,
                "    <Time_Coordinates><start_date_time>{start}</start_date_time><stop_date_time>{start}</stop_date_time></Time_Coordinates>"
            );
        }
        if let Some(instrument) = &self.instrument {
            let _ = writeln!(
                xml,
                "    <Observing_System><Observing_System_Component><name>{}</name><type>Instrument</type></Observing_System_Component></Observing_System>",
                escape(instrument.as_str())
            );
        }
        xml.push_str("    <Mission_Area>\n");
        if !self.product_type.is_empty() {
            let _ = writeln!(
                xml,
                "      <Mission_Information><product_type_name>{}</product_type_name></Mission_Information>",
                escape(self.product_type.as_str())
            );
        }
        for (path, value) in &self.fields {
            let steps: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            xml.push_str("      ");
            for step in &steps {
                let _ = write!(xml, "<{step}>");
            }
            xml.push_str(&escape(value.as_str()));
            for step in steps.iter().rev() {
                let _ = write!(xml, "</{step}>");
            }
            xml.push('\n');
        }
        xml.push_str("    </Mission_Area>\n");
        xml.push_str("  </Observation_Area>\n");

        if !self.payloads.is_empty() {
            xml.push_str("  <File_Area_Observational>\n");
            let _ = writeln!(
                xml,
                "    <File><file_name>{}</file_name></File>",
                escape(self.data_file_name().as_str())
            );
            let mut offset = 0;
            for payload in &self.payloads {
                payload.write_declaration(&mut xml, offset);
                offset += declared_len(payload);
            }
            xml.push_str("  </File_Area_Observational>\n");
        }
        xml.push_str("</Product_Observational>\n");
        xml
    }

    /// Write the label and its data file into `dir`, returning the label path.
    pub fn write(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        if !self.payloads.is_empty() {
            let mut data = Vec::new();
            for payload in &self.payloads {
                data.extend_from_slice(&payload.bytes);
            }
            fs::write(dir.join(self.data_file_name()), data)?;
        }
        let label = dir.join(self.label_file_name());
        fs::write(&label, self.to_xml())?;
        Ok(label)
    }
}

// Bytes the declaration claims, which exceeds the bytes written for a
// truncated payload. Later payloads are placed after the declared extent.
fn declared_len(payload: &SamplePayload) -> usize {
    match &payload.layout {
        SampleLayout::Array { element, axes } => {
            let width = match *element {
                "IEEE754LSBDouble" | "IEEE754MSBDouble" => 8,
                "UnsignedMSB2" => 2,
                _ => 1,
            };
            axes.iter().map(|(_, n)| n).product::<usize>() * width
        }
        SampleLayout::Table {
            records,
            record_length,
            ..
        } => records * record_length,
    }
}

/// Write a label file that is not well-formed XML.
pub fn write_corrupt_label(dir: &Path, stem: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{stem}.xml"));
    fs::write(
        &path,
        "<?xml version=\"1.0\"?>\n<Product_Observational>\n  <Identification_Area>\n    <logical_identifier>urn:broken",
    )?;
    Ok(path)
}
