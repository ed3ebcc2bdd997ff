//! Label access contract.
//!
//! The depot never interprets label grammar itself. It reads labels through
//! [`LabelAccessor`], produced by a [`LabelParser`]. The bundled
//! [`xml::Pds4Parser`] handles PDS4-style XML labels; any other parser only has to
//! honour the same read contract.

pub mod path;
pub mod xml;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::LabelError;

pub use xml::Pds4Parser;

/// Read-only view over a parsed label document.
pub trait LabelAccessor: fmt::Debug + Send + Sync {
    /// Text of the first element matching `path`, trimmed. Present-but-empty
    /// elements yield `Some("")`.
    fn get_field(&self, path: &str) -> Option<&str>;

    /// Text of every element matching `path`, in document order.
    fn get_all(&self, path: &str) -> Vec<&str>;

    /// Payload descriptors in document order.
    fn list_payload_descriptors(&self) -> &[PayloadDescriptor];
}

/// Produces [`LabelAccessor`]s from label files.
pub trait LabelParser: fmt::Debug + Send + Sync {
    /// File extension (without the dot) of the labels this parser reads.
    fn extension(&self) -> &str;

    fn parse(&self, path: &Path) -> Result<Box<dyn LabelAccessor>, LabelError>;
}

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Big,
    Little,
}

/// Binary element encodings declared by labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int8,
    UInt8,
    Int16(Endian),
    UInt16(Endian),
    Int32(Endian),
    UInt32(Endian),
    Int64(Endian),
    UInt64(Endian),
    Float32(Endian),
    Float64(Endian),
    /// Fixed-width text; only valid for table fields.
    Ascii,
    /// Fixed-width UTF-8 text; only valid for table fields.
    Utf8,
}

impl ElementType {
    /// Parse a PDS4 `data_type` name.
    pub fn from_pds4(name: &str) -> Option<Self> {
        use Endian::{Big, Little};
        use ElementType::*;
        let ty = match name {
            "SignedByte" => Int8,
            "UnsignedByte" => UInt8,
            "SignedMSB2" => Int16(Big),
            "SignedLSB2" => Int16(Little),
            "UnsignedMSB2" => UInt16(Big),
            "UnsignedLSB2" => UInt16(Little),
            "SignedMSB4" => Int32(Big),
            "SignedLSB4" => Int32(Little),
            "UnsignedMSB4" => UInt32(Big),
            "UnsignedLSB4" => UInt32(Little),
            "SignedMSB8" => Int64(Big),
            "SignedLSB8" => Int64(Little),
            "UnsignedMSB8" => UInt64(Big),
            "UnsignedLSB8" => UInt64(Little),
            "IEEE754MSBSingle" => Float32(Big),
            "IEEE754LSBSingle" => Float32(Little),
            "IEEE754MSBDouble" => Float64(Big),
            "IEEE754LSBDouble" => Float64(Little),
            "ASCII_String" => Ascii,
            "UTF8_String" => Utf8,
            _ => return None,
        };
        Some(ty)
    }

    /// The PDS4 spelling of this type.
    pub fn pds4_name(&self) -> &'static str {
        use Endian::{Big, Little};
        use ElementType::*;
        match self {
            Int8 => "SignedByte",
            UInt8 => "UnsignedByte",
            Int16(Big) => "SignedMSB2",
            Int16(Little) => "SignedLSB2",
            UInt16(Big) => "UnsignedMSB2",
            UInt16(Little) => "UnsignedLSB2",
            Int32(Big) => "SignedMSB4",
            Int32(Little) => "SignedLSB4",
            UInt32(Big) => "UnsignedMSB4",
            UInt32(Little) => "UnsignedLSB4",
            Int64(Big) => "SignedMSB8",
            Int64(Little) => "SignedLSB8",
            UInt64(Big) => "UnsignedMSB8",
            UInt64(Little) => "UnsignedLSB8",
            Float32(Big) => "IEEE754MSBSingle",
            Float32(Little) => "IEEE754LSBSingle",
            Float64(Big) => "IEEE754MSBDouble",
            Float64(Little) => "IEEE754LSBDouble",
            Ascii => "ASCII_String",
            Utf8 => "UTF8_String",
        }
    }

    /// Width in bytes of one element. `None` for text, whose width is set by
    /// the field length.
    pub fn width(&self) -> Option<usize> {
        use ElementType::*;
        match self {
            Int8 | UInt8 => Some(1),
            Int16(_) | UInt16(_) => Some(2),
            Int32(_) | UInt32(_) | Float32(_) => Some(4),
            Int64(_) | UInt64(_) | Float64(_) => Some(8),
            Ascii | Utf8 => None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.width().is_none()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pds4_name())
    }
}

// ---------------------------------------------------------------------------
// Payload descriptors
// ---------------------------------------------------------------------------

/// One field of a binary table record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Zero-based byte offset within the record.
    pub location: usize,
    pub element: ElementType,
    /// Field width in bytes.
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadLayout {
    /// N-dimensional array, stored contiguously.
    Array {
        element: ElementType,
        /// Axis sizes, slowest-varying first.
        shape: Vec<usize>,
    },
    /// Fixed-length binary records.
    Table {
        records: usize,
        record_length: usize,
        fields: Vec<FieldDescriptor>,
    },
}

/// Where a payload lives and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDescriptor {
    /// Slot name, unique within a label.
    pub slot: String,
    /// Backing file as declared; relative paths resolve against the label's
    /// directory.
    pub file: PathBuf,
    /// Byte offset of the payload within `file`.
    pub offset: u64,
    pub layout: PayloadLayout,
}

impl PayloadDescriptor {
    /// Number of bytes the payload occupies, `None` on overflow.
    pub fn byte_len(&self) -> Option<u64> {
        match &self.layout {
            PayloadLayout::Array { element, shape } => {
                let width = element.width()? as u64;
                shape
                    .iter()
                    .try_fold(width, |acc, &n| acc.checked_mul(n as u64))
            }
            PayloadLayout::Table {
                records,
                record_length,
                ..
            } => (*records as u64).checked_mul(*record_length as u64),
        }
    }

    /// Shape of the materialized payload: axis sizes for arrays, record count
    /// for tables.
    pub fn shape(&self) -> Vec<usize> {
        match &self.layout {
            PayloadLayout::Array { shape, .. } => shape.clone(),
            PayloadLayout::Table { records, .. } => vec![*records],
        }
    }

    /// Resolve the backing file against the directory holding the label.
    pub fn resolve(&self, label_dir: &Path) -> PathBuf {
        if self.file.is_absolute() {
            self.file.clone()
        } else {
            label_dir.join(&self.file)
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.layout, PayloadLayout::Array { .. })
    }

    pub fn is_table(&self) -> bool {
        matches!(self.layout, PayloadLayout::Table { .. })
    }
}
