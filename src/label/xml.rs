//! PDS4 XML labels.
//!
//! The document is read once with `quick-xml` into a small element tree
//! (local names only, attributes dropped) and payload descriptors are derived
//! eagerly, so a label that parses is known to describe its payloads
//! consistently.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::path::{FieldPath, Step};
use super::{
    ElementType, FieldDescriptor, LabelAccessor, LabelParser, PayloadDescriptor, PayloadLayout,
};
use crate::error::LabelError;

/// Parser for PDS4 XML labels.
#[derive(Debug, Clone)]
pub struct Pds4Parser {
    extension: String,
}

impl Default for Pds4Parser {
    fn default() -> Self {
        Self {
            extension: "xml".to_string(),
        }
    }
}

impl Pds4Parser {
    /// Parser recognising labels by a different extension.
    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }
}

impl LabelParser for Pds4Parser {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn parse(&self, path: &Path) -> Result<Box<dyn LabelAccessor>, LabelError> {
        let bytes = std::fs::read(path).map_err(|source| LabelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|e| LabelError::Malformed {
            path: path.to_path_buf(),
            reason: format!("not valid UTF-8: {e}"),
        })?;
        Ok(Box::new(XmlLabel::parse_str(&text, path)?))
    }
}

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            text: String::new(),
            children: Vec::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn matches(&self, step: &Step) -> bool {
        if self.name != step.name {
            return false;
        }
        match &step.predicate {
            None => true,
            Some((child, value)) => self
                .children_named(child)
                .any(|c| c.text == value.as_str()),
        }
    }
}

// `el` is tested against steps[0]; deeper steps are matched among children.
fn match_from<'a>(el: &'a Element, steps: &[Step], out: &mut Vec<&'a Element>) {
    let Some((first, rest)) = steps.split_first() else {
        return;
    };
    if !el.matches(first) {
        return;
    }
    if rest.is_empty() {
        out.push(el);
        return;
    }
    for child in &el.children {
        match_from(child, rest, out);
    }
}

fn match_anywhere<'a>(el: &'a Element, steps: &[Step], out: &mut Vec<&'a Element>) {
    match_from(el, steps, out);
    for child in &el.children {
        match_anywhere(child, steps, out);
    }
}

// ---------------------------------------------------------------------------
// XmlLabel
// ---------------------------------------------------------------------------

/// A parsed PDS4 XML label.
#[derive(Debug, Clone)]
pub struct XmlLabel {
    path: PathBuf,
    root: Element,
    descriptors: Vec<PayloadDescriptor>,
}

impl XmlLabel {
    /// Parse label text. `path` is only used in error messages.
    pub fn parse_str(text: &str, path: &Path) -> Result<Self, LabelError> {
        let root = read_tree(text, path)?;
        let descriptors = collect_descriptors(&root, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            root,
            descriptors,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Local name of the document element, e.g. `Product_Observational`.
    pub fn root_name(&self) -> &str {
        &self.root.name
    }

    fn find_all(&self, path: &str) -> Vec<&Element> {
        let Some(parsed) = FieldPath::parse(path) else {
            log::debug!("ignoring unparseable field path '{path}'");
            return Vec::new();
        };
        let mut out = Vec::new();
        if parsed.anchored {
            match_from(&self.root, &parsed.steps, &mut out);
        } else {
            match_anywhere(&self.root, &parsed.steps, &mut out);
        }
        out
    }
}

impl LabelAccessor for XmlLabel {
    fn get_field(&self, path: &str) -> Option<&str> {
        self.find_all(path).first().map(|el| el.text.as_str())
    }

    fn get_all(&self, path: &str) -> Vec<&str> {
        self.find_all(path)
            .into_iter()
            .map(|el| el.text.as_str())
            .collect()
    }

    fn list_payload_descriptors(&self) -> &[PayloadDescriptor] {
        &self.descriptors
    }
}

fn read_tree(text: &str, path: &Path) -> Result<Element, LabelError> {
    let malformed = |reason: String| LabelError::Malformed {
        path: path.to_path_buf(),
        reason,
    };
    let name_of = |raw: &[u8]| {
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| malformed(format!("element name is not UTF-8: {e}")))
    };

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(e) => stack.push(Element::new(name_of(e.local_name().as_ref())?)),
            Event::Empty(e) => {
                let el = Element::new(name_of(e.local_name().as_ref())?);
                attach(&mut stack, &mut root, el).map_err(malformed)?;
            }
            Event::End(_) => {
                let mut el = stack
                    .pop()
                    .ok_or_else(|| malformed("unbalanced closing tag".to_string()))?;
                el.text = el.text.trim().to_string();
                attach(&mut stack, &mut root, el).map_err(malformed)?;
            }
            Event::Text(t) => {
                let s = t
                    .unescape()
                    .map_err(|e| malformed(format!("bad character data: {e}")))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&s);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(format!(
            "document ends inside <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| malformed("document has no root element".to_string()))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<(), String> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
        return Ok(());
    }
    if root.is_some() {
        return Err(format!("second root element <{}>", el.name));
    }
    *root = Some(el);
    Ok(())
}

// ---------------------------------------------------------------------------
// Payload descriptors
// ---------------------------------------------------------------------------

struct DescriptorContext<'a> {
    path: &'a Path,
    slot: String,
}

impl DescriptorContext<'_> {
    fn error(&self, reason: impl Into<String>) -> LabelError {
        LabelError::Descriptor {
            path: self.path.to_path_buf(),
            slot: self.slot.clone(),
            reason: reason.into(),
        }
    }

    fn required<'e>(&self, el: &'e Element, name: &str) -> Result<&'e str, LabelError> {
        el.child_text(name)
            .ok_or_else(|| self.error(format!("<{}> has no <{name}>", el.name)))
    }

    fn number<T: FromStr>(&self, el: &Element, name: &str) -> Result<T, LabelError> {
        let text = self.required(el, name)?;
        text.parse()
            .map_err(|_| self.error(format!("<{name}> is not a valid count: '{text}'")))
    }

    fn element_type(&self, text: &str) -> Result<ElementType, LabelError> {
        ElementType::from_pds4(text)
            .ok_or_else(|| self.error(format!("unsupported data type '{text}'")))
    }
}

fn collect_descriptors(root: &Element, path: &Path) -> Result<Vec<PayloadDescriptor>, LabelError> {
    let mut areas = Vec::new();
    collect_file_areas(root, &mut areas);

    let mut descriptors = Vec::new();
    let mut seen = HashSet::new();
    for area in areas {
        let Some(file) = area.child("File") else {
            continue;
        };
        let file_ctx = DescriptorContext {
            path,
            slot: area.name.clone(),
        };
        let file_name = file_ctx.required(file, "file_name")?;
        let file_path = match file.child_text("directory_path_name") {
            Some(dir) if !dir.is_empty() => Path::new(dir).join(file_name),
            _ => PathBuf::from(file_name),
        };

        for el in &area.children {
            let is_array = el.name.starts_with("Array");
            if !is_array && el.name != "Table_Binary" {
                continue;
            }
            let slot = el
                .child_text("local_identifier")
                .or_else(|| el.child_text("name"))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_{}", el.name, descriptors.len()));
            let ctx = DescriptorContext { path, slot };
            if !seen.insert(ctx.slot.clone()) {
                return Err(ctx.error("slot name declared twice"));
            }
            let offset: u64 = ctx.number(el, "offset")?;
            let layout = if is_array {
                array_layout(&ctx, el)?
            } else {
                table_layout(&ctx, el)?
            };
            descriptors.push(PayloadDescriptor {
                slot: ctx.slot,
                file: file_path.clone(),
                offset,
                layout,
            });
        }
    }
    Ok(descriptors)
}

fn collect_file_areas<'a>(el: &'a Element, out: &mut Vec<&'a Element>) {
    if el.name.starts_with("File_Area") {
        out.push(el);
        return;
    }
    for child in &el.children {
        collect_file_areas(child, out);
    }
}

fn array_layout(ctx: &DescriptorContext<'_>, el: &Element) -> Result<PayloadLayout, LabelError> {
    let element_array = el
        .child("Element_Array")
        .ok_or_else(|| ctx.error("array has no <Element_Array>"))?;
    let element = ctx.element_type(ctx.required(element_array, "data_type")?)?;
    if element.is_text() {
        return Err(ctx.error(format!("{element} is not a valid array element type")));
    }

    let mut axes = Vec::new();
    for (i, axis) in el.children_named("Axis_Array").enumerate() {
        let elements: usize = ctx.number(axis, "elements")?;
        let sequence: usize = match axis.child("sequence_number") {
            Some(_) => ctx.number(axis, "sequence_number")?,
            None => i + 1,
        };
        axes.push((sequence, elements));
    }
    if axes.is_empty() {
        return Err(ctx.error("array declares no <Axis_Array>"));
    }
    if el.child("axes").is_some() {
        let declared: usize = ctx.number(el, "axes")?;
        if declared != axes.len() {
            return Err(ctx.error(format!(
                "<axes> says {declared} but {} <Axis_Array> are present",
                axes.len()
            )));
        }
    }
    axes.sort_by_key(|(sequence, _)| *sequence);
    Ok(PayloadLayout::Array {
        element,
        shape: axes.into_iter().map(|(_, n)| n).collect(),
    })
}

fn table_layout(ctx: &DescriptorContext<'_>, el: &Element) -> Result<PayloadLayout, LabelError> {
    let records: usize = ctx.number(el, "records")?;
    let record = el
        .child("Record_Binary")
        .ok_or_else(|| ctx.error("table has no <Record_Binary>"))?;
    let record_length: usize = ctx.number(record, "record_length")?;
    if record.child("Group_Field_Binary").is_some() {
        return Err(ctx.error("grouped fields are not supported"));
    }

    let mut fields = Vec::new();
    for field in record.children_named("Field_Binary") {
        let name = ctx.required(field, "name")?.to_string();
        let location: usize = ctx.number(field, "field_location")?;
        let location = location
            .checked_sub(1)
            .ok_or_else(|| ctx.error(format!("field '{name}' has location 0")))?;
        let element = ctx.element_type(ctx.required(field, "data_type")?)?;
        let length: usize = ctx.number(field, "field_length")?;
        if let Some(width) = element.width() {
            if width != length {
                return Err(ctx.error(format!(
                    "field '{name}' is {length} bytes but {element} needs {width}"
                )));
            }
        }
        if location
            .checked_add(length)
            .map_or(true, |end| end > record_length)
        {
            return Err(ctx.error(format!(
                "field '{name}' ends past the {record_length}-byte record"
            )));
        }
        fields.push(FieldDescriptor {
            name,
            location,
            element,
            length,
        });
    }
    if fields.is_empty() {
        return Err(ctx.error("table declares no <Field_Binary>"));
    }
    Ok(PayloadLayout::Table {
        records,
        record_length,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Endian;

    const LABEL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Product_Observational xmlns="http://pds.nasa.gov/pds4/pds/v1"
    xmlns:msn="http://pds.nasa.gov/pds4/mission/msn/v1"
    xmlns:geom="http://pds.nasa.gov/pds4/geom/v1">
  <Identification_Area>
    <logical_identifier>urn:esa:psa:test:data_raw:frame_0001</logical_identifier>
    <version_id>1.0</version_id>
    <title>Frame &amp; friends</title>
    <product_class>Product_Observational</product_class>
  </Identification_Area>
  <Observation_Area>
    <comment/>
    <Mission_Area>
      <msn:Mission_Information>
        <msn:product_type_name>image-frame</msn:product_type_name>
      </msn:Mission_Information>
      <geom:Motion_Counter_Index>
        <geom:index_id>MAST/TILT</geom:index_id>
        <geom:index_value_number>7</geom:index_value_number>
      </geom:Motion_Counter_Index>
      <geom:Motion_Counter_Index>
        <geom:index_id>MAST/PTU</geom:index_id>
        <geom:index_value_number>12</geom:index_value_number>
      </geom:Motion_Counter_Index>
    </Mission_Area>
  </Observation_Area>
  <File_Area_Observational>
    <File><file_name>frame_0001.dat</file_name></File>
    <Array_2D_Image>
      <local_identifier>image</local_identifier>
      <offset unit="byte">0</offset>
      <axes>2</axes>
      <Element_Array><data_type>UnsignedMSB2</data_type></Element_Array>
      <Axis_Array><axis_name>Sample</axis_name><elements>6</elements><sequence_number>2</sequence_number></Axis_Array>
      <Axis_Array><axis_name>Line</axis_name><elements>4</elements><sequence_number>1</sequence_number></Axis_Array>
    </Array_2D_Image>
    <Table_Binary>
      <local_identifier>hk</local_identifier>
      <offset unit="byte">48</offset>
      <records>3</records>
      <Record_Binary>
        <fields>2</fields>
        <groups>0</groups>
        <record_length unit="byte">10</record_length>
        <Field_Binary><name>time</name><field_location unit="byte">1</field_location><data_type>IEEE754MSBDouble</data_type><field_length unit="byte">8</field_length></Field_Binary>
        <Field_Binary><name>id</name><field_location unit="byte">9</field_location><data_type>ASCII_String</data_type><field_length unit="byte">2</field_length></Field_Binary>
      </Record_Binary>
    </Table_Binary>
  </File_Area_Observational>
</Product_Observational>
"#;

    fn label() -> XmlLabel {
        XmlLabel::parse_str(LABEL, Path::new("frame_0001.xml")).unwrap()
    }

    #[test]
    fn test_get_field_ignores_prefixes_and_unescapes() {
        let l = label();
        assert_eq!(l.root_name(), "Product_Observational");
        assert_eq!(
            l.get_field("pds:Identification_Area/pds:logical_identifier"),
            Some("urn:esa:psa:test:data_raw:frame_0001")
        );
        assert_eq!(l.get_field("title"), Some("Frame & friends"));
        assert_eq!(l.get_field("msn:product_type_name"), Some("image-frame"));
        assert_eq!(l.get_field("no_such_field"), None);
    }

    #[test]
    fn test_present_but_empty_field() {
        assert_eq!(label().get_field("Observation_Area/comment"), Some(""));
    }

    #[test]
    fn test_anchored_paths() {
        let l = label();
        assert_eq!(
            l.get_field("/Product_Observational/Identification_Area/version_id"),
            Some("1.0")
        );
        assert_eq!(l.get_field("/Identification_Area/version_id"), None);
    }

    #[test]
    fn test_predicate_selects_matching_sibling() {
        let l = label();
        assert_eq!(
            l.get_field("Motion_Counter_Index[index_id='MAST/PTU']/index_value_number"),
            Some("12")
        );
        assert_eq!(l.get_all("Motion_Counter_Index/index_id"), vec!["MAST/TILT", "MAST/PTU"]);
    }

    #[test]
    fn test_descriptors() {
        let l = label();
        let descs = l.list_payload_descriptors();
        assert_eq!(descs.len(), 2);

        assert_eq!(descs[0].slot, "image");
        assert_eq!(descs[0].file, PathBuf::from("frame_0001.dat"));
        assert_eq!(
            descs[0].layout,
            PayloadLayout::Array {
                element: ElementType::UInt16(Endian::Big),
                shape: vec![4, 6],
            }
        );

        assert_eq!(descs[1].slot, "hk");
        assert_eq!(descs[1].offset, 48);
        match &descs[1].layout {
            PayloadLayout::Table {
                records,
                record_length,
                fields,
            } => {
                assert_eq!((*records, *record_length), (3, 10));
                assert_eq!(fields[1].location, 8);
                assert_eq!(fields[1].element, ElementType::Ascii);
            }
            other => panic!("unexpected layout {other:?}"),
        }
    }

    #[test]
    fn test_truncated_document_is_malformed() {
        let cut = &LABEL[..LABEL.find("<Observation_Area>").unwrap()];
        let err = XmlLabel::parse_str(cut, Path::new("cut.xml")).unwrap_err();
        assert!(matches!(err, LabelError::Malformed { .. }), "{err}");
    }

    #[test]
    fn test_mismatched_tags_are_malformed() {
        let err = XmlLabel::parse_str("<a><b></a></b>", Path::new("bad.xml")).unwrap_err();
        assert!(matches!(err, LabelError::Malformed { .. }), "{err}");
    }

    #[test]
    fn test_unsupported_data_type_is_descriptor_error() {
        let text = LABEL.replace("UnsignedMSB2", "ComplexMSB16");
        let err = XmlLabel::parse_str(&text, Path::new("x.xml")).unwrap_err();
        assert!(
            matches!(err, LabelError::Descriptor { ref slot, .. } if slot == "image"),
            "{err}"
        );
    }

    #[test]
    fn test_field_overrunning_record_is_descriptor_error() {
        let text = LABEL.replace(
            r#"<record_length unit="byte">10</record_length>"#,
            r#"<record_length unit="byte">9</record_length>"#,
        );
        let err = XmlLabel::parse_str(&text, Path::new("x.xml")).unwrap_err();
        assert!(matches!(err, LabelError::Descriptor { .. }), "{err}");
    }

    #[test]
    fn test_huge_field_location_is_descriptor_error() {
        let text = LABEL.replace(
            r#"<field_location unit="byte">9</field_location>"#,
            r#"<field_location unit="byte">18446744073709551615</field_location>"#,
        );
        let err = XmlLabel::parse_str(&text, Path::new("x.xml")).unwrap_err();
        assert!(
            matches!(err, LabelError::Descriptor { ref slot, .. } if slot == "hk"),
            "{err}"
        );
    }

    #[test]
    fn test_duplicate_slot_is_descriptor_error() {
        let text = LABEL.replace("<local_identifier>hk</local_identifier>", "<local_identifier>image</local_identifier>");
        let err = XmlLabel::parse_str(&text, Path::new("x.xml")).unwrap_err();
        assert!(matches!(err, LabelError::Descriptor { .. }), "{err}");
    }
}
