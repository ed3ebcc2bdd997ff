use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

// ---------------------------------------------------------------------------
// MetadataValue – a single label field, typed
// ---------------------------------------------------------------------------

/// A label field value, typed by [`MetadataValue::parse`]. Totally ordered
/// so facets can collect it into sets.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date or date-time, kept as the label's text.
    Date(String),
    /// The field is present but has no text.
    Null,
}

// Floats compare by `total_cmp`; values of different variants by variant rank.

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use MetadataValue::*;
        fn rank(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        let ra = rank(self);
        let rb = rank(other);
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Date(a), Date(b)) => match (self.as_datetime(), other.as_datetime()) {
                (Some(da), Some(db)) => da.cmp(&db).then_with(|| a.cmp(b)),
                _ => a.cmp(b),
            },
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for MetadataValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            MetadataValue::String(s) | MetadataValue::Date(s) => s.hash(state),
            MetadataValue::Integer(i) => i.hash(state),
            MetadataValue::Float(f) => f.to_bits().hash(state),
            MetadataValue::Bool(b) => b.hash(state),
            MetadataValue::Null => {}
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Date(d) => write!(f, "{d}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl MetadataValue {
    /// Interpret label text: empty → `Null`, then integer, float, boolean,
    /// ISO-8601 date, falling back to a string.
    pub fn parse(text: &str) -> Self {
        let s = text.trim();
        if s.is_empty() {
            return MetadataValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return MetadataValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return MetadataValue::Float(f);
        }
        if s == "true" || s == "false" {
            return MetadataValue::Bool(s == "true");
        }
        if parse_datetime(s).is_some() {
            return MetadataValue::Date(s.to_string());
        }
        MetadataValue::String(s.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) | MetadataValue::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Date values as UTC instants. Dates without a time are taken at midnight.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            MetadataValue::Date(s) => parse_datetime(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetadataValue::Null)
    }
}

/// Parse the date-time spellings found in PDS4 labels.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    if let Ok(dt) = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    // Day-of-year form, e.g. 2021-063T12:00:00
    if let Ok(dt) = NaiveDateTime::parse_from_str(naive, "%Y-%jT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ---------------------------------------------------------------------------
// Facets – distinct values per metadata field across a product set
// ---------------------------------------------------------------------------

/// Distinct values seen for a set of metadata fields.
#[derive(Debug, Clone, Default)]
pub struct Facets {
    /// Ordered list of field paths.
    pub fields: Vec<String>,
    /// For each field the sorted set of unique values.
    pub unique_values: BTreeMap<String, BTreeSet<MetadataValue>>,
}

impl Facets {
    /// Build facets from `(field, value)` observations. Fields with no
    /// observation still get an (empty) entry.
    pub fn from_observations<I>(fields: &[&str], observations: I) -> Self
    where
        I: IntoIterator<Item = (String, MetadataValue)>,
    {
        let mut unique_values: BTreeMap<String, BTreeSet<MetadataValue>> = fields
            .iter()
            .map(|f| (f.to_string(), BTreeSet::new()))
            .collect();
        for (field, value) in observations {
            unique_values.entry(field).or_default().insert(value);
        }
        Facets {
            fields: unique_values.keys().cloned().collect(),
            unique_values,
        }
    }

    pub fn values(&self, field: &str) -> Option<&BTreeSet<MetadataValue>> {
        self.unique_values.get(field)
    }
}
