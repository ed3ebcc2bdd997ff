use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::IdentityError;
use crate::label::LabelAccessor;

pub const LID_FIELD: &str = "Identification_Area/logical_identifier";
pub const VID_FIELD: &str = "Identification_Area/version_id";

/// Identifying key of a product: its logical identifier plus version (a PDS4
/// LIDVID), rendered as `lid::vid`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductKey {
    lid: String,
    vid: String,
}

impl ProductKey {
    pub fn new(lid: impl Into<String>, vid: impl Into<String>) -> Self {
        Self {
            lid: lid.into(),
            vid: vid.into(),
        }
    }

    /// Derive the key from the identity-bearing fields of a label.
    pub fn from_label(label: &dyn LabelAccessor, path: &Path) -> Result<Self, IdentityError> {
        let field = |name: &'static str, field_path: &'static str| {
            label
                .get_field(field_path)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| IdentityError::MissingField {
                    path: path.to_path_buf(),
                    field: name,
                })
        };
        let lid = field("logical_identifier", LID_FIELD)?;
        let vid = field("version_id", VID_FIELD)?;
        Ok(Self::new(lid, vid))
    }

    pub fn lid(&self) -> &str {
        &self.lid
    }

    pub fn vid(&self) -> &str {
        &self.vid
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.lid, self.vid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a LIDVID of the form <lid>::<vid>")]
pub struct ParseKeyError(String);

impl FromStr for ProductKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once("::") {
            Some((lid, vid)) if !lid.is_empty() && !vid.is_empty() => Ok(Self::new(lid, vid)),
            _ => Err(ParseKeyError(s.to_string())),
        }
    }
}

impl Serialize for ProductKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::xml::XmlLabel;

    #[test]
    fn test_display_and_parse() {
        let key = ProductKey::new("urn:esa:psa:x:data_raw:a", "1.0");
        assert_eq!(key.to_string(), "urn:esa:psa:x:data_raw:a::1.0");
        assert_eq!(key.to_string().parse::<ProductKey>().unwrap(), key);
        assert!("no-separator".parse::<ProductKey>().is_err());
        assert!("lid::".parse::<ProductKey>().is_err());
    }

    #[test]
    fn test_from_label_requires_both_fields() {
        let path = Path::new("p.xml");
        let full = XmlLabel::parse_str(
            "<P><Identification_Area><logical_identifier>urn:a</logical_identifier>\
             <version_id>2.1</version_id></Identification_Area></P>",
            path,
        )
        .unwrap();
        assert_eq!(
            ProductKey::from_label(&full, path).unwrap(),
            ProductKey::new("urn:a", "2.1")
        );

        let no_vid = XmlLabel::parse_str(
            "<P><Identification_Area><logical_identifier>urn:a</logical_identifier>\
             <version_id/></Identification_Area></P>",
            path,
        )
        .unwrap();
        let err = ProductKey::from_label(&no_vid, path).unwrap_err();
        assert!(matches!(
            err,
            IdentityError::MissingField {
                field: "version_id",
                ..
            }
        ));
    }
}
