//! Field path syntax used by [`LabelAccessor::get_field`].
//!
//! ```text
//! Identification_Area/logical_identifier          anywhere in the document
//! /Product_Observational/Identification_Area/...  anchored at the root
//! pds:Identification_Area/pds:version_id          prefixes are ignored
//! Motion_Counter_Index[index_id='MAST/PTU']/index_value_number
//! ```
//!
//! [`LabelAccessor::get_field`]: super::LabelAccessor::get_field

/// One `/`-separated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Element local name.
    pub name: String,
    /// Optional `[child='value']` filter.
    pub predicate: Option<(String, String)>,
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// Match from the document root rather than anywhere.
    pub anchored: bool,
    pub steps: Vec<Step>,
}

impl FieldPath {
    /// Parse a path. Returns `None` for an empty or syntactically invalid path.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim();
        let (anchored, rest) = if let Some(rest) = path.strip_prefix(".//") {
            (false, rest)
        } else if let Some(rest) = path.strip_prefix("//") {
            (false, rest)
        } else if let Some(rest) = path.strip_prefix('/') {
            (true, rest)
        } else {
            (false, path)
        };

        let steps = split_steps(rest)?
            .into_iter()
            .map(parse_step)
            .collect::<Option<Vec<_>>>()?;
        if steps.is_empty() {
            return None;
        }
        Some(FieldPath { anchored, steps })
    }
}

/// Strip an XML namespace prefix.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

// Split on '/' outside of brackets, so predicate values may contain slashes.
fn split_steps(s: &str) -> Option<Vec<&str>> {
    let mut steps = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            '/' if depth == 0 => {
                steps.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    steps.push(&s[start..]);
    Some(steps)
}

fn parse_step(raw: &str) -> Option<Step> {
    let raw = raw.trim();
    let (name, predicate) = match raw.find('[') {
        None => (raw, None),
        Some(open) => {
            let inner = raw[open + 1..].strip_suffix(']')?;
            let (child, value) = inner.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))?;
            let child = local_name(child.trim());
            if child.is_empty() {
                return None;
            }
            (&raw[..open], Some((child.to_string(), value.to_string())))
        }
    };
    let name = local_name(name.trim());
    if name.is_empty() {
        return None;
    }
    Some(Step {
        name: name.to_string(),
        predicate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_path() {
        let p = FieldPath::parse("pds:Identification_Area/pds:logical_identifier").unwrap();
        assert!(!p.anchored);
        let names: Vec<_> = p.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Identification_Area", "logical_identifier"]);
    }

    #[test]
    fn test_parse_anchored_and_descendant_prefixes() {
        assert!(FieldPath::parse("/Product_Observational").unwrap().anchored);
        assert!(!FieldPath::parse(".//Time_Coordinates").unwrap().anchored);
        assert!(!FieldPath::parse("//Time_Coordinates").unwrap().anchored);
    }

    #[test]
    fn test_parse_predicate_with_slash_in_value() {
        let p = FieldPath::parse(
            ".//geom:Motion_Counter_Index[geom:index_id='MAST/PTU']/geom:index_value_number",
        )
        .unwrap();
        assert_eq!(p.steps.len(), 2);
        assert_eq!(
            p.steps[0].predicate,
            Some(("index_id".to_string(), "MAST/PTU".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_invalid_paths() {
        assert!(FieldPath::parse("").is_none());
        assert!(FieldPath::parse("a//b").is_none());
        assert!(FieldPath::parse("a[b='c'").is_none());
        assert!(FieldPath::parse("a[b=c]").is_none());
    }
}
