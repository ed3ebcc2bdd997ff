//! Candidate enumeration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::DepotConfig;
use crate::error::LabelError;

use super::report::ScanReport;

/// Canonical paths of label files under `roots`, in walk order. Roots that
/// are themselves label files are candidates too. A file reachable twice
/// (overlapping roots, links) is listed once.
pub(crate) fn candidates<P: AsRef<Path>>(
    roots: &[P],
    config: &DepotConfig,
    extension: &str,
    report: &mut ScanReport,
) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for root in roots {
        let root = root.as_ref();
        log::debug!("scanning {}", root.display());
        let mut walker = WalkDir::new(root)
            .follow_links(config.follow_links)
            .sort_by_file_name();
        if !config.recursive {
            walker = walker.max_depth(1);
        }
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    report.issue(path, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_extension(entry.path(), extension) {
                continue;
            }
            let path = match std::fs::canonicalize(entry.path()) {
                Ok(path) => path,
                Err(source) => {
                    let path = entry.path().to_path_buf();
                    report.issue(path.clone(), LabelError::Io { path, source });
                    continue;
                }
            };
            if seen.insert(path.clone()) {
                log::trace!("candidate {}", path.display());
                out.push(path);
            }
        }
    }
    out
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_extension_match_ignores_case() {
        assert!(has_extension(Path::new("a/b.XML"), "xml"));
        assert!(has_extension(Path::new("b.xml"), "XML"));
        assert!(!has_extension(Path::new("b.xml.bak"), "xml"));
        assert!(!has_extension(Path::new("xml"), "xml"));
    }

    #[test]
    fn test_recursive_and_flat_walks() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.xml"));
        touch(&dir.path().join("a.XML"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join("sub/c.xml"));

        let mut report = ScanReport::default();
        let config = DepotConfig::default();
        let found = candidates(&[dir.path()], &config, "xml", &mut report);
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.XML", "b.xml", "c.xml"]);

        let flat = DepotConfig {
            recursive: false,
            ..DepotConfig::default()
        };
        assert_eq!(candidates(&[dir.path()], &flat, "xml", &mut report).len(), 2);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_overlapping_roots_list_files_once() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sub/c.xml"));
        let mut report = ScanReport::default();
        let roots = [dir.path().to_path_buf(), dir.path().join("sub")];
        let found = candidates(&roots, &DepotConfig::default(), "xml", &mut report);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_missing_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = ScanReport::default();
        let missing = dir.path().join("nope");
        let found = candidates(&[&missing], &DepotConfig::default(), "xml", &mut report);
        assert!(found.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].error.kind(), "walk");
    }
}
