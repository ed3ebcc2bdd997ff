use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::config::CollisionPolicy;
use crate::error::Error;
use crate::product::ProductKey;

/// Outcome of one `Depot::scan`.
///
/// Per-candidate failures land in `errors`; a scan itself never fails.
#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub roots: Vec<PathBuf>,
    /// Distinct label files found under the roots.
    pub candidates: usize,
    /// Products indexed under a key the depot did not hold from that path.
    pub added: usize,
    /// Labels re-read because their file changed since the last scan.
    pub refreshed: usize,
    /// Labels skipped because path and modification time were unchanged.
    pub unchanged: usize,
    pub collisions: Vec<Collision>,
    pub errors: Vec<ScanIssue>,
    #[serde(serialize_with = "seconds")]
    pub elapsed: Duration,
}

fn seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ScanReport {
    pub(crate) fn new<P: AsRef<Path>>(roots: &[P]) -> Self {
        Self {
            roots: roots.iter().map(|r| r.as_ref().to_path_buf()).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn issue(&mut self, path: impl Into<PathBuf>, error: impl Into<Error>) {
        let issue = ScanIssue {
            path: path.into(),
            error: error.into(),
        };
        log::warn!("{}: {}; ignoring", issue.path.display(), issue.error);
        self.errors.push(issue);
    }

    /// Products added or refreshed by this scan.
    pub fn indexed(&self) -> usize {
        self.added + self.refreshed
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.collisions.is_empty()
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates: {} added, {} refreshed, {} unchanged, {} collisions, {} errors in {:.3}s",
            self.candidates,
            self.added,
            self.refreshed,
            self.unchanged,
            self.collisions.len(),
            self.errors.len(),
            self.elapsed.as_secs_f64()
        )
    }
}

/// Two labels with the same identifying key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collision {
    pub key: ProductKey,
    /// Label whose product is indexed after the scan.
    pub kept: PathBuf,
    pub discarded: PathBuf,
    pub policy: CollisionPolicy,
}

/// A candidate the scan could not index.
#[derive(Debug)]
pub struct ScanIssue {
    pub path: PathBuf,
    pub error: Error,
}

impl Serialize for ScanIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ScanIssue", 3)?;
        s.serialize_field("path", &self.path)?;
        s.serialize_field("kind", self.error.kind())?;
        s.serialize_field("message", &self.error.to_string())?;
        s.end()
    }
}
