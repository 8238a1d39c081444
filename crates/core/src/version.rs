//! Version file naming
//!
//! Every backup of `dir/report.txt` lands in `dir/report.txt_versions/` as
//! `report_<YYYYMMDD_HHMMSS.ffffff>.txt`. The timestamp is UTC, fixed-width
//! and most-significant-first, so sorting names sorts versions by age.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// chrono format of the embedded timestamp
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S%.6f";

/// Rendered width of [`STAMP_FORMAT`]
pub const STAMP_LEN: usize = 22;

/// Suffix appended to a relative path to form its version directory
pub const VERSIONS_SUFFIX: &str = "_versions";

/// Directory holding every version of the file at `relative` (relative to the
/// source root)
pub fn version_dir(backup_root: &Path, relative: &Path) -> PathBuf {
    let mut dir = backup_root.join(relative).into_os_string();
    dir.push(VERSIONS_SUFFIX);
    PathBuf::from(dir)
}

/// Render a timestamp the way it appears in version file names
pub fn format_stamp(at: &DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

/// Naming scheme for the versions of one logical file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionName {
    stem: String,
    ext: Option<String>,
}

impl VersionName {
    /// Derive the naming scheme from a source path's file name
    pub fn for_path(path: &Path) -> Option<Self> {
        path.file_name()?;
        let stem = path.file_stem()?.to_string_lossy().into_owned();
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
        Some(Self { stem, ext })
    }

    /// File name of the version taken at `at`
    pub fn file_name(&self, at: &DateTime<Utc>) -> String {
        let mut name = format!("{}_{}", self.stem, format_stamp(at));
        if let Some(ext) = &self.ext {
            name.push('.');
            name.push_str(ext);
        }
        name
    }

    /// Parse the timestamp out of a candidate file name.
    ///
    /// Returns `None` unless `file_name` is exactly `<stem>_<stamp><.ext>`,
    /// so wildcard characters in the stem cannot pull in unrelated files.
    pub fn parse(&self, file_name: &str) -> Option<NaiveDateTime> {
        let rest = file_name.strip_prefix(self.stem.as_str())?.strip_prefix('_')?;
        let stamp = match &self.ext {
            Some(ext) => rest.strip_suffix(ext.as_str())?.strip_suffix('.')?,
            None => rest,
        };
        if stamp.len() != STAMP_LEN {
            return None;
        }
        NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
    }
}

/// One retained backup artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFile {
    pub path: PathBuf,
    pub taken_at: NaiveDateTime,
}

impl VersionFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Ord for VersionFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.file_name().cmp(&other.file_name())
    }
}

impl PartialOrd for VersionFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
