//! Installed toolchain records.
//!
//! Toolchain discovery lives outside this crate; callers hand in the records
//! they found and the session picks the one whose developer directory is
//! exported to the launcher as `DEVELOPER_DIR`.

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable the launcher reads to locate the toolchain.
pub const DEVELOPER_DIR_ENV: &str = "DEVELOPER_DIR";

/// One installed Xcode (or command line tools) installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    /// Marketing version, e.g. `"15.2"`.
    pub version: String,

    /// The `Contents/Developer` directory of the installation.
    pub developer_dir: PathBuf,

    /// Whether this is the system's currently selected toolchain.
    #[serde(default)]
    pub selected: bool,
}

impl Toolchain {
    pub fn new(version: impl Into<String>, developer_dir: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            developer_dir: developer_dir.into(),
            selected: false,
        }
    }
}

/// Picks the selected toolchain, or else the one with the highest version.
pub fn select(toolchains: &[Toolchain]) -> Option<&Toolchain> {
    toolchains
        .iter()
        .find(|t| t.selected)
        .or_else(|| {
            toolchains
                .iter()
                .max_by(|a, b| compare_versions(&a.version, &b.version))
        })
}

/// Compares dotted version strings numerically (`"9.4" < "15.0"`).
///
/// Non-numeric components compare as zero; missing components are zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}
