/*!
 * Dataset directory layout
 *
 * ```text
 * <root>/
 *   meta/   *.bin manifests naming every object
 *   data/   pulled objects, at their object name
 *   temp/   in-flight part files, renamed into data/ when complete
 *   logs/   log files
 * ```
 */

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ShardlineError};

pub const META_DIR: &str = "meta";
pub const DATA_DIR: &str = "data";
pub const TEMP_DIR: &str = "temp";
pub const LOG_DIR: &str = "logs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    /// Create `data/` and `temp/` if missing
    pub fn ensure_transfer_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.temp_dir())?;
        Ok(())
    }

    /// Final location of a pulled object
    pub fn pull_target(&self, name: &str) -> Result<PathBuf> {
        Ok(self.data_dir().join(checked_relative(name)?))
    }

    /// Local file a push job uploads
    pub fn push_source(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_relative(name)?))
    }

    /// Staging file for a single-part pull
    pub fn staging_path(&self, name: &str) -> Result<PathBuf> {
        self.temp_with_suffix(name, ".part")
    }

    /// Part file `idx` of a multi-part pull
    pub fn part_path(&self, name: &str, idx: u64) -> Result<PathBuf> {
        self.temp_with_suffix(name, &format!(".{}.part", idx))
    }

    /// Concatenation target before the final rename
    pub fn merge_path(&self, name: &str) -> Result<PathBuf> {
        self.temp_with_suffix(name, ".merge")
    }

    fn temp_with_suffix(&self, name: &str, suffix: &str) -> Result<PathBuf> {
        let relative = checked_relative(name)?;
        let mut file_name: OsString = relative
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| ShardlineError::InvalidName(name.to_string()))?;
        file_name.push(suffix);
        Ok(self.temp_dir().join(relative.with_file_name(file_name)))
    }
}

/// Map an object name to a relative path confined to its base directory
///
/// Absolute paths, `..` components and empty names are rejected.
pub fn checked_relative(name: &str) -> Result<PathBuf> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ShardlineError::InvalidName(name.to_string()));
    }

    let mut out = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ShardlineError::InvalidName(name.to_string()));
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(ShardlineError::InvalidName(name.to_string()));
    }
    Ok(out)
}
