use std::fs;
use std::path::Path;

use crate::Result;

/// Mirrors a node's config blob to its on-disk location. The current
/// contents are read first and the file rewritten only when they differ, so
/// an up-to-date file is never touched. The file must already exist: this
/// mirrors a config file laid down at install time, it does not create one.
/// Returns whether the file was rewritten.
pub fn write_if_changed(path: &Path, data: &[u8]) -> Result<bool> {
    let current = fs::read(path)?;
    if current == data {
        return Ok(false);
    }
    fs::write(path, data)?;
    Ok(true)
}
