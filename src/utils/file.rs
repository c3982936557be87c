use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Result};

/// Last path component of an output prefix, so run logs land flat in the log directory
/// even when the prefix points elsewhere.
pub fn prefix_stem(prefix: &str) -> String {
    Path::new(prefix)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| prefix.to_string())
}

/// Creates (truncating) a final output file, creating missing parent directories first.
///
/// # Arguments
///
/// * `path` - Destination of a sink.
///
/// # Returns
/// File handle ready to be handed to a child as stdout.
pub fn create_output_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create directory {}: {}", parent.display(), e))?;
        }
    }
    File::create(path).map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))
}
