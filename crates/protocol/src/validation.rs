use std::path::{Component, Path};

use crate::ProtocolError;

/// Validates that a destination path stays inside the upload root it is
/// joined onto.
///
/// Rejects:
/// - Empty paths and paths naming only the root itself (`.`)
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_upload_path(destination: &str) -> Result<(), ProtocolError> {
    if destination.is_empty() {
        return Err(ProtocolError::InvalidPath("empty path".into()));
    }

    let path = Path::new(destination);
    let mut named = false;

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(ProtocolError::InvalidPath(format!(
                    "parent directory traversal not allowed: {destination}"
                )));
            }
            Component::Prefix(_) => {
                return Err(ProtocolError::InvalidPath(format!(
                    "path prefix not allowed: {destination}"
                )));
            }
            Component::RootDir => {
                return Err(ProtocolError::InvalidPath(format!(
                    "absolute path not allowed: {destination}"
                )));
            }
            Component::CurDir => {}
            Component::Normal(_) => named = true,
        }
    }

    if !named {
        return Err(ProtocolError::InvalidPath(format!(
            "path does not name a file: {destination}"
        )));
    }

    Ok(())
}
