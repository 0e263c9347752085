use crate::error::{CleanupError, HandlerError};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MAX_FORMAT_LEN: usize = 8;

/// Local copy of an invocation's input image.
///
/// The path is unique per invocation. The file, if it was ever created, is
/// removed when the guard is closed or dropped, whichever comes first.
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: PathBuf,
    stem: String,
    released: bool,
}

impl TemporaryArtifact {
    /// Reserves `<work_dir>/in-<uuid>.<format>` without creating the file.
    pub fn allocate(work_dir: &Path, format: &str) -> Result<Self, HandlerError> {
        validate_format(format)?;
        let stem = format!("in-{}", Uuid::new_v4());
        let path = work_dir.join(format!("{}.{}", stem, format));
        Ok(Self {
            path,
            stem,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without extension, shared by every output of the invocation.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn close(mut self) -> Result<(), CleanupError> {
        self.released = true;
        remove_if_exists(&self.path)
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_if_exists(&self.path) {
            tracing::warn!("{}", e);
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), CleanupError> {
    if !path.exists() {
        return Ok(());
    }
    std::fs::remove_file(path).map_err(|source| CleanupError {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!("Removed temporary artifact {:?}", path);
    Ok(())
}

fn validate_format(format: &str) -> Result<(), HandlerError> {
    let valid = !format.is_empty()
        && format.len() <= MAX_FORMAT_LEN
        && format.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(HandlerError::InvalidTask(format!(
            "unsupported image format `{}`",
            format
        )))
    }
}
