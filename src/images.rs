use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image not found: {0}")]
    NotFound(PathBuf),
    #[error("Image is empty: {0}")]
    Empty(PathBuf),
    #[error("Failed to copy image: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw image bytes handed to the model runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// Copy `source` into `image_dir` under a fresh name so the entry keeps
/// its attachment even if the source file moves.
pub fn import_image(source: &Path, image_dir: &Path) -> Result<PathBuf, ImageError> {
    if !source.is_file() {
        return Err(ImageError::NotFound(source.to_path_buf()));
    }
    fs::create_dir_all(image_dir)?;

    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_lowercase();
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%f");
    let destination = image_dir.join(format!("journal_image_{}.{}", stamp, extension));

    fs::copy(source, &destination)?;
    tracing::info!("Imported image {:?} as {:?}", source, destination);
    Ok(destination)
}

/// Remove an imported copy that no entry ended up referencing
pub fn discard_image(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Discarded unused image {:?}", path),
        Err(e) => tracing::warn!("Failed to remove unused image {:?}: {}", path, e),
    }
}

/// Read an attached image for inference
pub fn load_image(path: &Path) -> Result<ImageInput, ImageError> {
    if !path.is_file() {
        return Err(ImageError::NotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Err(ImageError::Empty(path.to_path_buf()));
    }
    Ok(ImageInput {
        path: path.to_path_buf(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_copies_into_image_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Photo.PNG");
        fs::write(&source, b"pixels").unwrap();

        let image_dir = dir.path().join("images");
        let imported = import_image(&source, &image_dir).unwrap();

        assert!(imported.starts_with(&image_dir));
        assert_eq!(imported.extension().unwrap(), "png");
        assert_eq!(fs::read(&imported).unwrap(), b"pixels");
    }

    #[test]
    fn test_discard_removes_imported_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.jpg");
        fs::write(&source, b"pixels").unwrap();
        let imported = import_image(&source, &dir.path().join("images")).unwrap();

        discard_image(&imported);
        assert!(!imported.exists());
        assert!(source.exists());
    }

    #[test]
    fn test_load_rejects_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.jpg");
        assert!(matches!(load_image(&missing), Err(ImageError::NotFound(_))));

        let empty = dir.path().join("empty.jpg");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(load_image(&empty), Err(ImageError::Empty(_))));
    }
}
