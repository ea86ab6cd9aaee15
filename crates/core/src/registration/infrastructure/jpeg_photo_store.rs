use std::fs;
use std::path::{Path, PathBuf};

use crate::registration::domain::name_generator::sanitize_for_path;
use crate::registration::domain::photo_store::PhotoStore;
use crate::shared::clock::unix_millis;
use crate::shared::constants::PHOTO_JPEG_QUALITY;
use crate::shared::frame::Frame;
use crate::shared::BoxError;

/// Writes crops as `<name>_<unix millis>.jpg` into one directory.
pub struct JpegPhotoStore {
    dir: PathBuf,
}

impl JpegPhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unused_path(&self, stem: &str) -> PathBuf {
        let millis = unix_millis();
        let mut path = self.dir.join(format!("{stem}_{millis}.jpg"));
        let mut n = 2;
        while path.exists() {
            path = self.dir.join(format!("{stem}_{millis}_{n}.jpg"));
            n += 1;
        }
        path
    }
}

impl PhotoStore for JpegPhotoStore {
    fn save(&self, crop: &Frame, name: &str) -> Result<PathBuf, BoxError> {
        fs::create_dir_all(&self.dir)?;
        let jpeg = crop.encode_jpeg(PHOTO_JPEG_QUALITY)?;
        let path = self.unused_path(&sanitize_for_path(name));
        fs::write(&path, jpeg)?;
        log::debug!("Saved photo {}", path.display());
        Ok(path)
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            log::debug!("Could not remove unused photo {}: {e}", path.display());
        }
    }
}
