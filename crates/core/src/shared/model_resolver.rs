use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ModelLocation;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configured model file does not exist: {0}")]
    MissingFile(PathBuf),
    #[error("model {0} is not cached and no download URL is configured")]
    NotAvailable(String),
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Resolve a model file, checking local locations before downloading.
///
/// Resolution order:
/// 1. Explicit path from configuration (must exist)
/// 2. User cache directory (platform-specific)
/// 3. Bundled directory
/// 4. Download from the configured URL into the cache
pub fn resolve(
    location: &ModelLocation,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    resolve_in(&model_cache_dir()?, location, progress)
}

fn resolve_in(
    cache_dir: &Path,
    location: &ModelLocation,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = &location.path {
        return if path.exists() {
            Ok(path.clone())
        } else {
            Err(ModelResolveError::MissingFile(path.clone()))
        };
    }

    let cached_path = cache_dir.join(&location.name);
    if cached_path.exists() {
        return Ok(cached_path);
    }

    if let Some(dir) = &location.bundled_dir {
        let bundled_path = dir.join(&location.name);
        if bundled_path.exists() {
            return Ok(bundled_path);
        }
    }

    let Some(url) = &location.url else {
        return Err(ModelResolveError::NotAvailable(location.name.clone()));
    };
    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading model {} from {url}", location.name);
    download(url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/HerdWatch/models/`
/// - Linux: `$XDG_CACHE_HOME/HerdWatch/models/` or `~/.cache/HerdWatch/models/`
/// - Windows: `%LOCALAPPDATA%/HerdWatch/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("HerdWatch").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("HerdWatch").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

/// Streams `url` into `<dest>.part` and renames it into place, so an
/// interrupted download never leaves a truncated model behind.
fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");
    let result = download_to(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_to(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ModelResolveError::Write { path, source }
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut file = fs::File::create(temp_path).map_err(write_err(temp_path))?;

    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err(temp_path))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err(temp_path))?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }
    file.flush().map_err(write_err(temp_path))?;
    drop(file);

    fs::rename(temp_path, dest).map_err(write_err(dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn location(name: &str) -> ModelLocation {
        ModelLocation {
            name: name.to_string(),
            path: None,
            url: None,
            bundled_dir: None,
        }
    }

    #[test]
    fn test_explicit_path_wins() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("custom.onnx");
        fs::write(&explicit, b"model").unwrap();
        let loc = ModelLocation {
            path: Some(explicit.clone()),
            ..location("model.onnx")
        };
        assert_eq!(resolve_in(tmp.path(), &loc, None).unwrap(), explicit);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let loc = ModelLocation {
            path: Some(tmp.path().join("nope.onnx")),
            ..location("model.onnx")
        };
        assert!(matches!(
            resolve_in(tmp.path(), &loc, None),
            Err(ModelResolveError::MissingFile(_))
        ));
    }

    #[test]
    fn test_cached_file_is_found() {
        let cache = TempDir::new().unwrap();
        let cached = cache.path().join("model.onnx");
        fs::write(&cached, b"cached").unwrap();
        assert_eq!(
            resolve_in(cache.path(), &location("model.onnx"), None).unwrap(),
            cached
        );
    }

    #[test]
    fn test_bundled_file_is_found_when_not_cached() {
        let cache = TempDir::new().unwrap();
        let bundled = TempDir::new().unwrap();
        let bundled_path = bundled.path().join("model.onnx");
        fs::write(&bundled_path, b"bundled").unwrap();
        let loc = ModelLocation {
            bundled_dir: Some(bundled.path().to_path_buf()),
            ..location("model.onnx")
        };
        assert_eq!(resolve_in(cache.path(), &loc, None).unwrap(), bundled_path);
    }

    #[test]
    fn test_no_url_and_no_local_copy_is_not_available() {
        let cache = TempDir::new().unwrap();
        assert!(matches!(
            resolve_in(cache.path(), &location("model.onnx"), None),
            Err(ModelResolveError::NotAvailable(name)) if name == "model.onnx"
        ));
    }

    #[test]
    fn test_model_cache_dir_is_namespaced() {
        let path = model_cache_dir().unwrap();
        assert!(path.to_string_lossy().contains("HerdWatch"));
        assert!(path.ends_with("models"));
    }

    #[test]
    fn test_failed_download_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("model.onnx");
        let result = download("http://invalid.nonexistent.example.com/model", &dest, None);
        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("part").exists());
    }
}
