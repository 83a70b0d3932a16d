//! Persistent camera list.
//!
//! Cameras are stored as a JSON array in `<data_dir>/cameras.json`. Writes
//! go to a sibling temp file that is renamed over the target, so a failed
//! save leaves the previous list intact.

use crate::camera::CameraConfig;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const CAMERAS_FILE: &str = "cameras.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no data directory available")]
    NoDataDir,
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize camera list: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Default data directory: `<data_local_dir>/camwatch`.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .map(|d| d.join("camwatch"))
}

/// File-backed camera list.
#[derive(Debug, Clone)]
pub struct CameraStore {
    path: PathBuf,
}

impl CameraStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(CAMERAS_FILE),
        }
    }

    pub fn at_default_location() -> Result<Self, StoreError> {
        default_data_dir()
            .map(Self::new)
            .ok_or(StoreError::NoDataDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the camera list. A missing or empty file is an empty list.
    pub fn load(&self) -> Result<Vec<CameraConfig>, StoreError> {
        if !self.path.exists() {
            tracing::debug!("No camera file at {:?}, starting empty", self.path);
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let cameras: Vec<CameraConfig> =
            serde_json::from_str(&content).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!("Loaded {} cameras from {:?}", cameras.len(), self.path);
        Ok(cameras)
    }

    /// Replace the stored list.
    pub fn save(&self, cameras: &[CameraConfig]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(cameras)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let written = write_private(&tmp, json.as_bytes()).and_then(|_| fs::rename(&tmp, &self.path));
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Write {
                path: self.path.clone(),
                source,
            });
        }

        tracing::debug!("Saved {} cameras to {:?}", cameras.len(), self.path);
        Ok(())
    }

    /// Insert or replace (by name) one camera and save.
    pub fn upsert(&self, camera: CameraConfig) -> Result<Vec<CameraConfig>, StoreError> {
        let mut cameras = self.load()?;
        match cameras.iter_mut().find(|c| c.name == camera.name) {
            Some(existing) => *existing = camera,
            None => cameras.push(camera),
        }
        self.save(&cameras)?;
        Ok(cameras)
    }

    /// Remove a camera by name and save. Returns the removed camera, if any.
    pub fn remove(&self, name: &str) -> Result<Option<CameraConfig>, StoreError> {
        let mut cameras = self.load()?;
        let Some(index) = cameras.iter().position(|c| c.name == name) else {
            return Ok(None);
        };
        let removed = cameras.remove(index);
        self.save(&cameras)?;
        Ok(Some(removed))
    }
}

/// Write `data` to `path`, readable only by the owner on Unix.
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    #[cfg(unix)]
    let mut file = {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?
    };

    #[cfg(not(unix))]
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraBrand;

    fn temp_store() -> (CameraStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("camwatch-store-{}", uuid::Uuid::new_v4()));
        (CameraStore::new(&dir), dir)
    }

    fn cam(name: &str, ip: &str) -> CameraConfig {
        CameraConfig::new(name, CameraBrand::Hikvision, ip, 8000).with_credentials("admin", "secret")
    }

    #[test]
    fn test_missing_and_empty_files_load_empty() {
        let (store, dir) = temp_store();
        assert!(store.load().unwrap().is_empty());

        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path(), "  \n").unwrap();
        assert!(store.load().unwrap().is_empty());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_save_then_load() {
        let (store, dir) = temp_store();
        let cameras = vec![cam("Gate", "10.0.0.5"), cam("Yard", "10.0.0.6").with_location("North")];

        store.save(&cameras).unwrap();
        assert_eq!(store.load().unwrap(), cameras);
        assert!(!store.path().with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_malformed_file_is_an_error_and_untouched() {
        let (store, dir) = temp_store();
        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path(), "[{\"ip\": ").unwrap();

        assert!(matches!(store.load(), Err(StoreError::Parse { .. })));
        assert!(matches!(
            store.upsert(cam("Gate", "10.0.0.5")),
            Err(StoreError::Parse { .. })
        ));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "[{\"ip\": ");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_loads_loose_legacy_rows() {
        let (store, dir) = temp_store();
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            store.path(),
            r#"[{"name": "Old", "ip": "192.168.1.64", "port": "8000", "brand": "Hikvision", "channel": "2", "rtsp_url": "ignored"}]"#,
        )
        .unwrap();

        let cameras = store.load().unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(
            cameras[0].stream_url(),
            "rtsp://admin:@192.168.1.64:8000/Streaming/Channels/2"
        );

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_upsert_and_remove() {
        let (store, dir) = temp_store();
        store.upsert(cam("Gate", "10.0.0.5")).unwrap();
        store.upsert(cam("Yard", "10.0.0.6")).unwrap();
        let updated = store.upsert(cam("Gate", "10.0.0.50")).unwrap();

        assert_eq!(updated.len(), 2);
        assert_eq!(updated[0].ip, "10.0.0.50");

        let removed = store.remove("Gate").unwrap();
        assert_eq!(removed.map(|c| c.ip), Some("10.0.0.50".to_string()));
        assert!(store.remove("Gate").unwrap().is_none());
        assert_eq!(store.load().unwrap().len(), 1);

        fs::remove_dir_all(dir).unwrap();
    }
}
