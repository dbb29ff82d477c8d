use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::{BerthError, Result};
use crate::types::Registry;

/// The registry document on disk.
///
/// Snapshots are read and written whole. There is no locking: one invocation
/// at a time is assumed.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or blank document is an empty registry. A malformed one is
    /// an error, never silently dropped.
    pub fn load(&self) -> Result<Registry> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No registry at {}, starting empty", self.path.display());
                return Ok(Registry::new());
            }
            Err(e) => return Err(BerthError::io(&self.path, e)),
        };
        self.parse(&text)
    }

    /// Like [`load`](Self::load) but the document has to exist.
    pub fn load_required(&self) -> Result<Registry> {
        if !self.path.exists() {
            return Err(BerthError::MissingRegistry(self.path.clone()));
        }
        self.load()
    }

    /// Temp files are created owner-only; give the replacement the mode of
    /// the document it replaces, or 0644 for a new one.
    fn carry_permissions(&self, tmp: &fs::File) -> Result<()> {
        let permissions = match fs::metadata(&self.path) {
            Ok(meta) => meta.permissions(),
            Err(e) if e.kind() == ErrorKind::NotFound => default_permissions(tmp)?,
            Err(e) => return Err(BerthError::io(&self.path, e)),
        };
        tmp.set_permissions(permissions)
            .map_err(|e| BerthError::io(&self.path, e))
    }

    fn parse(&self, text: &str) -> Result<Registry> {
        if text.trim().is_empty() {
            return Ok(Registry::new());
        }
        serde_json::from_str(text).map_err(|source| BerthError::CorruptRegistry {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the document with `registry`.
    ///
    /// The snapshot goes to a temporary file next to the document and is
    /// renamed over it, so an interrupted save leaves the old document intact.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| BerthError::io(&dir, e))?;

        let mut json = serde_json::to_string_pretty(registry)?;
        json.push('\n');

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| BerthError::io(&dir, e))?;
        self.carry_permissions(tmp.as_file())?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| BerthError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| BerthError::io(&self.path, e.error))?;

        info!(
            "Saved {} record(s) to {}",
            registry.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(unix)]
fn default_permissions(_tmp: &fs::File) -> Result<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions(tmp: &fs::File) -> Result<fs::Permissions> {
    tmp.metadata()
        .map(|meta| meta.permissions())
        .map_err(|e| BerthError::io("registry temp file", e))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;
    use crate::types::DeploymentRecord;

    fn sample() -> Registry {
        let mut shop = DeploymentRecord::new("shop");
        shop.ports = BTreeMap::from([("80/tcp".to_string(), 8001)]);
        shop.ip = Some("172.16.0.2".into());
        shop.subnet = Some("172.16.0.0/24".into());
        shop.path = Some("/srv/shop".into());

        let mut blog = DeploymentRecord::new("blog");
        blog.subnet = Some("172.16.1.0/24".into());

        vec![shop, blog].into()
    }

    #[test]
    fn missing_document_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("containers.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn blank_document_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("containers.json");
        fs::write(&path, "  \n").unwrap();
        assert!(RegistryStore::new(path).load().unwrap().is_empty());
    }

    #[test]
    fn malformed_document_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("containers.json");
        fs::write(&path, "[{\"name\": \"shop\",").unwrap();
        let err = RegistryStore::new(&path).load().unwrap_err();
        assert!(matches!(err, BerthError::CorruptRegistry { .. }));
        // The corrupt file is left alone for the operator.
        assert_eq!(fs::read_to_string(&path).unwrap(), "[{\"name\": \"shop\",");
    }

    #[test]
    fn load_required_reports_missing_document() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("containers.json"));
        assert!(matches!(
            store.load_required().unwrap_err(),
            BerthError::MissingRegistry(_)
        ));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("data/containers.json"));
        let registry = sample();
        store.save(&registry).unwrap();
        assert_eq!(store.load().unwrap(), registry);
    }

    #[test]
    fn round_trip_ignores_document_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("containers.json");
        let mut records: Vec<DeploymentRecord> = sample().into();
        records.reverse();
        fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let store = RegistryStore::new(&path);
        let loaded = store.load().unwrap();
        assert_eq!(loaded, sample());
        store.save(&loaded).unwrap();
        assert_eq!(store.load().unwrap(), sample());
    }

    #[cfg(unix)]
    #[test]
    fn save_keeps_document_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("containers.json");
        fs::write(&path, "[]").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let store = RegistryStore::new(&path);
        store.save(&sample()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);

        let fresh = RegistryStore::new(dir.path().join("fresh.json"));
        fresh.save(&sample()).unwrap();
        let mode = fs::metadata(fresh.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn save_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("containers.json");
        fs::write(&path, "[]").unwrap();
        let store = RegistryStore::new(&path);
        store.save(&sample()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.load().unwrap().len(), 2);
    }
}
