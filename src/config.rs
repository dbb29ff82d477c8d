use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::allocator::DEFAULT_PORT_RANGE;
use crate::error::{BerthError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub registry_path: PathBuf,
    pub backup_config_path: PathBuf,
    pub port_range_start: u16,
    /// Exclusive.
    pub port_range_end: u16,
    pub default_app_root: PathBuf,
    pub sync_program: String,
    pub sync_args: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_path: "data/containers.json".into(),
            backup_config_path: "data/config.json".into(),
            port_range_start: DEFAULT_PORT_RANGE.start,
            port_range_end: DEFAULT_PORT_RANGE.end,
            default_app_root: "/srv/apps".into(),
            sync_program: "rsync".into(),
            sync_args: vec!["-Cravz".into()],
        }
    }
}

impl Settings {
    /// Defaults, then `berth.toml`, `berth.json`, an explicit `--config`
    /// file, then `BERTH_*` environment variables.
    pub fn load(extra: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("berth.toml"))
            .merge(Json::file("berth.json"));

        if let Some(path) = extra {
            if !path.is_file() {
                return Err(BerthError::MissingConfig(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }

        let settings: Settings = figment
            .merge(Env::prefixed("BERTH_"))
            .extract()
            .map_err(|e| BerthError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.port_range_start >= self.port_range_end {
            return Err(BerthError::InvalidConfig {
                path: "settings".into(),
                reason: format!(
                    "port range {}..{} is empty",
                    self.port_range_start, self.port_range_end
                ),
            });
        }
        Ok(())
    }

    pub fn port_range(&self) -> Range<u16> {
        self.port_range_start..self.port_range_end
    }
}

/// The backup config document: `{"destinationPath": "../backups"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupDocument {
    destination_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Already resolved against the document's directory.
    pub destination: PathBuf,
}

impl BackupConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BerthError::MissingConfig(path.to_path_buf()))
            }
            Err(e) => return Err(BerthError::io(path, e)),
        };

        let doc: BackupDocument =
            serde_json::from_str(&text).map_err(|e| BerthError::InvalidConfig {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let raw = doc
            .destination_path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| BerthError::InvalidConfig {
                path: path.to_path_buf(),
                reason: "destinationPath is not set".into(),
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self {
            destination: base.join(raw),
        })
    }
}
