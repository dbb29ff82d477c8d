//! Mirroring each deployment's source tree into a backup directory.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use log::{debug, error, info, warn};

use crate::error::{BerthError, Result};
use crate::types::Registry;

/// Copies a directory tree into another directory.
pub trait DirectoryMirror {
    fn mirror(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// Runs an external sync tool (`rsync -Cravz` by default) as
/// `<program> <args...> <source>/ <destination>`.
#[derive(Debug, Clone)]
pub struct SyncCommand {
    program: String,
    args: Vec<String>,
}

impl SyncCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl DirectoryMirror for SyncCommand {
    fn mirror(&self, source: &Path, destination: &Path) -> Result<()> {
        // Trailing slash: copy the contents, not the directory itself.
        let mut from = source.as_os_str().to_owned();
        from.push("/");

        debug!(
            "Running {} {:?} {:?} {}",
            self.program,
            self.args,
            from,
            destination.display()
        );
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&from)
            .arg(destination)
            .status()
            .map_err(|e| BerthError::io(&self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(BerthError::SyncFailed {
                from: source.to_path_buf(),
                to: destination.to_path_buf(),
                reason: format!("{} exited with {}", self.program, status),
            })
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub synced: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl BackupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Mirrors every record's `path` into `destination_base/<name>`.
///
/// Records without a path, or whose path is gone, are skipped. A failing
/// record is logged and the rest still run.
pub fn run(registry: &Registry, destination_base: &Path, mirror: &impl DirectoryMirror) -> BackupReport {
    let mut report = BackupReport::default();

    for record in registry.iter() {
        let Some(destination) = destination_for(destination_base, &record.name) else {
            error!(
                "Refusing to back up {:?}: name is not a single path component",
                record.name
            );
            report.failed.push(record.name.clone());
            continue;
        };

        let Some(path) = record.path.as_ref() else {
            warn!("Skipping {}: no source path recorded", record.name);
            report.skipped.push(record.name.clone());
            continue;
        };

        let source = match fs::canonicalize(path) {
            Ok(source) if source.is_dir() => source,
            Ok(_) => {
                warn!(
                    "Skipping {}: source path {} is not a directory",
                    record.name,
                    path.display()
                );
                report.skipped.push(record.name.clone());
                continue;
            }
            Err(e) => {
                warn!(
                    "Skipping {}: source path {} is unusable: {}",
                    record.name,
                    path.display(),
                    e
                );
                report.skipped.push(record.name.clone());
                continue;
            }
        };

        if let Err(e) = fs::create_dir_all(&destination) {
            error!(
                "Failed to create backup directory {} for {}: {}",
                destination.display(),
                record.name,
                e
            );
            report.failed.push(record.name.clone());
            continue;
        }

        match mirror.mirror(&source, &destination) {
            Ok(()) => {
                info!(
                    "Backed up {}: {} -> {}",
                    record.name,
                    source.display(),
                    destination.display()
                );
                report.synced.push(record.name.clone());
            }
            Err(e) => {
                error!("Backup of {} failed: {}", record.name, e);
                report.failed.push(record.name.clone());
            }
        }
    }

    report
}

/// `base/name`, or `None` when `name` would resolve anywhere but directly
/// inside `base`.
fn destination_for(base: &Path, name: &str) -> Option<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Some(base.join(part)),
        _ => None,
    }
}
