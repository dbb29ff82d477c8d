use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::Path;

use log::info;

use crate::allocator::{allocate_port, allocate_subnet, host_in_subnet, PortProbe};
use crate::descriptor;
use crate::error::{BerthError, Result};
use crate::registry::RegistryStore;
use crate::types::{is_valid_name, DeploymentRecord};

/// Creates a new deployment: allocates a port and a subnet, writes the
/// project files into `project_dir` and records it in the registry.
///
/// Nothing is saved unless every earlier step succeeded. The returned port
/// was free when probed; if the deployment later fails to bind it, provision
/// again under a new name or fix the record by hand.
pub fn provision(
    store: &RegistryStore,
    probe: &impl PortProbe,
    port_range: Range<u16>,
    name: &str,
    project_dir: &Path,
) -> Result<DeploymentRecord> {
    if !is_valid_name(name) {
        return Err(BerthError::InvalidName(name.to_string()));
    }
    let mut registry = store.load()?;
    if registry.exists_by_name(name) {
        return Err(BerthError::DuplicateName(name.to_string()));
    }

    let port = allocate_port(&registry, probe, port_range)?;
    let subnet = allocate_subnet(&registry)?;
    let (gateway, address) = host_in_subnet(&subnet, 1)
        .zip(host_in_subnet(&subnet, 2))
        .ok_or_else(|| BerthError::AllocationExhausted {
            resource: "subnet",
            detail: format!("{subnet} is not a /24"),
        })?;

    write_project_files(project_dir, name, port, &subnet, gateway)?;

    let record = DeploymentRecord {
        name: name.to_string(),
        ports: BTreeMap::from([("80/tcp".to_string(), port)]),
        ip: Some(address.to_string()),
        subnet: Some(subnet),
        path: Some(project_dir.to_path_buf()),
    };
    registry.append(record.clone())?;
    store.save(&registry)?;

    info!("Provisioned {} in {}", name, project_dir.display());
    Ok(record)
}

fn write_project_files(
    dir: &Path,
    name: &str,
    port: u16,
    subnet: &str,
    gateway: std::net::Ipv4Addr,
) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| BerthError::io(dir, e))?;

    let files = [
        (descriptor::COMPOSE_FILE, descriptor::compose(name, port, subnet, gateway), false),
        (descriptor::START_SCRIPT, descriptor::start_script(name), true),
        (descriptor::STOP_SCRIPT, descriptor::stop_script(name), true),
    ];
    for (file, contents, executable) in files {
        let path = dir.join(file);
        fs::write(&path, contents).map_err(|e| BerthError::io(&path, e))?;
        if executable {
            make_executable(&path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| BerthError::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
