use super::{ContainerDetails, ContainerRuntime, NetworkAttachment, PublishedPort};
use crate::error::{BerthError, Result};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerInspectResponse, MountPointTypeEnum};
use bollard::network::InspectNetworkOptions;
use bollard::Docker;
use log::debug;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Compose records the descriptor files a container came from in this label.
const COMPOSE_CONFIG_FILES_LABEL: &str = "com.docker.compose.project.config_files";

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon (unix socket on Linux, honouring
    /// `DOCKER_HOST`).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_active(&self) -> Result<Vec<String>> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        let mut names = Vec::with_capacity(containers.len());
        for c in containers {
            let name = c
                .names
                .as_ref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/').to_string());
            let id = c.id.as_ref().map(|s| s.to_string());
            match (name, id) {
                (Some(n), _) => names.push(n),
                (_, Some(id)) => names.push(id),
                _ => continue,
            }
        }
        debug!("Docker reports {} running container(s)", names.len());
        Ok(names)
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(detail) => Ok(Some(details_from(detail))),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(BerthError::Runtime(e)),
        }
    }

    async fn network_subnet(&self, network: &str) -> Result<Option<String>> {
        let detail = self
            .docker
            .inspect_network(network, None::<InspectNetworkOptions<String>>)
            .await?;
        let subnets: Vec<String> = detail
            .ipam
            .and_then(|ipam| ipam.config)
            .into_iter()
            .flatten()
            .filter_map(|cfg| cfg.subnet.filter(|s| !s.is_empty()))
            .collect();
        Ok(pick_subnet(subnets))
    }
}

fn details_from(detail: ContainerInspectResponse) -> ContainerDetails {
    let mut details = ContainerDetails::default();

    if let Some(settings) = detail.network_settings {
        if let Some(ports) = settings.ports {
            for (container_port, bindings) in ports {
                let host_port = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|b| b.host_port)
                    .find_map(|hp| hp.parse::<u16>().ok());
                details.ports.push(PublishedPort {
                    container_port,
                    host_port,
                });
            }
            details
                .ports
                .sort_by(|a, b| a.container_port.cmp(&b.container_port));
        }

        if let Some(networks) = settings.networks {
            for (network, endpoint) in networks {
                let ip = endpoint.ip_address.filter(|ip| !ip.is_empty());
                let subnet = ip
                    .as_deref()
                    .zip(endpoint.ip_prefix_len)
                    .and_then(|(ip, len)| network_address(ip, len));
                details.networks.push(NetworkAttachment {
                    network,
                    ip,
                    subnet,
                });
            }
            // The API hands networks back as a map; keep the choice of
            // "first attachment" stable between scans.
            details.networks.sort_by(|a, b| a.network.cmp(&b.network));
        }
    }

    for mount in detail.mounts.unwrap_or_default() {
        if mount.typ == Some(MountPointTypeEnum::BIND) {
            if let Some(source) = mount.source.filter(|s| !s.is_empty()) {
                details.bind_sources.push(PathBuf::from(source));
            }
        }
    }

    if let Some(files) = detail
        .config
        .and_then(|c| c.labels)
        .and_then(|mut labels| labels.remove(COMPOSE_CONFIG_FILES_LABEL))
    {
        details.config_files = files
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(PathBuf::from)
            .collect();
    }

    details
}

/// First IPv4 subnet, else whatever comes first (IPv6-only networks).
fn pick_subnet(subnets: Vec<String>) -> Option<String> {
    let is_v4 = |s: &String| {
        s.split_once('/')
            .is_some_and(|(addr, _)| addr.parse::<Ipv4Addr>().is_ok())
    };
    match subnets.iter().position(is_v4) {
        Some(i) => subnets.into_iter().nth(i),
        None => subnets.into_iter().next(),
    }
}

/// `172.16.3.2` with prefix 24 becomes `172.16.3.0/24`.
fn network_address(ip: &str, prefix_len: i64) -> Option<String> {
    let addr: Ipv4Addr = ip.parse().ok()?;
    if !(1..=32).contains(&prefix_len) {
        return None;
    }
    let mask = u32::MAX << (32 - prefix_len as u32);
    let network = Ipv4Addr::from(u32::from(addr) & mask);
    Some(format!("{network}/{prefix_len}"))
}
