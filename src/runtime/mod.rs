//! Access to the container runtime.
//!
//! [`ContainerRuntime`] is the narrow capability the scanner needs: list what
//! is running, describe one container, look up a network's subnet.  The
//! Docker adapter lives in [`docker`]; [`inspect`] turns its raw answers into
//! [`DeploymentRecord`](crate::types::DeploymentRecord)s.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

pub mod docker;
pub mod inspect;

pub use docker::DockerRuntime;
pub use inspect::RuntimeInspector;

/// A container port and the host port it is published on, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    /// `"80/tcp"` style spec.
    pub container_port: String,
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub ip: Option<String>,
    /// Subnet as reported on the endpoint itself. When absent the network
    /// has to be asked via [`ContainerRuntime::network_subnet`].
    pub subnet: Option<String>,
}

/// What the runtime reports about one running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    pub ports: Vec<PublishedPort>,
    /// In the order the runtime lists them; the first one wins.
    pub networks: Vec<NetworkAttachment>,
    /// Host-side sources of bind mounts.
    pub bind_sources: Vec<PathBuf>,
    /// Deployment descriptor files the container was created from.
    pub config_files: Vec<PathBuf>,
}

#[async_trait]
pub trait ContainerRuntime {
    /// Names of all running containers.
    async fn list_active(&self) -> Result<Vec<String>>;

    /// `Ok(None)` when the runtime has no such container.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>>;

    /// Configured subnet of a network, if it has one.
    async fn network_subnet(&self, network: &str) -> Result<Option<String>>;
}
