use std::path::{Component, Path, PathBuf};

use log::{debug, warn};

use super::{ContainerDetails, ContainerRuntime};
use crate::types::DeploymentRecord;

/// Turns runtime answers into deployment records.
pub struct RuntimeInspector<'a, R: ?Sized> {
    runtime: &'a R,
    default_app_root: PathBuf,
}

impl<'a, R> RuntimeInspector<'a, R>
where
    R: ContainerRuntime + Sync + ?Sized,
{
    pub fn new(runtime: &'a R, default_app_root: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            default_app_root: default_app_root.into(),
        }
    }

    /// Names of running containers. A runtime that cannot be listed yields
    /// an error; there is nothing to reconcile against in that case.
    pub async fn list_active(&self) -> crate::error::Result<Vec<String>> {
        self.runtime.list_active().await
    }

    /// `None` when the runtime cannot describe `name`; the scan moves on.
    pub async fn inspect(&self, name: &str) -> Option<DeploymentRecord> {
        let details = match self.runtime.inspect(name).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                warn!("Container {} vanished before it could be inspected", name);
                return None;
            }
            Err(e) => {
                warn!("Failed to inspect container {}: {}", name, e);
                return None;
            }
        };

        let mut record = DeploymentRecord::new(name);
        record.ports = details
            .ports
            .iter()
            .filter_map(|p| p.host_port.map(|host| (p.container_port.clone(), host)))
            .collect();

        if let Some(attachment) = details.networks.first() {
            record.ip = attachment.ip.clone();
            record.subnet = match &attachment.subnet {
                Some(subnet) => Some(subnet.clone()),
                None => match self.runtime.network_subnet(&attachment.network).await {
                    Ok(subnet) => subnet,
                    Err(e) => {
                        warn!(
                            "Failed to look up subnet of network {} for {}: {}",
                            attachment.network, name, e
                        );
                        None
                    }
                },
            };
        }

        record.path = Some(self.derive_path(name, &details));
        debug!("Inspected {}: {:?}", name, record);
        Some(record)
    }

    /// Descriptor file's directory, else the project root above the bind
    /// mounts, else `<default_app_root>/<name>`.
    fn derive_path(&self, name: &str, details: &ContainerDetails) -> PathBuf {
        if let Some(dir) = details
            .config_files
            .first()
            .and_then(|file| file.parent())
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            return dir.to_path_buf();
        }
        if let Some(root) = common_path_prefix(&details.bind_sources)
            .as_deref()
            .and_then(Path::parent)
            .filter(|root| root.parent().is_some())
        {
            return root.to_path_buf();
        }
        self.default_app_root.join(name)
    }
}

/// Longest leading run of path components shared by every path.
pub fn common_path_prefix(paths: &[PathBuf]) -> Option<PathBuf> {
    let (first, rest) = paths.split_first()?;
    let mut shared: Vec<Component<'_>> = first.components().collect();
    for path in rest {
        let matching = shared
            .iter()
            .zip(path.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        shared.truncate(matching);
    }
    if shared.is_empty() {
        return None;
    }
    Some(shared.iter().collect())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{BerthError, Result};
    use crate::runtime::{NetworkAttachment, PublishedPort};

    #[derive(Default)]
    struct FakeRuntime {
        containers: HashMap<String, ContainerDetails>,
        networks: HashMap<String, String>,
        broken: Vec<String>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_active(&self) -> Result<Vec<String>> {
            Ok(self.containers.keys().cloned().collect())
        }

        async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>> {
            if self.broken.iter().any(|b| b == name) {
                return Err(BerthError::io(
                    name,
                    std::io::Error::other("daemon hiccup"),
                ));
            }
            Ok(self.containers.get(name).cloned())
        }

        async fn network_subnet(&self, network: &str) -> Result<Option<String>> {
            Ok(self.networks.get(network).cloned())
        }
    }

    fn attachment(network: &str, subnet: Option<&str>) -> NetworkAttachment {
        NetworkAttachment {
            network: network.into(),
            ip: Some("172.16.2.2".into()),
            subnet: subnet.map(Into::into),
        }
    }

    #[test]
    fn common_prefix_of_paths() {
        let paths = vec![
            PathBuf::from("/srv/shop/src"),
            PathBuf::from("/srv/shop/scripts"),
            PathBuf::from("/srv/shop/etc/php/php.ini"),
        ];
        assert_eq!(common_path_prefix(&paths), Some(PathBuf::from("/srv/shop")));
        assert_eq!(
            common_path_prefix(&[PathBuf::from("/srv/shopfront"), PathBuf::from("/srv/shop")]),
            Some(PathBuf::from("/srv"))
        );
        assert_eq!(common_path_prefix(&[]), None);
    }

    #[tokio::test]
    async fn keeps_only_published_ports() {
        let details = ContainerDetails {
            ports: vec![
                PublishedPort {
                    container_port: "80/tcp".into(),
                    host_port: Some(8004),
                },
                PublishedPort {
                    container_port: "443/tcp".into(),
                    host_port: None,
                },
            ],
            networks: vec![attachment("hosting", Some("172.16.2.0/24"))],
            ..Default::default()
        };
        let runtime = FakeRuntime {
            containers: HashMap::from([("shop".to_string(), details)]),
            ..Default::default()
        };
        let record = RuntimeInspector::new(&runtime, "/srv/apps")
            .inspect("shop")
            .await
            .unwrap();
        assert_eq!(record.ports.len(), 1);
        assert_eq!(record.ports.get("80/tcp"), Some(&8004));
        assert_eq!(record.ip.as_deref(), Some("172.16.2.2"));
        assert_eq!(record.subnet.as_deref(), Some("172.16.2.0/24"));
    }

    #[tokio::test]
    async fn falls_back_to_network_subnet() {
        let details = ContainerDetails {
            networks: vec![attachment("shop_hosting", None)],
            ..Default::default()
        };
        let runtime = FakeRuntime {
            containers: HashMap::from([("shop".to_string(), details)]),
            networks: HashMap::from([("shop_hosting".to_string(), "172.16.5.0/24".to_string())]),
            ..Default::default()
        };
        let record = RuntimeInspector::new(&runtime, "/srv/apps")
            .inspect("shop")
            .await
            .unwrap();
        assert_eq!(record.subnet.as_deref(), Some("172.16.5.0/24"));
    }

    #[tokio::test]
    async fn path_prefers_descriptor_file() {
        let details = ContainerDetails {
            config_files: vec![PathBuf::from("/srv/shop/docker-compose.yml")],
            bind_sources: vec![PathBuf::from("/data/other/src")],
            ..Default::default()
        };
        let runtime = FakeRuntime {
            containers: HashMap::from([("shop".to_string(), details)]),
            ..Default::default()
        };
        let record = RuntimeInspector::new(&runtime, "/srv/apps")
            .inspect("shop")
            .await
            .unwrap();
        assert_eq!(record.path, Some(PathBuf::from("/srv/shop")));
    }

    #[tokio::test]
    async fn path_from_bind_mounts_then_default() {
        let mounted = ContainerDetails {
            bind_sources: vec![
                PathBuf::from("/opt/sites/blog/src"),
                PathBuf::from("/opt/sites/blog/scripts"),
            ],
            ..Default::default()
        };
        let runtime = FakeRuntime {
            containers: HashMap::from([
                ("blog".to_string(), mounted),
                ("bare".to_string(), ContainerDetails::default()),
            ]),
            ..Default::default()
        };
        let inspector = RuntimeInspector::new(&runtime, "/srv/apps");

        let blog = inspector.inspect("blog").await.unwrap();
        assert_eq!(blog.path, Some(PathBuf::from("/opt/sites")));

        let bare = inspector.inspect("bare").await.unwrap();
        assert_eq!(bare.path, Some(PathBuf::from("/srv/apps/bare")));
        assert_eq!(bare.subnet, None);
        assert!(bare.ports.is_empty());
    }

    #[tokio::test]
    async fn shallow_bind_mounts_use_default_root() {
        let siblings = ContainerDetails {
            bind_sources: vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")],
            ..Default::default()
        };
        let disjoint = ContainerDetails {
            bind_sources: vec![PathBuf::from("/opt/x"), PathBuf::from("/var/y")],
            ..Default::default()
        };
        let runtime = FakeRuntime {
            containers: HashMap::from([
                ("siblings".to_string(), siblings),
                ("disjoint".to_string(), disjoint),
            ]),
            ..Default::default()
        };
        let inspector = RuntimeInspector::new(&runtime, "/srv/apps");

        let record = inspector.inspect("siblings").await.unwrap();
        assert_eq!(record.path, Some(PathBuf::from("/srv/apps/siblings")));
        let record = inspector.inspect("disjoint").await.unwrap();
        assert_eq!(record.path, Some(PathBuf::from("/srv/apps/disjoint")));
    }

    #[tokio::test]
    async fn unknown_or_failing_containers_are_absent() {
        let runtime = FakeRuntime {
            broken: vec!["flaky".into()],
            ..Default::default()
        };
        let inspector = RuntimeInspector::new(&runtime, "/srv/apps");
        assert!(inspector.inspect("ghost").await.is_none());
        assert!(inspector.inspect("flaky").await.is_none());
    }
}
