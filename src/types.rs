//! Data structures shared by the allocator, the registry store and the
//! reconciliation engine.
//!
//! A [`DeploymentRecord`] is the persisted identity of one hosted project:
//! the host ports it publishes, the /24 it owns and where its source tree
//! lives.  A [`Registry`] is an immutable-by-convention snapshot of every
//! record, keyed by project name.  Snapshots are read from and written to a
//! single JSON array document by [`crate::registry::RegistryStore`].

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BerthError, Result};

/// One hosted project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    /// Container-side port spec (`"80/tcp"`) to the published host port.
    #[serde(default, deserialize_with = "deserialize_ports")]
    pub ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub subnet: Option<String>,
    /// Source tree of the deployment. Sticky once set; see
    /// [`crate::reconcile::merge`].
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DeploymentRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: BTreeMap::new(),
            ip: None,
            subnet: None,
            path: None,
        }
    }

    pub fn uses_port(&self, port: u16) -> bool {
        self.ports.values().any(|p| *p == port)
    }

    pub fn uses_subnet(&self, subnet: &str) -> bool {
        self.subnet.as_deref() == Some(subnet)
    }
}

/// Names Docker accepts for `container_name`: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Older documents stored host ports as strings; accept both.
fn deserialize_ports<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HostPort {
        Number(u16),
        Text(String),
    }

    let raw: Option<BTreeMap<String, HostPort>> = Option::deserialize(deserializer)?;
    let mut ports = BTreeMap::new();
    for (spec, host) in raw.unwrap_or_default() {
        let port = match host {
            HostPort::Number(p) => p,
            HostPort::Text(s) => s.trim().parse::<u16>().map_err(|e| {
                serde::de::Error::custom(format!("invalid host port '{s}' for {spec}: {e}"))
            })?,
        };
        ports.insert(spec, port);
    }
    Ok(ports)
}

/// Snapshot of every known deployment, keyed by name.
///
/// Serialised as a JSON array ordered by name. Order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DeploymentRecord>", into = "Vec<DeploymentRecord>")]
pub struct Registry {
    records: BTreeMap<String, DeploymentRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DeploymentRecord> {
        self.records.get(name)
    }

    pub fn exists_by_name(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn exists_by_port(&self, port: u16) -> bool {
        self.records.values().any(|r| r.uses_port(port))
    }

    pub fn exists_by_subnet(&self, subnet: &str) -> bool {
        self.records.values().any(|r| r.uses_subnet(subnet))
    }

    /// Adds a new record. Fails if the name is already taken.
    pub fn append(&mut self, record: DeploymentRecord) -> Result<()> {
        match self.records.entry(record.name.clone()) {
            btree_map::Entry::Occupied(_) => Err(BerthError::DuplicateName(record.name)),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Inserts or replaces the record with the same name.
    pub fn insert(&mut self, record: DeploymentRecord) -> Option<DeploymentRecord> {
        self.records.insert(record.name.clone(), record)
    }

    pub fn remove(&mut self, name: &str) -> Option<DeploymentRecord> {
        self.records.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeploymentRecord> {
        self.records.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

impl From<Vec<DeploymentRecord>> for Registry {
    fn from(list: Vec<DeploymentRecord>) -> Self {
        let mut registry = Registry::new();
        for record in list {
            if let Some(previous) = registry.insert(record) {
                warn!(
                    "Registry lists '{}' more than once; keeping the last entry",
                    previous.name
                );
            }
        }
        registry
    }
}

impl From<Registry> for Vec<DeploymentRecord> {
    fn from(registry: Registry) -> Self {
        registry.records.into_values().collect()
    }
}

#[cfg(test)]
impl FromIterator<DeploymentRecord> for Registry {
    fn from_iter<I: IntoIterator<Item = DeploymentRecord>>(iter: I) -> Self {
        Registry::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl fmt::Display for DeploymentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = self
            .ports
            .iter()
            .map(|(spec, host)| format!("{host}->{spec}"))
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "{:<24} ports=[{}] ip={} subnet={} path={}",
            self.name,
            ports,
            self.ip.as_deref().unwrap_or("-"),
            self.subnet.as_deref().unwrap_or("-"),
            self.path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".into()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_string_ports() {
        let json = r#"[{"name":"shop","ports":{"80/tcp":"8001"},"ip":null,"subnet":"172.16.0.0/24","path":"/srv/shop"}]"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        let shop = registry.get("shop").unwrap();
        assert_eq!(shop.ports.get("80/tcp"), Some(&8001));
        assert!(registry.exists_by_port(8001));
        assert!(registry.exists_by_subnet("172.16.0.0/24"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let registry: Registry = serde_json::from_str(r#"[{"name":"blog"}]"#).unwrap();
        let blog = registry.get("blog").unwrap();
        assert!(blog.ports.is_empty());
        assert_eq!(blog.path, None);
        assert_eq!(blog.subnet, None);
    }

    #[test]
    fn duplicate_names_keep_last_entry() {
        let json = r#"[{"name":"a","subnet":"172.16.0.0/24"},{"name":"a","subnet":"172.16.9.0/24"}]"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.exists_by_subnet("172.16.9.0/24"));
    }

    #[test]
    fn container_name_pattern() {
        for ok in ["shop", "my-site.v2", "a_b", "9lives"] {
            assert!(is_valid_name(ok), "{ok}");
        }
        for bad in ["", "/root", "../etc", "-dash", ".hidden", "a/b", "sp ace", "caf\u{e9}"] {
            assert!(!is_valid_name(bad), "{bad}");
        }
    }

    #[test]
    fn append_rejects_taken_name() {
        let mut registry = Registry::new();
        registry.append(DeploymentRecord::new("shop")).unwrap();
        let err = registry.append(DeploymentRecord::new("shop")).unwrap_err();
        assert!(matches!(err, BerthError::DuplicateName(name) if name == "shop"));
        assert_eq!(registry.len(), 1);
    }
}
