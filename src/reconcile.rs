//! Merging live runtime state into the registry.
//!
//! [`merge`] is pure: old snapshot plus observations in, new snapshot out.
//! [`reconcile`] gathers the observations from a runtime and then merges.

use std::collections::HashSet;

use log::{debug, info};

use crate::error::Result;
use crate::runtime::{ContainerRuntime, RuntimeInspector};
use crate::types::{DeploymentRecord, Registry};

/// What to do with records whose container is not running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergePolicy {
    /// Drop records whose name the runtime did not list. Off by default:
    /// stopped deployments keep their allocation.
    pub prune_missing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub pruned: Vec<String>,
}

/// Folds `observed` records into `existing`.
///
/// `live_names` is everything the runtime listed, including names whose
/// inspection failed and therefore have no entry in `observed`.
///
/// For a known name the observed ports, ip and subnet replace the stored
/// ones, but a stored path is never overwritten. Unknown names are added as
/// observed.
pub fn merge(
    existing: &Registry,
    live_names: &[String],
    observed: &[DeploymentRecord],
    policy: MergePolicy,
) -> (Registry, MergeReport) {
    let mut next = existing.clone();
    let mut report = MergeReport::default();

    for seen in observed {
        match existing.get(&seen.name) {
            None => {
                next.insert(seen.clone());
                report.added.push(seen.name.clone());
            }
            Some(stored) => {
                let refreshed = DeploymentRecord {
                    name: stored.name.clone(),
                    ports: seen.ports.clone(),
                    ip: seen.ip.clone(),
                    subnet: seen.subnet.clone(),
                    path: stored.path.clone().or_else(|| seen.path.clone()),
                };
                if &refreshed == stored {
                    report.unchanged.push(seen.name.clone());
                } else {
                    report.updated.push(seen.name.clone());
                }
                next.insert(refreshed);
            }
        }
    }

    if policy.prune_missing {
        let live: HashSet<&str> = live_names.iter().map(String::as_str).collect();
        let stale: Vec<String> = next
            .names()
            .filter(|name| !live.contains(name))
            .map(str::to_owned)
            .collect();
        for name in stale {
            debug!("Pruning {}: not running", name);
            next.remove(&name);
            report.pruned.push(name);
        }
    }

    (next, report)
}

/// Lists and inspects every running container, one at a time, then merges
/// the results into `existing`.
pub async fn reconcile<R>(
    existing: &Registry,
    inspector: &RuntimeInspector<'_, R>,
    policy: MergePolicy,
) -> Result<(Registry, MergeReport)>
where
    R: ContainerRuntime + Sync + ?Sized,
{
    let live_names = inspector.list_active().await?;
    info!("Scanning {} running container(s)", live_names.len());

    let mut observed = Vec::with_capacity(live_names.len());
    for name in &live_names {
        if let Some(record) = inspector.inspect(name).await {
            observed.push(record);
        }
    }

    Ok(merge(existing, &live_names, &observed, policy))
}
