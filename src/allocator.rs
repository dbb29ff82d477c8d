//! First-fit allocation of host ports and /24 subnets.
//!
//! Both allocators scan their candidate pool in ascending order and hand out
//! the lowest candidate that the registry does not already claim, so the
//! result depends only on the registry snapshot (and, for ports, on what the
//! probe reports).
//!
//! A free port is only free at the moment it was probed. Nothing reserves it
//! between allocation and the moment the deployment binds it, so callers that
//! hit a bind conflict must allocate again. Subnets are checked against this
//! registry only, never against the runtime's own network table.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::ops::Range;

use log::debug;

use crate::error::{BerthError, Result};
use crate::types::Registry;

pub const DEFAULT_PORT_RANGE: Range<u16> = 8001..9000;

/// Third octets available under `172.16.x.0/24`.
const SUBNET_OCTETS: std::ops::RangeInclusive<u8> = 0..=255;

/// Tells whether a TCP port is unbound on this host.
pub trait PortProbe {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding the wildcard address, which also catches listeners
/// published by the container runtime on `0.0.0.0`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPortProbe;

impl PortProbe for LocalPortProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).is_ok()
    }
}

pub fn subnet_for(octet: u8) -> String {
    format!("172.16.{octet}.0/24")
}

/// Returns the lowest port in `range` that is unbound locally and not listed
/// by any record.
pub fn allocate_port(registry: &Registry, probe: &impl PortProbe, range: Range<u16>) -> Result<u16> {
    let detail = format!("ports {}-{}", range.start, range.end);
    for port in range {
        if registry.exists_by_port(port) {
            continue;
        }
        if !probe.is_free(port) {
            debug!("Port {} is bound locally, skipping", port);
            continue;
        }
        return Ok(port);
    }
    Err(BerthError::AllocationExhausted {
        resource: "port",
        detail,
    })
}

/// Returns the lowest `172.16.x.0/24` not claimed by any record.
pub fn allocate_subnet(registry: &Registry) -> Result<String> {
    SUBNET_OCTETS
        .map(subnet_for)
        .find(|subnet| !registry.exists_by_subnet(subnet))
        .ok_or_else(|| BerthError::AllocationExhausted {
            resource: "subnet",
            detail: "172.16.0.0/24-172.16.255.0/24".into(),
        })
}

/// Host address `.n` inside a `a.b.c.0/24` block.
pub fn host_in_subnet(subnet: &str, host: u8) -> Option<Ipv4Addr> {
    let (network, prefix) = subnet.split_once('/')?;
    if prefix != "24" {
        return None;
    }
    let [a, b, c, _] = network.parse::<Ipv4Addr>().ok()?.octets();
    Some(Ipv4Addr::new(a, b, c, host))
}
