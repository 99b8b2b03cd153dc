/*!
The in-memory topology model.

This module defines:
- `Device` / `Interface`: a polled device and its LLDP-bearing interfaces.
- `Endpoint` / `LinkKey`: a (device, canonical port) pair and the
  order-independent key that collapses both sides' reports of one physical
  link onto a single entry.
- `Link`: the merged record for a key, including the bidirectionality state.
- `TopologyGraph`: the link table plus the device table, with incremental
  merging of per-device observations and filtered views for the exporters.
*/

use std::collections::{BTreeMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collector::CollectedDevice;
use crate::topology::ports::{normalize_port, ordered_substitutions};

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("{device} reports itself as the neighbor of its own port {port}")]
    SelfReferential { device: String, port: String },
}

pub fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A device known to the graph. Immutable once inserted for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// The device's own sysName as polled. Neighbors name this device by its
    /// sysName, so a value diverging from `name` explains missing
    /// confirmations.
    pub hostname: String,
    pub management_ip: String,
    pub role: String,
    pub model: String,
    pub serial: String,
    /// Insertion order mirrors discovery order; not semantically significant.
    pub interfaces: Vec<Interface>,
}

impl Device {
    /// Minimal record for a device that appears as a link endpoint but was
    /// never polled this run (one-way neighbor, cache-only peer).
    pub fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hostname: name.to_string(),
            management_ip: String::new(),
            role: String::new(),
            model: String::new(),
            serial: String::new(),
            interfaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub normalized: String,
    /// Neighbor device name exactly as the protocol reported it.
    pub remote_device: Option<String>,
    pub remote_port: Option<String>,
    pub remote_port_normalized: Option<String>,
}

/// One side of a link: a device plus the canonical spelling of its port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub device: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(device: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            port: port.into(),
        }
    }
}

/// Canonical identifier of a potential link. Endpoints are kept in sorted
/// order so the same physical link reported from either side collapses onto
/// one key: `LinkKey::new(a, b) == LinkKey::new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    first: Endpoint,
    second: Endpoint,
}

impl LinkKey {
    pub fn new(x: Endpoint, y: Endpoint) -> Result<Self, GraphError> {
        if x.device == y.device {
            return Err(GraphError::SelfReferential {
                device: x.device,
                port: x.port,
            });
        }
        let (first, second) = if x <= y { (x, y) } else { (y, x) };
        Ok(Self { first, second })
    }

    pub fn endpoints(&self) -> (&Endpoint, &Endpoint) {
        (&self.first, &self.second)
    }

    /// The unordered device pair, already in key order.
    pub fn device_pair(&self) -> (&str, &str) {
        (&self.first.device, &self.second.device)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// At least one side reported the link during this run.
    Observed,
    /// Supplied by the persisted cache only.
    Cached,
}

/// The merged record for one link key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub a: Endpoint,
    pub b: Endpoint,
    /// True once both endpoints have reported each other from their own side.
    pub confirmed: bool,
    /// Which of (a, b) has reported the link itself, in key order.
    pub seen_from: [bool; 2],
    pub last_seen: u64,
    pub provenance: Provenance,
    /// Conflicting remote-port claim noted while merging, kept for diagnostics.
    pub discrepancy: Option<String>,
}

impl Link {
    fn new(key: &LinkKey, last_seen: u64) -> Self {
        let (a, b) = key.endpoints();
        Self {
            a: a.clone(),
            b: b.clone(),
            confirmed: false,
            seen_from: [false, false],
            last_seen,
            provenance: Provenance::Observed,
            discrepancy: None,
        }
    }

    pub fn key(&self) -> LinkKey {
        // endpoints are stored in key order, so this cannot be self-referential
        LinkKey {
            first: self.a.clone(),
            second: self.b.clone(),
        }
    }
}

/// A read-only, filter-applied view of the graph handed to the exporters.
#[derive(Debug, Clone)]
pub struct FilteredTopology {
    pub site: String,
    pub devices: BTreeMap<String, Device>,
    pub links: Vec<Link>,
}

/// Devices and their links for one site, accumulated over one discovery run.
pub struct TopologyGraph {
    site: String,
    snapshot_time: u64,
    devices: BTreeMap<String, Device>,
    links: BTreeMap<LinkKey, Link>,
    substitutions: Vec<(String, String)>,
}

impl TopologyGraph {
    pub fn new(site: impl Into<String>, substitutions: &[(String, String)]) -> Self {
        Self::at_time(site, substitutions, epoch_now())
    }

    /// Like `new` but with an explicit snapshot time, for deterministic tests.
    pub fn at_time(
        site: impl Into<String>,
        substitutions: &[(String, String)],
        snapshot_time: u64,
    ) -> Self {
        Self {
            site: site.into(),
            snapshot_time,
            devices: BTreeMap::new(),
            links: BTreeMap::new(),
            substitutions: ordered_substitutions(substitutions),
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn snapshot_time(&self) -> u64 {
        self.snapshot_time
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn get_link(&self, key: &LinkKey) -> Option<&Link> {
        self.links.get(key)
    }

    /// Merges one device's observations into the graph.
    ///
    /// Safe to call incrementally and in any order as collector results
    /// arrive; re-applying the same observation is a no-op. Invalid
    /// interfaces are skipped with a diagnostic, never fatal.
    pub fn add_device(&mut self, observed: CollectedDevice) {
        if !observed.hostname.is_empty() && observed.hostname != observed.name {
            warn!(
                "{} reports sysName {:?}; neighbors will report it under that name",
                observed.name, observed.hostname
            );
        }
        let mut interfaces = Vec::with_capacity(observed.interfaces.len());
        for intf in &observed.interfaces {
            let normalized = normalize_port(&self.substitutions, &intf.name);
            let remote_port_normalized = intf
                .remote_port
                .as_deref()
                .map(|p| normalize_port(&self.substitutions, p));
            interfaces.push(Interface {
                name: intf.name.clone(),
                normalized,
                remote_device: intf.remote_device.clone(),
                remote_port: intf.remote_port.clone(),
                remote_port_normalized,
            });
        }

        for intf in &interfaces {
            let Some(remote_device) = intf.remote_device.as_deref() else {
                continue;
            };
            let local = Endpoint::new(&observed.name, &intf.normalized);
            let remote = Endpoint::new(
                remote_device,
                intf.remote_port_normalized.as_deref().unwrap_or("unknown"),
            );
            match LinkKey::new(local.clone(), remote) {
                Ok(key) => self.observe(key, &local),
                Err(e) => warn!("skipping interface {}/{}: {e}", observed.name, intf.name),
            }
        }

        self.devices.insert(
            observed.name.clone(),
            Device {
                name: observed.name,
                hostname: observed.hostname,
                management_ip: observed.management_ip,
                role: observed.role,
                model: observed.model,
                serial: observed.serial,
                interfaces,
            },
        );
    }

    /// Records one side's observation of a link. Sets `confirmed` once both
    /// sides have reported each other; the flag never reverts within a run.
    fn observe(&mut self, key: LinkKey, local: &Endpoint) {
        let discrepancy = if self.links.contains_key(&key) {
            None
        } else {
            self.conflicting_claim(&key)
        };
        let now = self.snapshot_time;
        let link = self
            .links
            .entry(key.clone())
            .or_insert_with(|| Link::new(&key, now));
        if let Some(message) = discrepancy {
            warn!("conflicting neighbor claims: {message}");
            link.discrepancy = Some(message);
        }
        let side = usize::from(*local != key.first);
        link.seen_from[side] = true;
        link.last_seen = now;
        link.provenance = Provenance::Observed;
        if link.seen_from[0] && link.seen_from[1] {
            link.confirmed = true;
        }
    }

    /// Looks for an existing link between the same device pair that agrees on
    /// one endpoint's port but not the other's: the two sides are then making
    /// incompatible claims about the same physical port.
    fn conflicting_claim(&self, key: &LinkKey) -> Option<String> {
        let (a, b) = key.endpoints();
        for other in self.links.values() {
            if (other.a.device.as_str(), other.b.device.as_str()) != key.device_pair() {
                continue;
            }
            let same_a = other.a.port == a.port;
            let same_b = other.b.port == b.port;
            if same_a != same_b {
                return Some(format!(
                    "{}:{} <-> {}:{} vs previously reported {}:{} <-> {}:{}",
                    a.device,
                    a.port,
                    b.device,
                    b.port,
                    other.a.device,
                    other.a.port,
                    other.b.device,
                    other.b.port,
                ));
            }
        }
        None
    }

    /// Seeds a link from the persisted cache. Only called for keys absent
    /// from the table; keeps the cached timestamp and confirmation.
    pub(crate) fn insert_cached(&mut self, key: LinkKey, confirmed: bool, last_seen: u64) {
        let link = Link {
            confirmed,
            last_seen,
            provenance: Provenance::Cached,
            ..Link::new(&key, last_seen)
        };
        self.links.insert(key, link);
    }

    /// Restores a confirmation the cache holds for a link that was only
    /// re-observed from one side this run. Without this, a transient polling
    /// failure on one device would demote a previously confirmed link.
    pub(crate) fn confirm_from_cache(&mut self, key: &LinkKey) {
        if let Some(link) = self.links.get_mut(key) {
            if !link.confirmed {
                debug!(
                    "carrying cached confirmation for {}:{} <-> {}:{}",
                    link.a.device, link.a.port, link.b.device, link.b.port
                );
                link.confirmed = true;
            }
        }
    }

    /// Filtering predicate: confirmed links always pass; unconfirmed links
    /// pass when one-way links are globally allowed or either endpoint's
    /// device role or name is in the exception set (exact, case-sensitive).
    pub fn is_link_permitted(
        &self,
        link: &Link,
        allow_oneway: bool,
        exceptions: &HashSet<String>,
    ) -> bool {
        if link.confirmed {
            return true;
        }
        if allow_oneway {
            return true;
        }
        self.endpoint_excepted(&link.a, exceptions) || self.endpoint_excepted(&link.b, exceptions)
    }

    fn endpoint_excepted(&self, endpoint: &Endpoint, exceptions: &HashSet<String>) -> bool {
        if exceptions.contains(&endpoint.device) {
            return true;
        }
        self.devices
            .get(&endpoint.device)
            .map(|d| !d.role.is_empty() && exceptions.contains(&d.role))
            .unwrap_or(false)
    }

    /// Returns the links surviving the filter, plus the device set restricted
    /// to devices that still have at least one surviving link. Endpoints the
    /// run never polled get placeholder records so exporters can draw the
    /// complete edge.
    pub fn filtered(
        &self,
        only_bidirectional: bool,
        allow_oneway: bool,
        exceptions: &HashSet<String>,
    ) -> FilteredTopology {
        self.report_unmatched_exceptions(exceptions);

        let mut links = Vec::new();
        let mut devices: BTreeMap<String, Device> = BTreeMap::new();
        for link in self.links.values() {
            if only_bidirectional && !self.is_link_permitted(link, allow_oneway, exceptions) {
                continue;
            }
            for endpoint in [&link.a, &link.b] {
                if !devices.contains_key(&endpoint.device) {
                    let record = self
                        .devices
                        .get(&endpoint.device)
                        .cloned()
                        .unwrap_or_else(|| Device::placeholder(&endpoint.device));
                    devices.insert(endpoint.device.clone(), record);
                }
            }
            links.push(link.clone());
        }
        FilteredTopology {
            site: self.site.clone(),
            devices,
            links,
        }
    }

    /// Config error (unknown exception entry) is reported at the point of
    /// use and does not abort the run.
    fn report_unmatched_exceptions(&self, exceptions: &HashSet<String>) {
        for entry in exceptions {
            let matches_name = self.devices.contains_key(entry)
                || self
                    .links
                    .values()
                    .any(|l| l.a.device == *entry || l.b.device == *entry);
            let matches_role = self.devices.values().any(|d| d.role == *entry);
            if !matches_name && !matches_role {
                warn!("allow-oneway entry {entry:?} matches no known device name or role");
            }
        }
    }

    /// Logs one line per link, mirroring the direction of confirmation.
    pub fn show(&self) {
        for link in self.links.values() {
            let direction = if link.confirmed { "<->" } else { "->" };
            info!(
                "{}:{} {} {}:{}",
                link.a.device, link.a.port, direction, link.b.device, link.b.port
            );
        }
    }
}

mod tests {
    #[allow(unused_imports)]
    use super::*;
    #[allow(unused_imports)]
    use crate::collector::{CollectedDevice, CollectedInterface};

    #[allow(dead_code)]
    fn subs() -> Vec<(String, String)> {
        crate::config::Config::default().port_substitutions
    }

    #[allow(dead_code)]
    fn device(name: &str, interfaces: Vec<CollectedInterface>) -> CollectedDevice {
        CollectedDevice {
            name: name.to_string(),
            management_ip: "10.0.0.1".to_string(),
            hostname: name.to_string(),
            model: "test".to_string(),
            serial: "serial".to_string(),
            role: "access-switch".to_string(),
            interfaces,
        }
    }

    #[allow(dead_code)]
    fn intf(name: &str, remote_device: &str, remote_port: Option<&str>) -> CollectedInterface {
        CollectedInterface {
            name: name.to_string(),
            remote_device: Some(remote_device.to_string()),
            remote_port: remote_port.map(str::to_string),
        }
    }

    #[test]
    fn test_key_symmetry() {
        let k1 = LinkKey::new(Endpoint::new("X", "gi0/1"), Endpoint::new("Y", "gi0/2")).unwrap();
        let k2 = LinkKey::new(Endpoint::new("Y", "gi0/2"), Endpoint::new("X", "gi0/1")).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = LinkKey::new(Endpoint::new("X", "gi0/1"), Endpoint::new("X", "gi0/2"));
        assert!(matches!(err, Err(GraphError::SelfReferential { .. })));
    }

    #[test]
    fn test_bidirectional_confirmation_across_spellings() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        graph.add_device(device(
            "X",
            vec![intf("Gi0/1", "Y", Some("GigabitEthernet0/1"))],
        ));
        graph.add_device(device("Y", vec![intf("Gi0/1", "X", Some("Gi0/1"))]));

        assert_eq!(graph.link_count(), 1);
        let key = LinkKey::new(Endpoint::new("X", "gi0/1"), Endpoint::new("Y", "gi0/1")).unwrap();
        let link = graph.get_link(&key).expect("link should exist");
        assert!(link.confirmed);
        assert_eq!(link.last_seen, 1000);
        assert_eq!(link.provenance, Provenance::Observed);
    }

    #[test]
    fn test_one_way_report_stays_unconfirmed() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        graph.add_device(device("X", vec![intf("Gi0/1", "Y", Some("Gi0/1"))]));

        let link = graph.links().next().expect("link should exist");
        assert!(!link.confirmed);

        // excluded under only-bidirectional unless excepted
        let empty = HashSet::new();
        let view = graph.filtered(true, false, &empty);
        assert!(view.links.is_empty());
        assert!(view.devices.is_empty());

        let by_name: HashSet<String> = ["X".to_string()].into();
        let view = graph.filtered(true, false, &by_name);
        assert_eq!(view.links.len(), 1);
        assert!(view.devices.contains_key("X"));
        // the unpolled neighbor is drawn from a placeholder record
        assert!(view.devices.get("Y").is_some_and(|d| d.role.is_empty()));

        let by_role: HashSet<String> = ["access-switch".to_string()].into();
        let view = graph.filtered(true, false, &by_role);
        assert_eq!(view.links.len(), 1);
    }

    #[test]
    fn test_confirmation_is_monotonic_and_idempotent() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        graph.add_device(device("X", vec![intf("Gi0/1", "Y", Some("Gi0/1"))]));
        graph.add_device(device("Y", vec![intf("Gi0/1", "X", Some("Gi0/1"))]));
        // replaying one side must not duplicate the link or drop confirmation
        graph.add_device(device("X", vec![intf("Gi0/1", "Y", Some("Gi0/1"))]));

        assert_eq!(graph.link_count(), 1);
        assert!(graph.links().next().expect("link").confirmed);
    }

    #[test]
    fn test_filter_predicate() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        graph.add_device(device("X", vec![intf("Gi0/1", "Y", Some("Gi0/1"))]));
        let link = graph.links().next().expect("link").clone();
        let empty = HashSet::new();
        let exceptions: HashSet<String> = ["Y".to_string()].into();

        assert!(!graph.is_link_permitted(&link, false, &empty));
        assert!(graph.is_link_permitted(&link, true, &empty));
        // name match works for endpoints the run never polled
        assert!(graph.is_link_permitted(&link, false, &exceptions));

        let mut confirmed = link;
        confirmed.confirmed = true;
        assert!(graph.is_link_permitted(&confirmed, false, &empty));
    }

    #[test]
    fn test_exceptions_are_case_sensitive_exact() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        graph.add_device(device("X", vec![intf("Gi0/1", "Y", Some("Gi0/1"))]));
        let link = graph.links().next().expect("link").clone();

        let wrong_case: HashSet<String> = ["x".to_string()].into();
        assert!(!graph.is_link_permitted(&link, false, &wrong_case));
        let prefix: HashSet<String> = ["X-1".to_string()].into();
        assert!(!graph.is_link_permitted(&link, false, &prefix));
    }

    #[test]
    fn test_self_referential_interface_skipped_not_fatal() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        graph.add_device(device(
            "X",
            vec![
                intf("Gi0/1", "X", Some("Gi0/2")),
                intf("Gi0/3", "Y", Some("Gi0/3")),
            ],
        ));
        assert_eq!(graph.link_count(), 1);
        assert_eq!(graph.device_count(), 1);
    }

    #[test]
    fn test_mismatched_remote_port_claims_record_discrepancy() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        // X says its gi0/1 goes to Y:gi0/5; Y says its gi0/5 goes to X:gi0/2
        graph.add_device(device("X", vec![intf("Gi0/1", "Y", Some("Gi0/5"))]));
        graph.add_device(device("Y", vec![intf("Gi0/5", "X", Some("Gi0/2"))]));

        assert_eq!(graph.link_count(), 2);
        assert!(graph.links().all(|l| !l.confirmed));
        assert!(graph.links().any(|l| l.discrepancy.is_some()));
    }

    #[test]
    fn test_polled_sysname_is_kept_on_the_device_record() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        assert_eq!(graph.site(), "hq");
        let mut polled = device("X", vec![intf("Gi0/1", "Y", Some("Gi0/1"))]);
        polled.hostname = "x-core.example.net".to_string();
        graph.add_device(polled);

        let view = graph.filtered(false, false, &HashSet::new());
        let record = view.devices.get("X").expect("device record");
        assert_eq!(record.hostname, "x-core.example.net");
        // placeholders fall back to the reported neighbor name
        assert_eq!(view.devices.get("Y").expect("placeholder").hostname, "Y");
    }

    #[test]
    fn test_missing_remote_port_still_forms_a_link() {
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1000);
        graph.add_device(device("X", vec![intf("Gi0/1", "Y", None)]));
        let link = graph.links().next().expect("link");
        let remote = if link.a.device == "Y" { &link.a } else { &link.b };
        assert_eq!(remote.port, "unknown");
    }
}
