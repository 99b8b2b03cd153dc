/*!
LLDP-over-SNMP neighbor collector.

Walks the standard LLDP-MIB remote table (`lldpRemTable`) plus the local
port table, and assembles per-interface neighbor reports. Transport
failures and timeouts are folded into `CollectorOutcome::Unreachable`;
the cache layer covers the device for this run.
*/

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use snmp2::{AsyncSession, Oid, Value, Version};
use tokio::time::timeout;

use crate::collector::{
    CollectedDevice, CollectedInterface, CollectorError, CollectorOutcome, NeighborCollector,
};
use crate::inventory::DeviceDescriptor;

const SNMP_PORT: u16 = 161;

const SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
// LLDP-MIB: lldpLocPortId, indexed by lldpLocPortNum
const LLDP_LOC_PORT_ID: &str = "1.0.8802.1.1.2.1.3.7.1.3";
// LLDP-MIB: lldpRemTable columns, indexed by (timeMark, localPortNum, index)
const LLDP_REM_PORT_ID: &str = "1.0.8802.1.1.2.1.4.1.1.7";
const LLDP_REM_PORT_DESC: &str = "1.0.8802.1.1.2.1.4.1.1.8";
const LLDP_REM_SYS_NAME: &str = "1.0.8802.1.1.2.1.4.1.1.9";

#[derive(Debug)]
enum SnmpError {
    Io(std::io::Error),
    Snmp(snmp2::Error),
    Timeout,
    BadOid,
}

impl std::fmt::Display for SnmpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnmpError::Io(e) => write!(f, "io error: {e}"),
            SnmpError::Snmp(e) => write!(f, "snmp error: {e:?}"),
            SnmpError::Timeout => write!(f, "request timed out"),
            SnmpError::BadOid => write!(f, "malformed oid in response"),
        }
    }
}

/// Collector polling devices over SNMP v1/v2c using credentials carried in
/// inventory custom fields.
pub struct SnmpNeighborCollector {
    community_field: String,
    version_field: String,
    op_timeout: Duration,
}

impl SnmpNeighborCollector {
    pub fn new(community_field: &str, version_field: &str, op_timeout: Duration) -> Self {
        Self {
            community_field: community_field.to_string(),
            version_field: version_field.to_string(),
            op_timeout,
        }
    }

    fn credentials(&self, device: &DeviceDescriptor) -> Result<(String, Version), CollectorError> {
        let community = device.custom_field(&self.community_field).ok_or_else(|| {
            CollectorError::MissingCredentials {
                device: device.name.clone(),
                field: self.community_field.clone(),
            }
        })?;
        let version = device.custom_field(&self.version_field).ok_or_else(|| {
            CollectorError::MissingCredentials {
                device: device.name.clone(),
                field: self.version_field.clone(),
            }
        })?;
        let version = match version.trim() {
            "1" => Version::V1,
            "2" | "2c" => Version::V2C,
            other => {
                return Err(CollectorError::UnsupportedVersion {
                    device: device.name.clone(),
                    version: other.to_string(),
                });
            }
        };
        Ok((community.to_string(), version))
    }

    async fn open_session(
        &self,
        address: SocketAddr,
        community: &str,
        version: Version,
    ) -> Result<AsyncSession, SnmpError> {
        let session = match version {
            Version::V1 => AsyncSession::new_v1(address, community.as_bytes(), 0).await,
            _ => AsyncSession::new_v2c(address, community.as_bytes(), 0).await,
        };
        session.map_err(SnmpError::Io)
    }

    /// Walks one table column with repeated get-next, returning each row's
    /// index suffix and its string value.
    async fn walk_column(
        &self,
        session: &mut AsyncSession,
        column: &str,
    ) -> Result<Vec<(Vec<u64>, String)>, SnmpError> {
        let root = Oid::from_str(column).map_err(|_| SnmpError::BadOid)?;
        let prefix_len = root.iter().ok_or(SnmpError::BadOid)?.count();
        let mut rows = Vec::new();
        let mut current = root.clone();
        loop {
            let pdu = timeout(self.op_timeout, session.getnext(&current))
                .await
                .map_err(|_| SnmpError::Timeout)?
                .map_err(SnmpError::Snmp)?;
            let Some((oid, value)) = pdu.varbinds.into_iter().next() else {
                break;
            };
            if !oid.starts_with(&root) {
                break;
            }
            let suffix: Vec<u64> = oid
                .iter()
                .ok_or(SnmpError::BadOid)?
                .skip(prefix_len)
                .collect();
            if let Some(text) = value_to_string(&value) {
                rows.push((suffix, text));
            }
            current = oid.to_owned();
        }
        Ok(rows)
    }

    async fn get_string(
        &self,
        session: &mut AsyncSession,
        oid: &str,
    ) -> Result<Option<String>, SnmpError> {
        let oid = Oid::from_str(oid).map_err(|_| SnmpError::BadOid)?;
        let pdu = timeout(self.op_timeout, session.get(&oid))
            .await
            .map_err(|_| SnmpError::Timeout)?
            .map_err(SnmpError::Snmp)?;
        Ok(pdu
            .varbinds
            .into_iter()
            .next()
            .and_then(|(_, value)| value_to_string(&value)))
    }

    async fn poll(
        &self,
        device: &DeviceDescriptor,
        community: &str,
        version: Version,
    ) -> Result<CollectedDevice, SnmpError> {
        let address = SocketAddr::new(device.management_ip, SNMP_PORT);
        let mut session = self.open_session(address, community, version).await?;

        let hostname = self
            .get_string(&mut session, SYS_NAME)
            .await?
            .unwrap_or_else(|| device.name.clone());

        let local_ports: HashMap<u64, String> = self
            .walk_column(&mut session, LLDP_LOC_PORT_ID)
            .await?
            .into_iter()
            .filter_map(|(suffix, name)| suffix.first().map(|n| (*n, name)))
            .collect();

        let mut remotes: BTreeMap<(u64, u64), RemoteRecord> = BTreeMap::new();
        for (column, field) in [
            (LLDP_REM_SYS_NAME, RemoteField::SysName),
            (LLDP_REM_PORT_ID, RemoteField::PortId),
            (LLDP_REM_PORT_DESC, RemoteField::PortDesc),
        ] {
            for (suffix, text) in self.walk_column(&mut session, column).await? {
                // suffix = (timeMark, localPortNum, index)
                let (Some(port_num), Some(index)) = (suffix.get(1), suffix.get(2)) else {
                    continue;
                };
                remotes
                    .entry((*port_num, *index))
                    .or_default()
                    .set(field, text);
            }
        }

        let interfaces = assemble_interfaces(&local_ports, &remotes);
        info!(
            "{}: {} LLDP neighbor entries on {} local ports",
            device.name,
            interfaces.len(),
            local_ports.len()
        );

        Ok(CollectedDevice {
            name: device.name.clone(),
            management_ip: device.management_ip.to_string(),
            hostname,
            model: device.model.clone(),
            serial: device.serial.clone(),
            role: device.role.clone(),
            interfaces,
        })
    }
}

#[async_trait]
impl NeighborCollector for SnmpNeighborCollector {
    async fn collect(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<CollectorOutcome, CollectorError> {
        let (community, version) = self.credentials(device)?;
        debug!("querying {} ({}) via SNMP", device.name, device.management_ip);
        match self.poll(device, &community, version).await {
            Ok(collected) => Ok(CollectorOutcome::Collected(collected)),
            Err(e) => {
                warn!("{} did not answer: {e}", device.name);
                Ok(CollectorOutcome::Unreachable)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RemoteField {
    SysName,
    PortId,
    PortDesc,
}

#[derive(Debug, Default, Clone)]
struct RemoteRecord {
    sys_name: Option<String>,
    port_id: Option<String>,
    port_desc: Option<String>,
}

impl RemoteRecord {
    fn set(&mut self, field: RemoteField, value: String) {
        match field {
            RemoteField::SysName => self.sys_name = Some(value),
            RemoteField::PortId => self.port_id = Some(value),
            RemoteField::PortDesc => self.port_desc = Some(value),
        }
    }

    /// The remote port as reported: the descriptive name when present,
    /// otherwise the port id subtype value.
    fn remote_port(&self) -> Option<String> {
        self.port_desc
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.port_id.clone().filter(|s| !s.is_empty()))
    }
}

/// Joins the remote table against the local port names. Rows without a
/// remote system name are discarded: they cannot anchor a link.
fn assemble_interfaces(
    local_ports: &HashMap<u64, String>,
    remotes: &BTreeMap<(u64, u64), RemoteRecord>,
) -> Vec<CollectedInterface> {
    let mut interfaces = Vec::new();
    for ((port_num, _index), record) in remotes {
        let Some(sys_name) = record.sys_name.clone().filter(|s| !s.is_empty()) else {
            continue;
        };
        let name = local_ports
            .get(port_num)
            .cloned()
            .unwrap_or_else(|| format!("port-{port_num}"));
        interfaces.push(CollectedInterface {
            name,
            remote_device: Some(sys_name),
            remote_port: record.remote_port(),
        });
    }
    interfaces
}

fn value_to_string(value: &Value<'_>) -> Option<String> {
    match value {
        Value::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).trim().to_string()),
        _ => None,
    }
}

mod tests {
    #[allow(unused_imports)]
    use super::*;

    #[allow(dead_code)]
    fn record(sys_name: &str, port_id: &str, port_desc: &str) -> RemoteRecord {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        RemoteRecord {
            sys_name: opt(sys_name),
            port_id: opt(port_id),
            port_desc: opt(port_desc),
        }
    }

    #[test]
    fn test_assemble_joins_local_port_names() {
        let local_ports: HashMap<u64, String> = [
            (1, "Gi0/1".to_string()),
            (2, "Gi0/2".to_string()),
        ]
        .into();
        let mut remotes = BTreeMap::new();
        remotes.insert((1, 1), record("sw-2", "Gi0/5", "GigabitEthernet0/5"));
        remotes.insert((7, 1), record("sw-3", "Gi0/7", ""));

        let interfaces = assemble_interfaces(&local_ports, &remotes);
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0].name, "Gi0/1");
        assert_eq!(interfaces[0].remote_device.as_deref(), Some("sw-2"));
        // descriptive name preferred over the port id
        assert_eq!(
            interfaces[0].remote_port.as_deref(),
            Some("GigabitEthernet0/5")
        );
        // unknown local port number still yields a usable name
        assert_eq!(interfaces[1].name, "port-7");
        assert_eq!(interfaces[1].remote_port.as_deref(), Some("Gi0/7"));
    }

    #[test]
    fn test_rows_without_remote_name_are_dropped() {
        let local_ports = HashMap::new();
        let mut remotes = BTreeMap::new();
        remotes.insert((1, 1), record("", "Gi0/5", ""));
        assert!(assemble_interfaces(&local_ports, &remotes).is_empty());
    }

    #[test]
    fn test_unsupported_snmp_version_is_a_config_error() {
        let collector = SnmpNeighborCollector::new(
            "snmp_community",
            "snmp_version",
            Duration::from_secs(1),
        );
        let device = DeviceDescriptor {
            name: "sw-1".to_string(),
            management_ip: "10.0.0.1".parse().unwrap(),
            role: "access-switch".to_string(),
            model: String::new(),
            serial: String::new(),
            custom_fields: [
                ("snmp_community".to_string(), "public".to_string()),
                ("snmp_version".to_string(), "3".to_string()),
            ]
            .into(),
        };
        assert!(matches!(
            collector.credentials(&device),
            Err(CollectorError::UnsupportedVersion { .. })
        ));
    }
}
