/*!
Neighbor-discovery collector boundary.

This module defines:
- `CollectedDevice` / `CollectedInterface`: one device's raw LLDP
  observations, exactly as reported, before any normalization.
- `CollectorOutcome`: a poll either yields observations or an explicit
  `Unreachable` value; unreachability is data, not an error, so the caller
  can fall back to cached links for that device.
- `NeighborCollector`: the async trait the polling loop consumes.
- `snmp`: the LLDP-over-SNMP implementation.
*/

use async_trait::async_trait;
use thiserror::Error;

use crate::inventory::DeviceDescriptor;

pub mod snmp;

/// One interface's neighbor report, untouched vendor spellings included.
#[derive(Debug, Clone)]
pub struct CollectedInterface {
    pub name: String,
    pub remote_device: Option<String>,
    pub remote_port: Option<String>,
}

/// Everything one poll learned about a device.
#[derive(Debug, Clone)]
pub struct CollectedDevice {
    pub name: String,
    pub management_ip: String,
    pub hostname: String,
    pub model: String,
    pub serial: String,
    pub role: String,
    pub interfaces: Vec<CollectedInterface>,
}

#[derive(Debug)]
pub enum CollectorOutcome {
    Collected(CollectedDevice),
    /// The device did not answer; zero new observations this run.
    Unreachable,
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("device {device} has no {field} custom field")]
    MissingCredentials { device: String, field: String },
    #[error("device {device} has unsupported SNMP version {version:?}")]
    UnsupportedVersion { device: String, version: String },
}

#[async_trait]
pub trait NeighborCollector: Send + Sync {
    /// Polls one device for its neighbor table. Transport-level failures
    /// surface as `CollectorOutcome::Unreachable`; only configuration
    /// problems (missing credentials) are errors.
    async fn collect(&self, device: &DeviceDescriptor)
    -> Result<CollectorOutcome, CollectorError>;
}
