/*!
Device/role inventory lookup boundary.

This module defines:
- `DeviceDescriptor`: what the mapper needs to know about a device before
  polling it (identity, management address, role, credential custom fields).
- `Inventory`: an async trait over "give me the devices of these roles at
  this site"; the NetBox-style service behind it stays external.
- `FileInventory`: a JSON-file-backed implementation for running the mapper
  against a static inventory export.
*/

use std::{collections::HashMap, net::IpAddr, path::PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum InventoryError {
    #[error("failed to read inventory {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("invalid inventory {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("no devices found at site {site}")]
    NoDevices { site: String },
}

/// A device as described by the inventory service, before any polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub management_ip: IpAddr,
    pub role: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    /// Free-form fields carried over from the inventory system; the SNMP
    /// credential fields named in the config live here.
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,
}

impl DeviceDescriptor {
    pub fn custom_field(&self, name: &str) -> Option<&str> {
        self.custom_fields.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait Inventory: Send + Sync {
    /// Returns the descriptors of all devices at `site` whose role is in `roles`.
    async fn devices(
        &self,
        site: &str,
        roles: &[String],
    ) -> Result<Vec<DeviceDescriptor>, InventoryError>;
}

/// Inventory backed by a JSON file mapping site names to device lists.
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl Inventory for FileInventory {
    async fn devices(
        &self,
        site: &str,
        roles: &[String],
    ) -> Result<Vec<DeviceDescriptor>, InventoryError> {
        let text =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| InventoryError::Read {
                    path: self.path.clone(),
                    message: e.to_string(),
                })?;
        let sites: HashMap<String, Vec<DeviceDescriptor>> =
            serde_json::from_str(&text).map_err(|e| InventoryError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        let devices: Vec<DeviceDescriptor> = sites
            .get(site)
            .map(|list| {
                list.iter()
                    .filter(|d| roles.iter().any(|r| *r == d.role))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if devices.is_empty() {
            return Err(InventoryError::NoDevices {
                site: site.to_string(),
            });
        }
        Ok(devices)
    }
}

mod tests {
    #[allow(unused_imports)]
    use super::*;

    #[test]
    fn test_descriptor_deserialization() {
        let json = include_str!("../test_data/test_inventory.json");
        let sites: HashMap<String, Vec<DeviceDescriptor>> = serde_json::from_str(json).unwrap();
        let devices = sites.get("hq").unwrap();
        assert_eq!(devices.len(), 3);
        let sw1 = devices.iter().find(|d| d.name == "sw-hq-1").unwrap();
        assert_eq!(sw1.role, "access-switch");
        assert_eq!(sw1.custom_field("snmp_community"), Some("public"));
        assert_eq!(sw1.custom_field("snmp_version"), Some("2c"));
    }

    #[tokio::test]
    async fn test_file_inventory_filters_by_site_and_role() {
        let inventory = FileInventory::new(PathBuf::from(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/test_data/test_inventory.json"
        )));
        let roles = vec!["access-switch".to_string()];
        let devices = inventory.devices("hq", &roles).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.role == "access-switch"));

        let err = inventory.devices("branch-without-devices", &roles).await;
        assert!(matches!(err, Err(InventoryError::NoDevices { .. })));
    }
}
