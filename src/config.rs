/*!
Runtime configuration for the topology mapper.

This module defines:
- `Config`: the explicit configuration structure handed to the graph and the
  exporters at construction (role list, port-substitution table, style tables,
  cache path, retention window, draw.io layout settings).
- `ConfigError`: failures while reading or validating a configuration file.

The built-in `Default` carries a working Cisco-flavoured setup; a TOML file
given with `--config` overrides any subset of it.
*/

use std::{collections::BTreeMap, path::{Path, PathBuf}, time::Duration};

use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    #[error("invalid duration {value:?} for {field}: {source}")]
    Duration {
        field: &'static str,
        value: String,
        source: humantime::DurationError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device roles that participate in topology discovery (mostly switches).
    pub roles: Vec<String>,
    /// Vendor interface-name spellings and their canonical short forms.
    /// Applied longest-spelling-first so `TenGigabitEthernet` never gets
    /// clipped by the `GigabitEthernet` rule.
    pub port_substitutions: Vec<(String, String)>,
    /// Inventory custom-field name holding the SNMP community string.
    pub community_field: String,
    /// Inventory custom-field name holding the SNMP version.
    pub version_field: String,
    pub cache_file: PathBuf,
    /// Maximum age of a cached link before it is no longer trusted,
    /// e.g. "7d" or "36h".
    pub retention: String,
    pub output_dir: PathBuf,
    /// Upper bound on a single SNMP operation.
    pub snmp_timeout: String,
    /// Upper bound on the external graphviz invocation.
    pub renderer_timeout: String,
    pub dot: DotSettings,
    /// DOT node styles keyed by device role; the `DEFAULT` entry is the fallback.
    pub node_styles: BTreeMap<String, NodeStyle>,
    pub drawio: DrawioSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DotSettings {
    pub rankdir: String,
    pub node_fontname: String,
    pub node_fontsize: u32,
    pub edge_fontname: String,
    pub edge_fontsize: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeStyle {
    pub fillcolor: String,
    pub style: String,
    pub shape: String,
}

impl NodeStyle {
    /// Renders the style as a DOT attribute list fragment.
    pub fn as_dot_attrs(&self) -> String {
        format!(
            "fillcolor=\"{}\", style=\"{}\", shape=\"{}\"",
            self.fillcolor, self.style, self.shape
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DrawioSettings {
    pub grid: GridSettings,
    /// Later layers are drawn on top; the default puts devices over edges.
    pub layer_order: Vec<LayerKind>,
    pub device_style: DeviceStyle,
    pub connection_styles: ConnectionStyles,
    pub port_labels: PortLabelSettings,
    /// Vendor icon style fragments keyed by device role.
    pub icons: BTreeMap<String, String>,
    pub default_icon: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Connections,
    Devices,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub columns: usize,
    pub horizontal_step: i64,
    pub vertical_step: i64,
    pub initial_offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceStyle {
    pub fill_color: String,
    pub stroke_color: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionStyles {
    pub confirmed_single: String,
    pub confirmed_lag: String,
    pub oneway_single: String,
    pub oneway_lag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortLabelSettings {
    /// Position along the edge: -1.0 at the source, 0 in the middle, 1.0 at the target.
    pub source_position: f64,
    pub target_position: f64,
    /// Ports listed on a LAG label before collapsing into "...and N more".
    pub max_ports: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roles: [
                "poe-switch",
                "access-switch",
                "aggregation-switch",
                "industrial-switch",
                "l3-switch",
                "server-switch",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            port_substitutions: [
                ("hundredgigabitethernet", "hu"),
                ("fortygigabitethernet", "fo"),
                ("tengigabitethernet", "te"),
                ("gigabitethernet", "gi"),
                ("fastethernet", "fa"),
                ("port-channel", "po"),
                ("ethernet", "et"),
            ]
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect(),
            community_field: "snmp_community".to_string(),
            version_field: "snmp_version".to_string(),
            cache_file: PathBuf::from("topology_cache.json"),
            retention: "7d".to_string(),
            output_dir: PathBuf::from("diagrams"),
            snmp_timeout: "5s".to_string(),
            renderer_timeout: "30s".to_string(),
            dot: DotSettings::default(),
            node_styles: default_node_styles(),
            drawio: DrawioSettings::default(),
        }
    }
}

impl Default for DotSettings {
    fn default() -> Self {
        Self {
            rankdir: "TB".to_string(),
            node_fontname: "Arial".to_string(),
            node_fontsize: 10,
            edge_fontname: "Arial".to_string(),
            edge_fontsize: 8,
        }
    }
}

impl Default for DrawioSettings {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            layer_order: vec![LayerKind::Connections, LayerKind::Devices],
            device_style: DeviceStyle::default(),
            connection_styles: ConnectionStyles::default(),
            port_labels: PortLabelSettings::default(),
            icons: default_icons(),
            default_icon: "shape=mxgraph.cisco_safe.design.blank_device;".to_string(),
        }
    }
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            columns: 5,
            horizontal_step: 180,
            vertical_step: 140,
            initial_offset: 100,
        }
    }
}

impl Default for DeviceStyle {
    fn default() -> Self {
        Self {
            fill_color: "#FAFAFA".to_string(),
            stroke_color: "#005073".to_string(),
            width: 50,
            height: 50,
        }
    }
}

impl Default for ConnectionStyles {
    fn default() -> Self {
        Self {
            confirmed_single: "endArrow=classic;startArrow=classic;html=1;rounded=0;".to_string(),
            confirmed_lag: "endArrow=classic;startArrow=classic;html=1;rounded=0;shape=link;"
                .to_string(),
            oneway_single: "endArrow=classic;html=1;rounded=0;".to_string(),
            oneway_lag: "endArrow=classic;html=1;rounded=0;shape=link;".to_string(),
        }
    }
}

impl Default for PortLabelSettings {
    fn default() -> Self {
        Self {
            source_position: -0.5,
            target_position: 0.5,
            max_ports: 3,
        }
    }
}

fn default_node_styles() -> BTreeMap<String, NodeStyle> {
    let filled = |fillcolor: &str| NodeStyle {
        fillcolor: fillcolor.to_string(),
        style: "rounded,filled".to_string(),
        shape: "box".to_string(),
    };
    let mut styles = BTreeMap::new();
    styles.insert("poe-switch".to_string(), filled("lightblue"));
    styles.insert("access-switch".to_string(), filled("lightyellow"));
    styles.insert("aggregation-switch".to_string(), filled("lightgreen"));
    styles.insert("industrial-switch".to_string(), filled("lightsalmon"));
    styles.insert("l3-switch".to_string(), filled("lightpink"));
    styles.insert("server-switch".to_string(), filled("lightcyan"));
    styles.insert(
        "DEFAULT".to_string(),
        NodeStyle {
            fillcolor: "white".to_string(),
            style: "rounded".to_string(),
            shape: "box".to_string(),
        },
    );
    styles
}

fn default_icons() -> BTreeMap<String, String> {
    let l2 = "shape=mxgraph.cisco19.rect;prIcon=l2_switch;".to_string();
    let mut icons = BTreeMap::new();
    icons.insert("poe-switch".to_string(), l2.clone());
    icons.insert("access-switch".to_string(), l2.clone());
    icons.insert("aggregation-switch".to_string(), l2.clone());
    icons.insert("industrial-switch".to_string(), l2.clone());
    icons.insert("server-switch".to_string(), l2);
    icons.insert(
        "l3-switch".to_string(),
        "shape=mxgraph.cisco19.rect;prIcon=l3_switch;".to_string(),
    );
    icons
}

impl Config {
    /// Loads the configuration, falling back to the built-in defaults when no
    /// file is given. A missing or malformed file is an error: unlike the
    /// cache, a config the operator pointed at explicitly must parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Ok(config)
    }

    pub fn retention_window(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.retention, "retention")
    }

    pub fn snmp_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.snmp_timeout, "snmp_timeout")
    }

    pub fn renderer_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.renderer_timeout, "renderer_timeout")
    }

    /// Style for a role, via the table's `DEFAULT` entry when the role is
    /// unknown. A user-supplied table without a `DEFAULT` entry still gets a
    /// complete attribute set, never an empty fragment.
    pub fn node_style(&self, role: &str) -> &NodeStyle {
        self.node_styles
            .get(role)
            .or_else(|| self.node_styles.get("DEFAULT"))
            .unwrap_or(&FALLBACK_STYLE)
    }
}

static FALLBACK_STYLE: Lazy<NodeStyle> = Lazy::new(|| NodeStyle {
    fillcolor: "white".to_string(),
    style: "rounded".to_string(),
    shape: "box".to_string(),
});

fn parse_duration(value: &str, field: &'static str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|source| ConfigError::Duration {
        field,
        value: value.to_string(),
        source,
    })
}

mod tests {
    #[allow(unused_imports)]
    use super::*;

    #[test]
    fn test_default_config_durations_parse() {
        let config = Config::default();
        assert_eq!(
            config.retention_window().unwrap(),
            Duration::from_secs(7 * 24 * 3600)
        );
        assert_eq!(config.snmp_timeout().unwrap(), Duration::from_secs(5));
        assert_eq!(config.renderer_timeout().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_role_falls_back_to_default_style() {
        let config = Config::default();
        assert_eq!(config.node_style("elevator-music-switch").fillcolor, "white");
        assert_eq!(config.node_style("l3-switch").fillcolor, "lightpink");
    }

    #[test]
    fn test_style_table_without_default_entry_still_yields_full_style() {
        let mut config = Config::default();
        config.node_styles.clear();
        let style = config.node_style("access-switch");
        assert_eq!(style.fillcolor, "white");
        assert_eq!(style.style, "rounded");
        assert_eq!(style.shape, "box");
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_text = r#"
            retention = "36h"
            roles = ["core-switch"]
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.roles, vec!["core-switch".to_string()]);
        assert_eq!(
            config.retention_window().unwrap(),
            Duration::from_secs(36 * 3600)
        );
        // untouched sections keep their defaults
        assert_eq!(config.drawio.grid.columns, 5);
        assert_eq!(config.port_substitutions.len(), 7);
    }
}
