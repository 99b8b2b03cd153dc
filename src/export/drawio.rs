/*!
draw.io (mxGraph XML) exporter.

Emits an `mxfile` document with one vendor-icon node per device on a fixed
grid and one edge per *device pair*: parallel links between the same two
devices are aggregated into a single LAG edge labeled with the member ports.
The format draws parallel member links of a port-channel as indistinguishable
overlapping lines, so the grouping is structural, not cosmetic.
*/

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use log::{info, warn};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use uuid::Uuid;

use crate::config::{DrawioSettings, LayerKind};
use crate::export::{DiagramExporter, ExportError};
use crate::topology::FilteredTopology;
use crate::topology::graph::Link;

pub struct DrawioExporter {
    settings: DrawioSettings,
    output: PathBuf,
}

/// Links collapsed onto one unordered device pair.
#[derive(Debug, Default)]
struct LinkGroup {
    /// Port pairs in (first device, second device) order of the pair key.
    ports: Vec<(String, String)>,
    confirmed: bool,
}

impl LinkGroup {
    fn is_lag(&self) -> bool {
        self.ports.len() > 1
    }
}

/// Groups links by their unordered device pair. Membership requires the
/// identical pairing of devices, not identical ports.
fn aggregate_links(links: &[Link]) -> BTreeMap<(String, String), LinkGroup> {
    let mut groups: BTreeMap<(String, String), LinkGroup> = BTreeMap::new();
    for link in links {
        // link endpoints are already in sorted key order
        let pair = (link.a.device.clone(), link.b.device.clone());
        let group = groups.entry(pair).or_default();
        group.ports.push((link.a.port.clone(), link.b.port.clone()));
        group.confirmed |= link.confirmed;
    }
    groups
}

/// Builds the label listing a group's ports on one side of the edge.
fn port_label(ports: &[(String, String)], side: usize, is_lag: bool, max_ports: usize) -> String {
    let pick = |pair: &(String, String)| if side == 0 { pair.0.clone() } else { pair.1.clone() };
    if !is_lag {
        return ports.first().map(pick).unwrap_or_default();
    }
    let mut label = String::from("LAG: ");
    for pair in ports.iter().take(max_ports) {
        label.push_str(&pick(pair));
        label.push(' ');
    }
    if ports.len() > max_ports {
        label.push_str(&format!("...and {} more", ports.len() - max_ports));
    }
    label.trim_end().to_string()
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ExportError> {
    writer
        .write_event(event)
        .map_err(|e| ExportError::Xml(e.to_string()))
}

fn cell_id(device_name: &str) -> String {
    format!(
        "device-{}",
        Uuid::new_v5(&Uuid::NAMESPACE_OID, device_name.as_bytes())
    )
}

impl DrawioExporter {
    pub fn new(settings: DrawioSettings, output: PathBuf) -> Self {
        Self { settings, output }
    }

    /// Pure serialization of the view into mxfile XML.
    pub fn build_document(&self, topology: &FilteredTopology) -> Result<String, ExportError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut mxfile = BytesStart::new("mxfile");
        mxfile.push_attribute(("host", "lldp-mapper"));
        mxfile.push_attribute(("agent", "lldp-mapper/0.1"));
        mxfile.push_attribute(("version", "1.0"));
        emit(&mut writer, Event::Start(mxfile))?;

        let mut diagram = BytesStart::new("diagram");
        diagram.push_attribute(("name", "Page-1"));
        diagram.push_attribute(("id", format!("topology_{}", topology.site).as_str()));
        emit(&mut writer, Event::Start(diagram))?;

        let mut model = BytesStart::new("mxGraphModel");
        for (key, value) in [
            ("dx", "1434"),
            ("dy", "844"),
            ("grid", "1"),
            ("gridSize", "10"),
            ("tooltips", "1"),
            ("connect", "1"),
            ("arrows", "1"),
            ("page", "1"),
            ("pageWidth", "1100"),
            ("pageHeight", "1100"),
        ] {
            model.push_attribute((key, value));
        }
        emit(&mut writer, Event::Start(model))?;
        emit(&mut writer, Event::Start(BytesStart::new("root")))?;

        let mut layer0 = BytesStart::new("mxCell");
        layer0.push_attribute(("id", "0"));
        emit(&mut writer, Event::Empty(layer0))?;
        let mut layer1 = BytesStart::new("mxCell");
        layer1.push_attribute(("id", "1"));
        layer1.push_attribute(("parent", "0"));
        emit(&mut writer, Event::Empty(layer1))?;

        // later layers sit on top in draw.io's z-order
        for layer in &self.settings.layer_order {
            match layer {
                LayerKind::Connections => self.write_connections(&mut writer, topology)?,
                LayerKind::Devices => self.write_devices(&mut writer, topology)?,
            }
        }

        emit(&mut writer, Event::End(BytesEnd::new("root")))?;
        emit(&mut writer, Event::End(BytesEnd::new("mxGraphModel")))?;
        emit(&mut writer, Event::End(BytesEnd::new("diagram")))?;
        emit(&mut writer, Event::End(BytesEnd::new("mxfile")))?;

        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }

    fn device_style(&self, role: &str) -> String {
        let icon = self
            .settings
            .icons
            .get(role)
            .unwrap_or(&self.settings.default_icon);
        let d = &self.settings.device_style;
        format!(
            "{icon}fillColor={};strokeColor={};verticalLabelPosition=bottom;align=center;\
             verticalAlign=top;aspect=fixed;",
            d.fill_color, d.stroke_color
        )
    }

    fn write_devices(
        &self,
        writer: &mut Writer<Vec<u8>>,
        topology: &FilteredTopology,
    ) -> Result<(), ExportError> {
        let grid = &self.settings.grid;
        let d = &self.settings.device_style;
        let columns = if grid.columns == 0 {
            warn!("grid.columns must be at least 1; placing devices in a single column");
            1
        } else {
            grid.columns
        };
        for (idx, device) in topology.devices.values().enumerate() {
            let x = (idx % columns) as i64 * grid.horizontal_step + grid.initial_offset;
            let y = (idx / columns) as i64 * grid.vertical_step + grid.initial_offset;

            let mut cell = BytesStart::new("mxCell");
            cell.push_attribute(("id", cell_id(&device.name).as_str()));
            cell.push_attribute(("value", device.name.as_str()));
            cell.push_attribute(("style", self.device_style(&device.role).as_str()));
            cell.push_attribute(("vertex", "1"));
            cell.push_attribute(("parent", "1"));
            emit(writer, Event::Start(cell))?;

            let mut geometry = BytesStart::new("mxGeometry");
            geometry.push_attribute(("x", x.to_string().as_str()));
            geometry.push_attribute(("y", y.to_string().as_str()));
            geometry.push_attribute(("width", d.width.to_string().as_str()));
            geometry.push_attribute(("height", d.height.to_string().as_str()));
            geometry.push_attribute(("as", "geometry"));
            emit(writer, Event::Empty(geometry))?;

            emit(writer, Event::End(BytesEnd::new("mxCell")))?;
        }
        Ok(())
    }

    fn write_connections(
        &self,
        writer: &mut Writer<Vec<u8>>,
        topology: &FilteredTopology,
    ) -> Result<(), ExportError> {
        let styles = &self.settings.connection_styles;
        let labels = &self.settings.port_labels;
        for (idx, ((dev_a, dev_b), group)) in aggregate_links(&topology.links).iter().enumerate() {
            if !topology.devices.contains_key(dev_a) || !topology.devices.contains_key(dev_b) {
                warn!("skipping edge {dev_a} <-> {dev_b}: device missing from view");
                continue;
            }
            let conn_id = format!("conn-{idx}");
            let style = match (group.confirmed, group.is_lag()) {
                (true, false) => &styles.confirmed_single,
                (true, true) => &styles.confirmed_lag,
                (false, false) => &styles.oneway_single,
                (false, true) => &styles.oneway_lag,
            };

            let mut edge = BytesStart::new("mxCell");
            edge.push_attribute(("id", conn_id.as_str()));
            edge.push_attribute(("value", ""));
            edge.push_attribute(("style", style.as_str()));
            edge.push_attribute(("edge", "1"));
            edge.push_attribute(("parent", "1"));
            edge.push_attribute(("source", cell_id(dev_a).as_str()));
            edge.push_attribute(("target", cell_id(dev_b).as_str()));
            emit(writer, Event::Start(edge))?;
            let mut geometry = BytesStart::new("mxGeometry");
            geometry.push_attribute(("relative", "1"));
            geometry.push_attribute(("as", "geometry"));
            emit(writer, Event::Empty(geometry))?;
            emit(writer, Event::End(BytesEnd::new("mxCell")))?;

            let source_label = port_label(&group.ports, 0, group.is_lag(), labels.max_ports);
            let target_label = port_label(&group.ports, 1, group.is_lag(), labels.max_ports);
            if !source_label.is_empty() {
                self.write_port_label(
                    writer,
                    &conn_id,
                    &format!("{conn_id}-src"),
                    &source_label,
                    labels.source_position,
                )?;
            }
            if !target_label.is_empty() {
                self.write_port_label(
                    writer,
                    &conn_id,
                    &format!("{conn_id}-dst"),
                    &target_label,
                    labels.target_position,
                )?;
            }
        }
        Ok(())
    }

    fn write_port_label(
        &self,
        writer: &mut Writer<Vec<u8>>,
        conn_id: &str,
        label_id: &str,
        label: &str,
        position: f64,
    ) -> Result<(), ExportError> {
        let mut cell = BytesStart::new("mxCell");
        cell.push_attribute(("id", label_id));
        cell.push_attribute(("value", label));
        cell.push_attribute((
            "style",
            "edgeLabel;html=1;align=center;verticalAlign=middle;resizable=0;points=[];",
        ));
        cell.push_attribute(("vertex", "1"));
        cell.push_attribute(("connectable", "0"));
        cell.push_attribute(("parent", conn_id));
        emit(writer, Event::Start(cell))?;

        let mut geometry = BytesStart::new("mxGeometry");
        geometry.push_attribute(("x", position.to_string().as_str()));
        geometry.push_attribute(("relative", "1"));
        geometry.push_attribute(("as", "geometry"));
        emit(writer, Event::Start(geometry))?;
        let mut offset = BytesStart::new("mxPoint");
        offset.push_attribute(("as", "offset"));
        emit(writer, Event::Empty(offset))?;
        emit(writer, Event::End(BytesEnd::new("mxGeometry")))?;

        emit(writer, Event::End(BytesEnd::new("mxCell")))?;
        Ok(())
    }
}

#[async_trait]
impl DiagramExporter for DrawioExporter {
    async fn export(&self, topology: &FilteredTopology) -> Result<PathBuf, ExportError> {
        if topology.devices.is_empty() {
            return Err(ExportError::Empty);
        }
        let document = self.build_document(topology)?;
        tokio::fs::write(&self.output, document)
            .await
            .map_err(|source| ExportError::Io {
                path: self.output.clone(),
                source,
            })?;
        info!("draw.io diagram exported to {}", self.output.display());
        Ok(self.output.clone())
    }
}

mod tests {
    #[allow(unused_imports)]
    use super::*;
    #[allow(unused_imports)]
    use crate::collector::{CollectedDevice, CollectedInterface};
    #[allow(unused_imports)]
    use crate::config::Config;
    #[allow(unused_imports)]
    use crate::topology::TopologyGraph;
    #[allow(unused_imports)]
    use std::collections::HashSet;

    #[allow(dead_code)]
    fn lag_view() -> FilteredTopology {
        let config = Config::default();
        let mut graph = TopologyGraph::at_time("hq", &config.port_substitutions, 1000);
        let dev = |name: &str, interfaces: Vec<CollectedInterface>| CollectedDevice {
            name: name.to_string(),
            management_ip: String::new(),
            hostname: name.to_string(),
            model: String::new(),
            serial: String::new(),
            role: "access-switch".to_string(),
            interfaces,
        };
        let intf = |name: &str, rdev: &str, rport: &str| CollectedInterface {
            name: name.to_string(),
            remote_device: Some(rdev.to_string()),
            remote_port: Some(rport.to_string()),
        };
        // two parallel links sw-1 <-> sw-2, one link sw-1 <-> sw-3
        graph.add_device(dev(
            "sw-1",
            vec![
                intf("Gi0/1", "sw-2", "Gi0/1"),
                intf("Gi0/2", "sw-2", "Gi0/2"),
                intf("Gi0/3", "sw-3", "Gi0/3"),
            ],
        ));
        graph.add_device(dev(
            "sw-2",
            vec![intf("Gi0/1", "sw-1", "Gi0/1"), intf("Gi0/2", "sw-1", "Gi0/2")],
        ));
        graph.filtered(false, false, &HashSet::new())
    }

    #[test]
    fn test_lag_aggregation_groups_by_device_pair_only() {
        let view = lag_view();
        let groups = aggregate_links(&view.links);
        assert_eq!(groups.len(), 2);

        let lag = groups
            .get(&("sw-1".to_string(), "sw-2".to_string()))
            .expect("sw-1/sw-2 group");
        assert!(lag.is_lag());
        assert_eq!(lag.ports.len(), 2);
        assert!(lag.confirmed);

        let single = groups
            .get(&("sw-1".to_string(), "sw-3".to_string()))
            .expect("sw-1/sw-3 group");
        assert!(!single.is_lag());
        assert!(!single.confirmed);
    }

    #[test]
    fn test_lag_label_lists_member_ports_and_truncates() {
        let ports: Vec<(String, String)> = (1..=5)
            .map(|i| (format!("gi0/{i}"), format!("gi1/{i}")))
            .collect();
        let label = port_label(&ports, 0, true, 3);
        assert_eq!(label, "LAG: gi0/1 gi0/2 gi0/3 ...and 2 more");
        let label = port_label(&ports[..2], 1, true, 3);
        assert_eq!(label, "LAG: gi1/1 gi1/2");
        assert_eq!(port_label(&ports[..1], 0, false, 3), "gi0/1");
    }

    #[test]
    fn test_document_has_one_edge_per_device_pair() {
        let exporter = DrawioExporter::new(
            Config::default().drawio,
            PathBuf::from("t.drawio"),
        );
        let xml = exporter.build_document(&lag_view()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert_eq!(xml.matches("id=\"conn-").count(), 2 + 4); // 2 edges + 4 labels
        assert_eq!(xml.matches("edge=\"1\"").count(), 2);
        // three devices: sw-1, sw-2 and the sw-3 placeholder
        assert_eq!(xml.matches("vertex=\"1\" parent=\"1\"").count(), 3);
        // the LAG edge lists both member ports on one label
        assert!(xml.contains("LAG: gi0/1 gi0/2"));
        assert!(xml.contains("shape=link;"));
    }

    #[test]
    fn test_zero_column_grid_does_not_abort_the_export() {
        let mut settings = Config::default().drawio;
        settings.grid.columns = 0;
        let exporter = DrawioExporter::new(settings, PathBuf::from("t.drawio"));
        let xml = exporter.build_document(&lag_view()).unwrap();
        assert_eq!(xml.matches("vertex=\"1\" parent=\"1\"").count(), 3);
    }

    #[test]
    fn test_stable_cell_ids() {
        assert_eq!(cell_id("sw-1"), cell_id("sw-1"));
        assert_ne!(cell_id("sw-1"), cell_id("sw-2"));
    }
}
