/*!
Graph-description (DOT) exporter.

Writes one styled node statement per device and one edge statement per link,
then hands the file to graphviz for an SVG render. The render pass runs as a
bounded subprocess: graphviz missing, failing or hanging downgrades to a
warning and the `.dot` artifact still counts as a successful export.
*/

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};

use crate::config::Config;
use crate::export::{DiagramExporter, ExportError};
use crate::topology::FilteredTopology;

pub struct DotExporter {
    config: Config,
    output: PathBuf,
    renderer_timeout: Duration,
}

impl DotExporter {
    pub fn new(config: &Config, output: PathBuf, renderer_timeout: Duration) -> Self {
        Self {
            config: config.clone(),
            output,
            renderer_timeout,
        }
    }

    /// Pure serialization of the view into DOT text.
    pub fn render_description(&self, topology: &FilteredTopology) -> String {
        let mut out = String::new();
        let s = &self.config.dot;
        let _ = writeln!(out, "digraph network {{");
        let _ = writeln!(out, "  rankdir={};", s.rankdir);
        let _ = writeln!(
            out,
            "  node [fontname=\"{}\", fontsize=\"{}\"];",
            s.node_fontname, s.node_fontsize
        );
        let _ = writeln!(
            out,
            "  edge [fontname=\"{}\", fontsize=\"{}\"];\n",
            s.edge_fontname, s.edge_fontsize
        );

        for device in topology.devices.values() {
            let style = self.config.node_style(&device.role).as_dot_attrs();
            let _ = writeln!(
                out,
                "  \"{}\" [{}, label=\"{}\\n{}\", tooltip=\"{}\"];",
                escape(&device.name),
                style,
                escape(&device.name),
                escape(&device.model),
                escape(&device.management_ip)
            );
        }
        out.push('\n');

        for link in &topology.links {
            if link.confirmed {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\" [dir=both, label=\"{}\\n{}\"];",
                    escape(&link.a.device),
                    escape(&link.b.device),
                    escape(&link.a.port),
                    escape(&link.b.port)
                );
            } else {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\" [label=\"{}\"];",
                    escape(&link.a.device),
                    escape(&link.b.device),
                    escape(&link.a.port)
                );
            }
        }
        out.push_str("}\n");
        out
    }

    /// Invokes `dot -Tsvg` under a timeout. Never fails the export.
    async fn render_svg(&self) {
        let svg_path = PathBuf::from(format!("{}.svg", self.output.display()));
        let child = tokio::process::Command::new("dot")
            .arg("-Tsvg")
            .arg(&self.output)
            .arg("-o")
            .arg(&svg_path)
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("could not run graphviz (is it installed?): {e}");
                return;
            }
        };
        match tokio::time::timeout(self.renderer_timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                info!("SVG rendered: {}", svg_path.display());
            }
            Ok(Ok(status)) => warn!("graphviz exited with {status}"),
            Ok(Err(e)) => warn!("graphviz failed to run: {e}"),
            Err(_) => {
                warn!(
                    "graphviz timed out after {}; killing it",
                    humantime::format_duration(self.renderer_timeout)
                );
                if let Err(e) = child.kill().await {
                    warn!("failed to kill graphviz: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl DiagramExporter for DotExporter {
    async fn export(&self, topology: &FilteredTopology) -> Result<PathBuf, ExportError> {
        if topology.devices.is_empty() {
            return Err(ExportError::Empty);
        }
        let text = self.render_description(topology);
        tokio::fs::write(&self.output, text)
            .await
            .map_err(|source| ExportError::Io {
                path: self.output.clone(),
                source,
            })?;
        info!("DOT exported to {}", self.output.display());
        self.render_svg().await;
        Ok(self.output.clone())
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

mod tests {
    #[allow(unused_imports)]
    use super::*;
    #[allow(unused_imports)]
    use crate::collector::{CollectedDevice, CollectedInterface};
    #[allow(unused_imports)]
    use crate::topology::TopologyGraph;
    #[allow(unused_imports)]
    use std::collections::HashSet;

    #[allow(dead_code)]
    fn sample_view() -> FilteredTopology {
        let config = Config::default();
        let mut graph = TopologyGraph::at_time("hq", &config.port_substitutions, 1000);
        let dev = |name: &str, role: &str, interfaces: Vec<CollectedInterface>| CollectedDevice {
            name: name.to_string(),
            management_ip: "10.0.0.9".to_string(),
            hostname: name.to_string(),
            model: "C9200".to_string(),
            serial: String::new(),
            role: role.to_string(),
            interfaces,
        };
        let intf = |name: &str, rdev: &str, rport: &str| CollectedInterface {
            name: name.to_string(),
            remote_device: Some(rdev.to_string()),
            remote_port: Some(rport.to_string()),
        };
        graph.add_device(dev(
            "sw-1",
            "access-switch",
            vec![intf("Gi0/1", "sw-2", "Gi0/1"), intf("Gi0/2", "sw-3", "Gi0/2")],
        ));
        graph.add_device(dev("sw-2", "l3-switch", vec![intf("Gi0/1", "sw-1", "Gi0/1")]));
        graph.filtered(false, false, &HashSet::new())
    }

    #[test]
    fn test_dot_output_structure() {
        let config = Config::default();
        let exporter = DotExporter::new(&config, PathBuf::from("t.dot"), Duration::from_secs(5));
        let text = exporter.render_description(&sample_view());

        assert!(text.starts_with("digraph network {"));
        assert!(text.contains("rankdir=TB;"));
        // role-styled node
        assert!(text.contains("\"sw-2\" [fillcolor=\"lightpink\""));
        // the unpolled sw-3 placeholder still gets the DEFAULT style
        assert!(text.contains("\"sw-3\" [fillcolor=\"white\""));
        // confirmed link is double-headed and labels both ports
        assert!(text.contains("\"sw-1\" -> \"sw-2\" [dir=both, label=\"gi0/1\\ngi0/1\"];"));
        // one-way link keeps a single head and the reporting side's port
        assert!(text.contains("\"sw-1\" -> \"sw-3\" [label=\"gi0/2\"];"));
        assert!(text.trim_end().ends_with('}'));
    }

    #[test]
    fn test_style_table_without_default_renders_valid_attributes() {
        let mut config = Config::default();
        config.node_styles.clear();
        let exporter = DotExporter::new(&config, PathBuf::from("t.dot"), Duration::from_secs(5));
        let text = exporter.render_description(&sample_view());

        // every node line carries a complete attribute list
        assert!(!text.contains("[,"));
        assert!(text.contains("\"sw-1\" [fillcolor=\"white\""));
        assert!(text.contains("\"sw-2\" [fillcolor=\"white\""));
    }

    #[test]
    fn test_quotes_in_names_are_escaped() {
        let config = Config::default();
        let exporter = DotExporter::new(&config, PathBuf::from("t.dot"), Duration::from_secs(5));
        let mut view = sample_view();
        let mut renamed = view.devices.get("sw-1").unwrap().clone();
        renamed.name = "sw\"1".to_string();
        view.devices.insert(renamed.name.clone(), renamed);
        let text = exporter.render_description(&view);
        assert!(text.contains("\"sw\\\"1\""));
    }
}
