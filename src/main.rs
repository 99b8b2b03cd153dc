/*!
LLDP topology mapper.

Polls every switch at a site for its LLDP neighbor table over SNMP, folds
the observations into a link graph together with the previous runs' cache,
and renders the result as a graphviz description and/or a draw.io diagram.
*/

mod collector;
mod config;
mod export;
mod inventory;
mod topology;

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use log::{LevelFilter, error, info, warn};
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use thiserror::Error;

use collector::snmp::SnmpNeighborCollector;
use collector::{CollectorOutcome, NeighborCollector};
use config::{Config, ConfigError};
use export::DiagramExporter;
use export::dot::DotExporter;
use export::drawio::DrawioExporter;
use inventory::{FileInventory, Inventory, InventoryError};
use topology::{TopologyCache, TopologyGraph};

/// Above this many links the per-link listing is noise; exports stay useful.
const SHOW_LINK_LIMIT: usize = 200;

#[derive(Parser)]
#[command(name = "lldp-mapper", version)]
#[command(about = "Discovers switch-to-switch topology from LLDP neighbor tables")]
struct Args {
    /// Site slug to discover, as named in the inventory file.
    #[arg(short, long)]
    site: String,

    /// TOML configuration file; every setting has a built-in default.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Inventory JSON file mapping sites to device lists.
    #[arg(short, long, default_value = "inventory.json")]
    inventory: PathBuf,

    /// Write the graphviz description (plus an SVG render when graphviz is
    /// installed).
    #[arg(long)]
    export_dot: bool,

    /// Write the draw.io diagram.
    #[arg(long)]
    export_drawio: bool,

    /// Drop links that only one side reported.
    #[arg(long)]
    only_bidirectional: bool,

    /// Device names or roles whose one-way links are kept even with
    /// --only-bidirectional (e.g. access points that never answer SNMP).
    #[arg(long = "allow-oneway", value_name = "NAME_OR_ROLE")]
    allow_oneway: Vec<String>,
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[tokio::main]
async fn main() {
    TermLogger::init(
        LevelFilter::Info,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("logger initialization");

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), RunError> {
    let config = Config::load(args.config.as_deref())?;
    let retention = config.retention_window()?;
    let snmp_timeout = config.snmp_timeout()?;
    let renderer_timeout = config.renderer_timeout()?;

    let inventory = FileInventory::new(args.inventory.clone());
    let devices = inventory.devices(&args.site, &config.roles).await?;
    info!(
        "found {} network devices at site {}",
        devices.len(),
        args.site
    );

    let mut graph = TopologyGraph::new(&args.site, &config.port_substitutions);
    let mut cache = TopologyCache::new(config.cache_file.clone(), &args.site, retention);
    cache.load(graph.snapshot_time());

    let collector =
        SnmpNeighborCollector::new(&config.community_field, &config.version_field, snmp_timeout);
    for descriptor in &devices {
        match collector.collect(descriptor).await {
            Ok(CollectorOutcome::Collected(device)) => graph.add_device(device),
            Ok(CollectorOutcome::Unreachable) => warn!(
                "{} did not answer; relying on cached and remote-side data",
                descriptor.name
            ),
            Err(e) => error!("skipping {}: {e}", descriptor.name),
        }
    }

    cache.merge_into(&mut graph);
    info!(
        "topology summary for site {}: {} devices, {} links",
        graph.site(),
        graph.device_count(),
        graph.link_count()
    );
    if graph.link_count() > SHOW_LINK_LIMIT {
        info!("many links found, skipping the detailed listing");
    } else {
        graph.show();
    }

    let exceptions: HashSet<String> = args.allow_oneway.iter().cloned().collect();
    let view = graph.filtered(args.only_bidirectional, false, &exceptions);

    if args.export_dot || args.export_drawio {
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(|source| RunError::OutputDir {
                path: config.output_dir.clone(),
                source,
            })?;

        let dot_task = async {
            if args.export_dot {
                let name =
                    dot_filename(&args.site, args.only_bidirectional, !exceptions.is_empty());
                let exporter =
                    DotExporter::new(&config, config.output_dir.join(name), renderer_timeout);
                if let Err(e) = exporter.export(&view).await {
                    error!("DOT export failed: {e}");
                }
            }
        };
        let drawio_task = async {
            if args.export_drawio {
                let name = drawio_filename(&args.site, args.only_bidirectional);
                let exporter =
                    DrawioExporter::new(config.drawio.clone(), config.output_dir.join(name));
                if let Err(e) = exporter.export(&view).await {
                    error!("draw.io export failed: {e}");
                }
            }
        };
        tokio::join!(dot_task, drawio_task);
    }

    if let Err(e) = cache.save(&graph) {
        error!("could not persist the topology cache: {e}");
    }
    Ok(())
}

fn dot_filename(site: &str, bidirectional: bool, mixed: bool) -> String {
    let suffix = match (bidirectional, mixed) {
        (true, true) => "_bi_mixed",
        (true, false) => "_bi",
        (false, _) => "",
    };
    format!("topology_{site}{suffix}.dot")
}

fn drawio_filename(site: &str, bidirectional: bool) -> String {
    let suffix = if bidirectional { "_bi" } else { "" };
    format!("topology_{site}{suffix}.drawio")
}

mod tests {
    #[allow(unused_imports)]
    use super::*;

    #[test]
    fn test_export_filenames() {
        assert_eq!(dot_filename("hq", false, false), "topology_hq.dot");
        assert_eq!(dot_filename("hq", true, false), "topology_hq_bi.dot");
        assert_eq!(dot_filename("hq", true, true), "topology_hq_bi_mixed.dot");
        // the mixed marker only applies together with the bidirectional filter
        assert_eq!(dot_filename("hq", false, true), "topology_hq.dot");
        assert_eq!(drawio_filename("hq", true), "topology_hq_bi.drawio");
    }
}
