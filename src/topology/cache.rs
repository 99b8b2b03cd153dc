/*!
Persistence of observed links across runs.

The cache bridges transient polling failures: a link confirmed on an earlier
run still appears on the diagram when one (or both) of its devices fails to
answer this run, until the entry ages past the retention window.

The file is JSON keyed by site, so several sites can share one cache file;
saving rewrites only the current site's section.
*/

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::graph::{Endpoint, LinkKey, TopologyGraph};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cache file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Persisted form of one link. Ports are stored normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    source_device: String,
    source_port: String,
    target_device: String,
    target_port: String,
    #[serde(default)]
    bidirectional: bool,
    #[serde(default)]
    last_seen: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SiteSection {
    connections: Vec<CacheEntry>,
}

type CacheFile = HashMap<String, SiteSection>;

/// Loads, merges and saves cached links for one site.
pub struct TopologyCache {
    path: PathBuf,
    site: String,
    retention: Duration,
    entries: Vec<CacheEntry>,
}

impl TopologyCache {
    pub fn new(path: PathBuf, site: impl Into<String>, retention: Duration) -> Self {
        Self {
            path,
            site: site.into(),
            retention,
            entries: Vec::new(),
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.entries.len()
    }

    /// Reads the persisted state for this cache's site, discarding entries
    /// older than the retention window. Any failure degrades to a cold start;
    /// a file that exists but does not parse is backed up out of the way so
    /// the next save starts clean.
    pub fn load(&mut self, now: u64) {
        let data = match self.read_file() {
            Ok(data) => data,
            Err(e @ CacheError::Parse { .. }) => {
                error!("ignoring cache: {e}");
                self.backup_invalid();
                return;
            }
            Err(e) => {
                error!("ignoring cache: {e}");
                return;
            }
        };
        let Some(section) = data.get(&self.site) else {
            info!("no cached data for site {}", self.site);
            return;
        };
        let cutoff = now.saturating_sub(self.retention.as_secs());
        let total = section.connections.len();
        self.entries = section
            .connections
            .iter()
            .filter(|entry| entry.last_seen >= cutoff)
            .cloned()
            .collect();
        let expired = total - self.entries.len();
        if expired > 0 {
            info!("expired {expired} cached links past the retention window");
        }
        info!(
            "loaded {} cached links for site {}",
            self.entries.len(),
            self.site
        );
    }

    fn read_file(&self) -> Result<CacheFile, CacheError> {
        if !self.path.is_file() {
            return Ok(CacheFile::default());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Moves an unreadable cache file aside instead of silently overwriting
    /// it, so the broken state can still be inspected.
    fn backup_invalid(&self) {
        let backup = self
            .path
            .with_extension(format!("invalid.{}", crate::topology::graph::epoch_now()));
        match std::fs::rename(&self.path, &backup) {
            Ok(()) => warn!("invalid cache backed up to {}", backup.display()),
            Err(e) => error!("failed to back up invalid cache: {e}"),
        }
    }

    /// Seeds the graph with cached links that were not re-observed this run,
    /// keeping their original timestamp and confirmation. For links that were
    /// re-observed from only one side, the cached confirmation is restored.
    pub fn merge_into(&self, graph: &mut TopologyGraph) {
        let mut seeded = 0usize;
        for entry in &self.entries {
            let key = match LinkKey::new(
                Endpoint::new(&entry.source_device, &entry.source_port),
                Endpoint::new(&entry.target_device, &entry.target_port),
            ) {
                Ok(key) => key,
                Err(e) => {
                    warn!("skipping cached entry: {e}");
                    continue;
                }
            };
            match graph.get_link(&key) {
                None => {
                    graph.insert_cached(key, entry.bidirectional, entry.last_seen);
                    seeded += 1;
                }
                Some(link) => {
                    if entry.bidirectional && !link.confirmed {
                        graph.confirm_from_cache(&key);
                    }
                }
            }
        }
        if seeded > 0 {
            info!("seeded {seeded} links from cache");
        }
    }

    /// Persists every link in the graph's table, confirmed or not, so a
    /// one-way observation that completes its confirmation on a later run is
    /// not lost. Entries carried over from cache keep their original
    /// timestamp; freshly observed ones already carry this run's.
    pub fn save(&self, graph: &TopologyGraph) -> Result<(), CacheError> {
        // keep other sites' sections intact
        let mut data = match self.read_file() {
            Ok(data) => data,
            Err(e) => {
                warn!("starting a fresh cache file, other sites' sections are lost: {e}");
                CacheFile::default()
            }
        };

        let connections = graph
            .links()
            .map(|link| CacheEntry {
                source_device: link.a.device.clone(),
                source_port: link.a.port.clone(),
                target_device: link.b.device.clone(),
                target_port: link.b.port.clone(),
                bidirectional: link.confirmed,
                last_seen: link.last_seen,
            })
            .collect();
        data.insert(self.site.clone(), SiteSection { connections });

        let text = serde_json::to_string_pretty(&data).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, text).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!("cache saved for site {}: {}", self.site, self.path.display());
        Ok(())
    }
}

mod tests {
    #[allow(unused_imports)]
    use super::*;
    #[allow(unused_imports)]
    use crate::collector::{CollectedDevice, CollectedInterface};
    #[allow(unused_imports)]
    use crate::topology::graph::Provenance;
    #[allow(unused_imports)]
    use std::collections::HashSet;

    #[allow(dead_code)]
    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    #[allow(dead_code)]
    fn subs() -> Vec<(String, String)> {
        crate::config::Config::default().port_substitutions
    }

    #[allow(dead_code)]
    fn temp_cache_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lldp-mapper-{tag}-{}.json", std::process::id()))
    }

    #[allow(dead_code)]
    fn fixture_cache(path: PathBuf) -> TopologyCache {
        let fixture = include_str!("../../test_data/test_cache.json");
        std::fs::write(&path, fixture).unwrap();
        TopologyCache::new(path, "hq", WEEK)
    }

    #[test]
    fn test_load_expires_old_entries_and_isolates_sites() {
        let path = temp_cache_path("load");
        let mut cache = fixture_cache(path.clone());
        // fixture: hq has one 2-day-old entry and one 30-day-old entry
        cache.load(1_700_200_000);
        assert_eq!(cache.loaded_count(), 1);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_cached_confirmed_link_survives_two_unreachable_devices() {
        let path = temp_cache_path("survive");
        let mut cache = fixture_cache(path.clone());
        cache.load(1_700_200_000);

        // neither X nor Z answered this run: graph has no observations
        let mut graph = TopologyGraph::at_time("hq", &subs(), 1_700_200_000);
        cache.merge_into(&mut graph);

        let empty = HashSet::new();
        let view = graph.filtered(true, false, &empty);
        assert_eq!(view.links.len(), 1);
        let link = &view.links[0];
        assert!(link.confirmed);
        assert_eq!(link.provenance, Provenance::Cached);
        assert_eq!(link.last_seen, 1_700_027_200);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_malformed_cache_is_cold_start() {
        let path = temp_cache_path("malformed");
        std::fs::write(&path, "{ not json").unwrap();
        let mut cache = TopologyCache::new(path.clone(), "hq", WEEK);
        cache.load(1_700_200_000);
        assert_eq!(cache.loaded_count(), 0);
        // the broken file was moved aside
        assert!(!path.exists());
        let backup_dir = path.parent().unwrap();
        for entry in std::fs::read_dir(backup_dir).unwrap().flatten() {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with("lldp-mapper-malformed")
            {
                std::fs::remove_file(entry.path()).unwrap();
            }
        }
    }

    #[test]
    fn test_round_trip_reproduces_permitted_links() {
        let path = temp_cache_path("roundtrip");
        let now = 2000;
        let mut graph = TopologyGraph::at_time("hq", &subs(), now);
        let dev = |name: &str, port: &str, rdev: &str, rport: &str| CollectedDevice {
            name: name.to_string(),
            management_ip: String::new(),
            hostname: name.to_string(),
            model: String::new(),
            serial: String::new(),
            role: "access-switch".to_string(),
            interfaces: vec![CollectedInterface {
                name: port.to_string(),
                remote_device: Some(rdev.to_string()),
                remote_port: Some(rport.to_string()),
            }],
        };
        graph.add_device(dev("X", "Gi0/1", "Y", "Gi0/1"));
        graph.add_device(dev("Y", "Gi0/1", "X", "Gi0/1"));
        // one-way leftovers are persisted too
        graph.add_device(dev("Z", "Gi0/9", "W", "Gi0/9"));

        let cache = TopologyCache::new(path.clone(), "hq", WEEK);
        cache.save(&graph).unwrap();

        let mut reloaded = TopologyCache::new(path.clone(), "hq", WEEK);
        reloaded.load(now + 60);
        let mut fresh = TopologyGraph::at_time("hq", &subs(), now + 60);
        reloaded.merge_into(&mut fresh);

        let empty = HashSet::new();
        for (graph_view, fresh_view) in [
            (graph.filtered(true, false, &empty), fresh.filtered(true, false, &empty)),
            (graph.filtered(false, false, &empty), fresh.filtered(false, false, &empty)),
        ] {
            let keys = |view: &crate::topology::graph::FilteredTopology| {
                view.links.iter().map(|l| l.key()).collect::<Vec<_>>()
            };
            assert_eq!(keys(&graph_view), keys(&fresh_view));
        }
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_save_over_unreadable_file_starts_fresh() {
        let path = temp_cache_path("save-fresh");
        std::fs::write(&path, "{ not json").unwrap();

        let mut graph = TopologyGraph::at_time("hq", &subs(), 4000);
        graph.add_device(CollectedDevice {
            name: "X".to_string(),
            management_ip: String::new(),
            hostname: "X".to_string(),
            model: String::new(),
            serial: String::new(),
            role: "access-switch".to_string(),
            interfaces: vec![CollectedInterface {
                name: "Gi0/1".to_string(),
                remote_device: Some("Y".to_string()),
                remote_port: Some("Gi0/1".to_string()),
            }],
        });
        let cache = TopologyCache::new(path.clone(), "hq", WEEK);
        cache.save(&graph).unwrap();

        // the rewritten file parses and holds the current site's links
        let text = std::fs::read_to_string(&path).unwrap();
        let data: HashMap<String, SiteSection> = serde_json::from_str(&text).unwrap();
        assert_eq!(data.get("hq").unwrap().connections.len(), 1);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_save_preserves_other_sites() {
        let path = temp_cache_path("other-sites");
        let cache = fixture_cache(path.clone());
        let graph = TopologyGraph::at_time("hq", &subs(), 3000);
        cache.save(&graph).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let data: HashMap<String, SiteSection> = serde_json::from_str(&text).unwrap();
        // hq rewritten from the (empty) graph, branch untouched
        assert!(data.get("hq").unwrap().connections.is_empty());
        assert_eq!(data.get("branch").unwrap().connections.len(), 1);
        std::fs::remove_file(path).unwrap();
    }
}
