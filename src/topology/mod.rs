/*!
Topology engine

This module defines:
- `ports`: canonicalization of vendor interface-name spellings.
- `graph`: the in-memory device/link model, bidirectionality policy and
  filtered views.
- `cache`: persistence of observed links across runs with a retention window.
*/

pub mod cache;
pub mod graph;
pub mod ports;

pub use cache::TopologyCache;
pub use graph::{FilteredTopology, TopologyGraph};
