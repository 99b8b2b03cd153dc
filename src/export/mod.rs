/*!
Diagram exporters.

This module defines:
- `DiagramExporter`: the shared capability — produce a serialized diagram
  artifact from a filtered topology view. Implementations never mutate the
  view and fail independently of each other.
- `dot`: graph-description output plus an external graphviz render pass.
- `drawio`: draw.io XML output with LAG aggregation.
*/

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::topology::FilteredTopology;

pub mod dot;
pub mod drawio;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: the filtered topology has no devices")]
    Empty,
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("xml serialization failed: {0}")]
    Xml(String),
}

#[async_trait]
pub trait DiagramExporter: Send + Sync {
    /// Writes the diagram artifact and returns its path.
    async fn export(&self, topology: &FilteredTopology) -> Result<PathBuf, ExportError>;
}
