//! Predefined graph catalog
//!
//! Graphs are read from mavgraphs-style XML:
//!
//! ```xml
//! <graphs>
//!   <graph name='Flight/Altitude'>
//!     <description>Barometric and GPS altitude</description>
//!     <expression>BARO.Alt GPS.Alt:2</expression>
//!   </graph>
//! </graphs>
//! ```
//!
//! A graph may list several `<expression>` alternatives; each is kept.

use crate::error::{ExplorerError, Result};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const BUILTIN_GRAPHS: &str = include_str!("../graphs/mavgraphs.xml");

/// One predefined graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphDefinition {
    /// '/'-separated path, e.g. "GPS/Altitude"
    pub name: String,
    pub expressions: Vec<String>,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct GraphsXml {
    #[serde(rename = "graph", default)]
    graphs: Vec<GraphXml>,
}

#[derive(Debug, Deserialize)]
struct GraphXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "expression", default)]
    expressions: Vec<String>,
}

/// Graph definitions, loaded once at startup and read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct GraphCatalog {
    graphs: Vec<GraphDefinition>,
}

impl GraphCatalog {
    /// Catalog compiled into the binary
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::default();
        catalog.extend(parse_graph_xml(BUILTIN_GRAPHS)?);
        Ok(catalog)
    }

    /// Load XML catalogs from files or glob patterns, in sorted path order
    pub fn load_patterns(patterns: &[String]) -> Result<Self> {
        let mut catalog = Self::default();
        for path in expand_patterns(patterns)? {
            let xml = std::fs::read_to_string(&path).map_err(|e| {
                ExplorerError::Catalog(format!("cannot read {}: {}", path.display(), e))
            })?;
            let graphs = parse_graph_xml(&xml).map_err(|e| {
                ExplorerError::Catalog(format!("{}: {}", path.display(), e))
            })?;
            debug!(path = %path.display(), graphs = graphs.len(), "loaded graph file");
            catalog.extend(graphs);
        }
        info!(graphs = catalog.len(), "graph catalog loaded");
        Ok(catalog)
    }

    /// Add graphs; a name already present is replaced in place
    pub fn extend(&mut self, graphs: Vec<GraphDefinition>) {
        for graph in graphs {
            match self.graphs.iter_mut().find(|g| g.name == graph.name) {
                Some(existing) => *existing = graph,
                None => self.graphs.push(graph),
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&GraphDefinition> {
        self.graphs
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| ExplorerError::UnknownGraph(name.to_string()))
    }

    pub fn graphs(&self) -> &[GraphDefinition] {
        &self.graphs
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

/// Parse one catalog document. Graphs without expressions are dropped.
pub fn parse_graph_xml(xml: &str) -> Result<Vec<GraphDefinition>> {
    let doc: GraphsXml =
        quick_xml::de::from_str(xml).map_err(|e| ExplorerError::Catalog(e.to_string()))?;
    Ok(doc
        .graphs
        .into_iter()
        .filter_map(|g| {
            let expressions: Vec<String> = g
                .expressions
                .iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
            if g.name.trim().is_empty() || expressions.is_empty() {
                return None;
            }
            Some(GraphDefinition {
                name: g.name.trim().to_string(),
                expressions,
                description: g
                    .description
                    .map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
                    .unwrap_or_default(),
            })
        })
        .collect())
}

fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if pattern.contains('*') || pattern.contains('?') {
            let mut matched = glob(pattern)
                .map_err(|e| ExplorerError::Catalog(format!("invalid glob pattern '{}': {}", pattern, e)))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| ExplorerError::Catalog(format!("error expanding '{}': {}", pattern, e)))?;
            if matched.is_empty() {
                return Err(ExplorerError::Catalog(format!("no files match '{}'", pattern)));
            }
            matched.sort();
            paths.extend(matched);
        } else {
            paths.push(Path::new(pattern).to_path_buf());
        }
    }
    Ok(paths)
}
