//! Node identity, roles and record placement
//!
//! The cluster is asymmetric: a central node holds every title, fragment
//! nodes hold a disjoint subset selected by `title_type`. Placement is fixed
//! by configuration; the orchestrator never moves data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a physical node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Subset of titles a fragment node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Titles whose type is `movie`.
    Movies,
    /// Every other title type.
    NonMovies,
}

impl Partition {
    /// Whether a title of this type belongs to the partition.
    pub fn holds(self, title_type: &str) -> bool {
        let is_movie = title_type.eq_ignore_ascii_case("movie");
        match self {
            Partition::Movies => is_movie,
            Partition::NonMovies => !is_movie,
        }
    }
}

/// What a node stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Holds the full dataset.
    Central,
    /// Holds one partition.
    Fragment(Partition),
}

impl NodeRole {
    /// Whether a title of this type is stored on a node with this role.
    pub fn holds(self, title_type: &str) -> bool {
        match self {
            NodeRole::Central => true,
            NodeRole::Fragment(partition) => partition.holds(title_type),
        }
    }
}

/// A configured node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Node identity
    pub id: NodeId,
    /// Stored subset
    pub role: NodeRole,
    /// Maximum concurrent sessions
    pub capacity: usize,
}

/// The fixed cluster layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    nodes: Vec<NodeSpec>,
}

impl Topology {
    /// Build a topology. Order is preserved and used for reporting.
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self { nodes }
    }

    /// All nodes in configuration order.
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Look up one node.
    pub fn get(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// First central node, if any.
    pub fn central(&self) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.role == NodeRole::Central)
    }

    /// Every node that should hold a title of this type: central nodes
    /// first, then matching fragments.
    pub fn nodes_for(&self, title_type: &str) -> Vec<NodeId> {
        let central = self
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Central);
        let fragments = self
            .nodes
            .iter()
            .filter(|n| matches!(n.role, NodeRole::Fragment(_)) && n.role.holds(title_type));
        central.chain(fragments).map(|n| n.id.clone()).collect()
    }

    /// The fragment that owns a title of this type, falling back to the
    /// central node when no fragment matches.
    pub fn primary_for(&self, title_type: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| matches!(n.role, NodeRole::Fragment(_)) && n.role.holds(title_type))
            .or_else(|| self.central())
            .map(|n| n.id.clone())
    }
}

/// Structured identity of one reader or writer in a scenario run.
///
/// Rendered as `"<node>_<index>"` only when used as a JSON map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorKey {
    /// Node the actor's session runs on
    pub node: NodeId,
    /// 1-based index among actors of the same kind on that node
    pub index: u32,
}

impl ActorKey {
    /// Create an actor key.
    pub fn new(node: NodeId, index: u32) -> Self {
        Self { node, index }
    }

    /// Display form used for response map keys.
    pub fn display_key(&self) -> String {
        format!("{}_{}", self.node, self.index)
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.node, self.index)
    }
}
