//! Graph nodes for three-color marking

use rustc_hash::FxHashSet;

use crate::descriptor::DescriptorRef;

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// Not yet visited
    White = 0,
    /// Discovered, children pending
    Grey = 1,
    /// Fully scanned
    Black = 2,
}

/// One registered object in the reference graph.
///
/// Holds the node's current color, its outgoing edges (registry
/// identities, a set so duplicate links collapse), and a non-owning
/// handle to the object's descriptor, used only to free its memory.
#[derive(Debug)]
pub struct GraphNode {
    pub(crate) color: Color,
    pub(crate) edges: FxHashSet<usize>,
    pub(crate) descriptor: DescriptorRef,
}

impl GraphNode {
    /// Nodes are created White at registration time.
    pub(crate) fn new(descriptor: DescriptorRef) -> Self {
        Self {
            color: Color::White,
            edges: FxHashSet::default(),
            descriptor,
        }
    }

    /// Current mark color.
    pub fn color(&self) -> Color {
        self.color
    }

    /// Number of outgoing edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The wrapped descriptor.
    pub fn descriptor(&self) -> &DescriptorRef {
        &self.descriptor
    }
}
