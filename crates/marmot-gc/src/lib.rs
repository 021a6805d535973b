//! # Marmot Tracing Collector
//!
//! Three-color mark-sweep garbage collection over an explicit reference
//! graph, simulated on top of the `marmot-heap` generational arena.
//!
//! ## Design
//!
//! - **Descriptors**: each simulated object is paired with an
//!   `ObjectDescriptor` (pointer, size, aligned size, root flag)
//! - **Reference graph**: identity-keyed registry of nodes with explicit
//!   outgoing edge sets; possibly cyclic
//! - **Tri-color marking**: white/grey/black FIFO traversal from the
//!   roots; no node is queued twice
//! - **Sweep**: unreachable nodes are freed back through the allocator;
//!   retired short-acting roots are reclaimed unconditionally
//! - **External exclusion**: the graph is serial; `GcContext` provides
//!   the shared/exclusive gate around mutators and `gc()`

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod context;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod node;

pub use context::GcContext;
pub use descriptor::{DescriptorRef, ObjectDescriptor, UNALLOCATED};
pub use error::{GcError, GcResult};
pub use graph::{GcStats, ReferenceGraph};
pub use node::{Color, GraphNode};
