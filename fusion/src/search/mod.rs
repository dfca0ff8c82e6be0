//! Tree-search primitives: the arena tree and UCB1 selection.

pub mod tree;

pub use tree::{NodeId, PathSummary, SearchNode, SearchTree, DEFAULT_EXPLORATION};
