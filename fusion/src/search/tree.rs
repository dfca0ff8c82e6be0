//! Arena-backed reasoning tree.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. A node
//! stores its parent's id (a back-reference, never ownership) and the ids of
//! the children it created. Depth is always recomputed by walking parents.

use serde::{Deserialize, Serialize};

/// Exploration constant used by UCB1 unless configured otherwise.
pub const DEFAULT_EXPLORATION: f64 = 1.414;

/// Handle to a node inside a [`SearchTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// One reasoning branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchNode {
    /// Text description of the reasoning path so far.
    pub state: String,
    /// Parent handle; `None` only for the root.
    pub parent: Option<NodeId>,
    /// Children in expansion order.
    pub children: Vec<NodeId>,
    /// Number of evaluations that passed through this node.
    pub visits: u32,
    /// Sum of evaluation scores backpropagated through this node.
    pub total_value: f64,
    /// Label describing how the node was reached.
    pub action: String,
}

impl SearchNode {
    fn new(state: impl Into<String>, parent: Option<NodeId>, action: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            parent,
            children: Vec::new(),
            visits: 0,
            total_value: 0.0,
            action: action.into(),
        }
    }

    /// Mean backpropagated value, 0 when unvisited.
    pub fn mean_value(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.total_value / f64::from(self.visits)
        }
    }

    /// UCB1 score given the parent's visit count.
    ///
    /// `+∞` for an unvisited node. A `parent_visits` of 0 (the root has no
    /// parent) contributes no exploration term.
    pub fn ucb1(&self, parent_visits: u32, exploration: f64) -> f64 {
        if self.visits == 0 {
            return f64::INFINITY;
        }
        let visits = f64::from(self.visits);
        let exploitation = self.total_value / visits;
        if parent_visits == 0 {
            return exploitation;
        }
        exploitation + exploration * (f64::from(parent_visits).ln() / visits).sqrt()
    }
}

/// Summary of one root-to-leaf path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSummary {
    /// Actions along the path joined with ` → `.
    pub description: String,
    /// State text of the leaf.
    pub leaf_state: String,
    /// Visit count of the leaf.
    pub visits: u32,
    /// Mean value of the leaf.
    pub mean_value: f64,
    /// Depth of the leaf.
    pub depth: usize,
}

/// Reasoning tree owned by a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchTree {
    nodes: Vec<SearchNode>,
    exploration: f64,
}

impl SearchTree {
    /// Create a tree holding only the root.
    pub fn new(root_state: impl Into<String>, exploration: f64) -> Self {
        Self {
            nodes: vec![SearchNode::new(root_state, None, "root")],
            exploration,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &SearchNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Attach a new child under `parent` and return its handle.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        state: impl Into<String>,
        action: impl Into<String>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SearchNode::new(state, Some(parent), action));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Number of parent hops from the root.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = self.nodes[id.0].parent;
        while let Some(p) = cursor {
            depth += 1;
            cursor = self.nodes[p.0].parent;
        }
        depth
    }

    /// Deepest node in the tree.
    pub fn max_depth(&self) -> usize {
        (0..self.nodes.len())
            .map(|i| self.depth(NodeId(i)))
            .max()
            .unwrap_or(0)
    }

    pub fn ucb1(&self, id: NodeId) -> f64 {
        let node = &self.nodes[id.0];
        let parent_visits = node.parent.map_or(0, |p| self.nodes[p.0].visits);
        node.ucb1(parent_visits, self.exploration)
    }

    pub fn mean_value(&self, id: NodeId) -> f64 {
        self.nodes[id.0].mean_value()
    }

    /// Descend from the root by highest UCB1 until reaching a node without children.
    ///
    /// Unvisited children score `+∞`; among equal scores the earliest child wins.
    pub fn select(&self) -> NodeId {
        let mut current = self.root();
        loop {
            let children = self.children(current);
            let Some(&first) = children.first() else {
                return current;
            };
            let mut best = first;
            let mut best_score = self.ucb1(first);
            for &child in &children[1..] {
                let score = self.ucb1(child);
                if score.total_cmp(&best_score).is_gt() {
                    best = child;
                    best_score = score;
                }
            }
            current = best;
        }
    }

    /// Add `score` to `id` and every ancestor, incrementing their visit counts.
    pub fn backpropagate(&mut self, id: NodeId, score: f64) {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = &mut self.nodes[current.0];
            node.visits += 1;
            node.total_value += score;
            cursor = node.parent;
        }
    }

    /// Child of `id` with the most visits; earliest wins ties.
    pub fn most_visited_child(&self, id: NodeId) -> Option<NodeId> {
        let mut best: Option<NodeId> = None;
        for &child in self.children(id) {
            match best {
                Some(b) if self.nodes[b.0].visits >= self.nodes[child.0].visits => {}
                _ => best = Some(child),
            }
        }
        best
    }

    /// Every visited root-to-leaf path, best mean value first.
    pub fn collect_paths(&self) -> Vec<PathSummary> {
        let mut paths: Vec<PathSummary> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.children.is_empty() && n.visits > 0)
            .map(|(i, leaf)| {
                let id = NodeId(i);
                let mut actions = Vec::new();
                let mut cursor = Some(id);
                while let Some(c) = cursor {
                    actions.push(self.nodes[c.0].action.as_str());
                    cursor = self.nodes[c.0].parent;
                }
                actions.reverse();
                PathSummary {
                    description: actions.join(" → "),
                    leaf_state: leaf.state.clone(),
                    visits: leaf.visits,
                    mean_value: leaf.mean_value(),
                    depth: actions.len() - 1,
                }
            })
            .collect();
        paths.sort_by(|a, b| b.mean_value.total_cmp(&a.mean_value));
        paths
    }
}
