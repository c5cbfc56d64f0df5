//! Render graph.
//!
//! Renderables live in an arena; parent/child relations are indices and
//! dirty/focus state live beside the nodes, so there are no ownership
//! cycles. Structural hashes cover shape (ids, bounds, children, focus)
//! and deliberately exclude display values, which get their own hash.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// Arena handle for a node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NodeId(usize);

/// A cell-space rectangle.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Rect {
    /// Left column.
    pub x: u16,
    /// Top line.
    pub y: u16,
    /// Width in cells.
    pub w: u16,
    /// Height in lines.
    pub h: u16,
}

impl Rect {
    /// Whether two rects share any cell.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// One renderable node.
#[derive(Clone, Debug)]
pub struct Node {
    /// Stable renderable identity, surviving rebuilds.
    pub stable_id: u64,
    /// Layout bounds.
    pub bounds: Rect,
    /// Whether the node holds focus.
    pub focused: bool,
    /// Hash of display-rounded scalar content.
    pub value_hash: u64,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// The arena of renderables plus the dirty set.
#[derive(Clone, Debug, Default)]
pub struct RenderGraph {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    dirty: HashSet<usize>,
}

impl RenderGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node; `parent = None` makes it the root.
    pub fn insert(
        &mut self,
        parent: Option<NodeId>,
        stable_id: u64,
        bounds: Rect,
        focused: bool,
        value_hash: u64,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            stable_id,
            bounds,
            focused,
            value_hash,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.root = Some(id),
        }
        id
    }

    /// The root node, if any.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Node count.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of a node.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Mark a node dirty; dirtiness propagates to its whole subtree.
    pub fn mark_dirty(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if self.dirty.insert(id.0) {
                stack.extend(self.nodes[id.0].children.iter().copied());
            }
        }
    }

    /// Mark every node dirty.
    pub fn mark_all_dirty(&mut self) {
        self.dirty = (0..self.nodes.len()).collect();
    }

    /// Whether a node is dirty.
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.dirty.contains(&id.0)
    }

    /// Clear the dirty set.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Dirty nodes whose bounds intersect the viewport, in tree order.
    ///
    /// This is the paint list: clean nodes and off-viewport nodes are
    /// culled. The walked/painted counts feed the metrics snapshot.
    pub fn paint_list(&self, viewport: Rect) -> PaintList {
        let mut list = PaintList::default();
        let Some(root) = self.root else {
            return list;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            list.walked += 1;
            let node = &self.nodes[id.0];
            if self.dirty.contains(&id.0) && node.bounds.intersects(&viewport) {
                list.nodes.push(id);
            }
            // Children pushed in reverse for stable tree order.
            stack.extend(node.children.iter().rev().copied());
        }
        list.nodes.sort_by_key(|id| id.0);
        list
    }

    /// Hash of the subtree shape rooted at `id`: stable ids, bounds,
    /// child order, and focus. Value hashes are excluded.
    pub fn structural_hash(&self, id: NodeId) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_subtree(id, &mut hasher);
        hasher.finish()
    }

    fn hash_subtree(&self, id: NodeId, hasher: &mut DefaultHasher) {
        let node = &self.nodes[id.0];
        node.stable_id.hash(hasher);
        node.bounds.hash(hasher);
        node.focused.hash(hasher);
        node.children.len().hash(hasher);
        for child in &node.children {
            self.hash_subtree(*child, hasher);
        }
    }

    /// Hash of the whole tree's display values, in tree order.
    pub fn value_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for node in &self.nodes {
            node.stable_id.hash(&mut hasher);
            node.value_hash.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Mark dirty every node whose value hash differs from its
    /// counterpart (matched by stable id) in `other`.
    pub fn mark_value_changes(&mut self, other: &RenderGraph) {
        let mut changed = Vec::new();
        for (index, node) in self.nodes.iter().enumerate() {
            let prior = other
                .nodes
                .iter()
                .find(|candidate| candidate.stable_id == node.stable_id);
            match prior {
                Some(prior) if prior.value_hash == node.value_hash => {}
                _ => changed.push(NodeId(index)),
            }
        }
        for id in changed {
            self.mark_dirty(id);
        }
    }
}

/// Result of a viewport-culled dirty traversal.
#[derive(Clone, Debug, Default)]
pub struct PaintList {
    /// Nodes to paint, in tree order.
    pub nodes: Vec<NodeId>,
    /// Nodes visited during traversal.
    pub walked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> (RenderGraph, NodeId, NodeId, NodeId) {
        let mut graph = RenderGraph::new();
        let root = graph.insert(
            None,
            1,
            Rect { x: 0, y: 0, w: 80, h: 24 },
            false,
            0,
        );
        let top = graph.insert(
            Some(root),
            2,
            Rect { x: 0, y: 0, w: 80, h: 10 },
            true,
            7,
        );
        let bottom = graph.insert(
            Some(root),
            3,
            Rect { x: 0, y: 10, w: 80, h: 14 },
            false,
            9,
        );
        (graph, root, top, bottom)
    }

    #[test]
    fn test_dirty_propagates_to_subtree() {
        let (mut graph, root, top, bottom) = sample_graph();
        graph.mark_dirty(root);
        assert!(graph.is_dirty(root));
        assert!(graph.is_dirty(top));
        assert!(graph.is_dirty(bottom));
    }

    #[test]
    fn test_paint_list_culls_clean_and_offscreen() {
        let (mut graph, _, top, bottom) = sample_graph();
        graph.mark_dirty(top);
        graph.mark_dirty(bottom);

        // Viewport covering only the top half.
        let list = graph.paint_list(Rect { x: 0, y: 0, w: 80, h: 10 });
        assert_eq!(list.nodes, vec![top]);
        assert_eq!(list.walked, 3);

        graph.clear_dirty();
        let list = graph.paint_list(Rect { x: 0, y: 0, w: 80, h: 24 });
        assert!(list.nodes.is_empty());
    }

    #[test]
    fn test_structural_hash_ignores_values() {
        let (graph_a, root_a, ..) = sample_graph();
        let (mut graph_b, root_b, top_b, _) = sample_graph();
        graph_b.nodes[top_b.0].value_hash = 999;
        assert_eq!(
            graph_a.structural_hash(root_a),
            graph_b.structural_hash(root_b)
        );
        assert_ne!(graph_a.value_hash(), graph_b.value_hash());
    }

    #[test]
    fn test_structural_hash_sees_focus_and_bounds() {
        let (graph_a, root_a, ..) = sample_graph();

        let (mut graph_b, root_b, top_b, _) = sample_graph();
        graph_b.nodes[top_b.0].focused = false;
        assert_ne!(
            graph_a.structural_hash(root_a),
            graph_b.structural_hash(root_b)
        );

        let (mut graph_c, root_c, top_c, _) = sample_graph();
        graph_c.nodes[top_c.0].bounds.h = 11;
        assert_ne!(
            graph_a.structural_hash(root_a),
            graph_c.structural_hash(root_c)
        );
    }

    #[test]
    fn test_mark_value_changes() {
        let (graph_a, ..) = sample_graph();
        let (mut graph_b, _, top_b, bottom_b) = sample_graph();
        graph_b.nodes[top_b.0].value_hash = 1234;

        graph_b.mark_value_changes(&graph_a);
        assert!(graph_b.is_dirty(top_b));
        assert!(!graph_b.is_dirty(bottom_b));
    }
}
