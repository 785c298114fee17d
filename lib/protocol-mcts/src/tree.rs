/*
 * Copyright (C) 2023 Asim Ihsan
 * SPDX-License-Identifier: AGPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>
 */

//! The coloured search tree: an arena of nodes keyed by response-code paths.
//!
//! Nodes live in a slotmap and link to each other through keys; nothing is
//! freed during a session. White nodes (and the root) carry a Golden
//! simulation child from birth; Black nodes gain one only when evidence
//! flips them White.

use std::fmt::{self, Display};
use std::rc::Rc;

use log::trace;
use queue_model::{QueueEntry, ResponseCode, ROOT_CODE, SIMULATION_CODE};
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};

use crate::seed::Seed;

new_key_type! {
    /// Arena key of a tree node.
    pub struct NodeKey;
}

/// Node colour.
///
/// White and Black are the working colours of the update protocol. Golden
/// marks the synthetic simulation children. Red and Purple are reserved:
/// they round-trip through storage and rendering but are never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Colour {
    /// A real node whose last observed reply is a legitimate intermediate
    /// reply, aligned with a recorded region boundary.
    White,
    /// A real node whose last reply never aligned with a region boundary;
    /// flipped White once an execution shows it is extensible.
    Black,
    /// A synthetic simulation leaf; the handle for seed registration.
    Golden,
    /// Reserved.
    Red,
    /// Reserved.
    Purple,
}

impl Colour {
    /// ANSI colour code used by the tree renderer and the log sink.
    pub fn ansi_code(self) -> u8 {
        match self {
            Colour::White => 37,
            Colour::Red => 31,
            Colour::Golden => 33,
            Colour::Purple => 35,
            Colour::Black => 30,
        }
    }
}

/// One node of the search tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub(crate) id: ResponseCode,
    pub(crate) colour: Colour,
    pub(crate) path: Vec<ResponseCode>,
    pub(crate) fully_explored: bool,
    pub(crate) exhausted: bool,
    pub(crate) selected: u32,
    pub(crate) discovered: u32,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) children: Vec<NodeKey>,
    pub(crate) simulation_child: Option<NodeKey>,
    pub(crate) seeds: Vec<Seed>,
    pub(crate) region_indices: Vec<usize>,
}

impl TreeNode {
    fn new(id: ResponseCode, colour: Colour, path: Vec<ResponseCode>, parent: Option<NodeKey>) -> Self {
        Self {
            id,
            colour,
            path,
            fully_explored: false,
            exhausted: false,
            selected: 0,
            discovered: 0,
            parent,
            children: Vec::new(),
            simulation_child: None,
            seeds: Vec::new(),
            region_indices: Vec::new(),
        }
    }

    /// The reply code this node stands for (0 at the root, 999 on
    /// simulation nodes).
    pub fn id(&self) -> ResponseCode {
        self.id
    }

    /// Current colour.
    pub fn colour(&self) -> Colour {
        self.colour
    }

    /// Reply codes from the root to this node, inclusive. Simulation nodes
    /// inherit their parent's path.
    pub fn path(&self) -> &[ResponseCode] {
        &self.path
    }

    /// True once the search has decided never to revisit this node.
    pub fn fully_explored(&self) -> bool {
        self.fully_explored
    }

    /// True once the selection walk-back has written the subtree off.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Times selection descended through this node.
    pub fn selected(&self) -> u32 {
        self.selected
    }

    /// Times an execution through this node discovered a new path.
    pub fn discovered(&self) -> u32 {
        self.discovered
    }

    /// Parent key; `None` at the root.
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// All children, simulation child included, in creation order.
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    /// The registered seed pool. Non-empty only on simulation nodes.
    pub fn seeds(&self) -> &[Seed] {
        &self.seeds
    }

    /// For the `i`-th seed, the index of the region of that seed's queue
    /// entry whose state sequence matches this node's path.
    pub fn region_indices(&self) -> &[usize] {
        &self.region_indices
    }

    pub(crate) fn mark_selected(&mut self) {
        self.selected += 1;
    }

    pub(crate) fn record_discovery(&mut self, is_new: bool) {
        self.discovered += u32::from(is_new);
    }

    pub(crate) fn seed_mut(&mut self, index: usize) -> &mut Seed {
        &mut self.seeds[index]
    }
}

/// The search tree arena. Nodes are inserted and never removed.
#[derive(Debug)]
pub struct Tree {
    nodes: SlotMap<NodeKey, TreeNode>,
    root: NodeKey,
}

impl Tree {
    /// Builds the tree: a White root for the synthetic state 0 with its
    /// Golden simulation child already attached.
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(TreeNode::new(ROOT_CODE, Colour::White, vec![ROOT_CODE], None));
        let mut tree = Self { nodes, root };
        tree.attach_simulation_child(root);
        tree
    }

    /// Key of the root node.
    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Immutable access to a node.
    pub fn node(&self, key: NodeKey) -> &TreeNode {
        &self.nodes[key]
    }

    pub(crate) fn node_mut(&mut self, key: NodeKey) -> &mut TreeNode {
        &mut self.nodes[key]
    }

    /// Total number of nodes, simulation nodes included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root exists for the whole session.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a real child for `id`. White children get their simulation
    /// child eagerly; Black children stay bare until flipped.
    pub(crate) fn append_child(&mut self, parent: NodeKey, id: ResponseCode, colour: Colour) -> NodeKey {
        assert_ne!(
            self.nodes[parent].colour,
            Colour::Golden,
            "simulation nodes never gain children"
        );
        assert!(
            self.exists_child(parent, id).is_none(),
            "sibling ids must be distinct"
        );
        let mut path = self.nodes[parent].path.clone();
        path.push(id);
        let child = self.nodes.insert(TreeNode::new(id, colour, path, Some(parent)));
        self.nodes[parent].children.push(child);
        if colour == Colour::White {
            self.attach_simulation_child(child);
        }
        child
    }

    fn attach_simulation_child(&mut self, parent: NodeKey) -> NodeKey {
        assert!(self.nodes[parent].simulation_child.is_none());
        let path = self.nodes[parent].path.clone();
        let golden = self
            .nodes
            .insert(TreeNode::new(SIMULATION_CODE, Colour::Golden, path, Some(parent)));
        self.nodes[parent].children.push(golden);
        self.nodes[parent].simulation_child = Some(golden);
        golden
    }

    /// Flips a Black node White and gives it a simulation child.
    pub(crate) fn flip_to_white(&mut self, key: NodeKey) -> NodeKey {
        assert_eq!(self.nodes[key].colour, Colour::Black);
        self.nodes[key].colour = Colour::White;
        self.attach_simulation_child(key)
    }

    /// The direct child carrying `id`, if one exists.
    pub fn exists_child(&self, parent: NodeKey, id: ResponseCode) -> Option<NodeKey> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].id == id)
    }

    /// The node's simulation child. Callers must not ask a simulation node.
    pub fn simulation_child(&self, key: NodeKey) -> Option<NodeKey> {
        let node = &self.nodes[key];
        assert_ne!(node.colour, Colour::Golden);
        if let Some(child) = node.simulation_child {
            assert_eq!(self.nodes[child].colour, Colour::Golden);
        }
        node.simulation_child
    }

    /// Registers a seed on a simulation node and returns its pool index.
    pub(crate) fn add_seed(&mut self, key: NodeKey, q: &Rc<QueueEntry>, region_index: usize) -> usize {
        let node = &mut self.nodes[key];
        assert_eq!(node.colour, Colour::Golden, "seeds attach to simulation nodes only");
        let index = node.seeds.len();
        node.seeds.push(Seed::new(Rc::clone(q), index));
        node.region_indices.push(region_index);
        index
    }

    /// Rebuilds a node's path by walking parent links; simulation nodes
    /// report their parent's path.
    pub fn collect_node_path(&self, key: NodeKey) -> Vec<ResponseCode> {
        let mut key = key;
        if self.nodes[key].colour == Colour::Golden {
            key = self.nodes[key].parent.expect("simulation node without parent");
            assert_ne!(self.nodes[key].colour, Colour::Golden);
        }
        let mut reversed = Vec::new();
        let mut cursor = Some(key);
        while let Some(k) = cursor {
            reversed.push(self.nodes[k].id);
            cursor = self.nodes[k].parent;
        }
        reversed.reverse();
        reversed
    }

    /// A node is a leaf when it has no children, or only its simulation
    /// child. Phantom (Purple) nodes are never leaves.
    pub fn is_leaf(&self, key: NodeKey) -> bool {
        let node = &self.nodes[key];
        node.colour != Colour::Purple
            && (node.children.is_empty()
                || (node.children.len() == 1
                    && self.nodes[node.children[0]].colour == Colour::Golden))
    }

    fn node_repr(&self, key: NodeKey) -> String {
        let node = &self.nodes[key];
        format!(
            "\x1b[1;{}mres_code: {}, selected: {}, discovered: {}{}\x1b[0m",
            node.colour.ansi_code(),
            node.id,
            node.selected,
            node.discovered,
            if node.fully_explored { " (fully explored)" } else { "" },
        )
    }

    /// Logs the whole tree, one record per node, marking `mark` the way the
    /// expansion log marks the execution leaf.
    pub fn log(&self, mark: Option<NodeKey>) {
        self.log_subtree(self.root, mark, 0);
    }

    fn log_subtree(&self, key: NodeKey, mark: Option<NodeKey>, indent: usize) {
        let mut line = String::new();
        for _ in 1..indent {
            line.push_str("|  ");
        }
        if indent > 0 {
            line.push_str("|-- ");
        }
        line.push_str(&self.node_repr(key));
        if mark == Some(key) {
            line.push_str("\x1b[1;32m <=< found\x1b[0m");
        }
        trace!("{}", line);
        let node = &self.nodes[key];
        let next = if node.children.is_empty() { indent } else { indent + 1 };
        for &child in &node.children {
            self.log_subtree(child, mark, next);
        }
    }

    fn fmt_subtree(&self, f: &mut fmt::Formatter<'_>, key: NodeKey, indent: usize) -> fmt::Result {
        for _ in 1..indent {
            write!(f, "|  ")?;
        }
        if indent > 0 {
            write!(f, "|-- ")?;
        }
        writeln!(f, "{}", self.node_repr(key))?;
        let node = &self.nodes[key];
        let next = if node.children.is_empty() { indent } else { indent + 1 };
        for &child in &node.children {
            self.fmt_subtree(f, child, next)?;
        }
        Ok(())
    }

    /// Serializes the tree to pretty JSON for offline inspection. Children
    /// are ordered by `selected`, busiest first.
    pub fn to_json(&self) -> String {
        let tree = self.serialize_subtree(self.root);
        serde_json::to_string_pretty(&tree).unwrap()
    }

    fn serialize_subtree(&self, key: NodeKey) -> NodeForSerialization {
        let node = &self.nodes[key];
        let mut children: Vec<Box<NodeForSerialization>> = node
            .children
            .iter()
            .map(|&child| Box::new(self.serialize_subtree(child)))
            .collect();
        children.sort_unstable_by(|a, b| a.selected.cmp(&b.selected).reverse());

        NodeForSerialization {
            id: node.id,
            colour: node.colour,
            selected: node.selected,
            discovered: node.discovered,
            fully_explored: node.fully_explored,
            seeds: node.seeds.len(),
            children,
        }
    }

    /// Panics unless every structural invariant holds. Test support.
    pub fn check_invariants(&self) {
        for (key, node) in &self.nodes {
            match node.colour {
                Colour::Golden => {
                    assert_eq!(node.id, SIMULATION_CODE);
                    assert!(node.children.is_empty(), "simulation nodes are leaves");
                    let parent = node.parent.expect("simulation node without parent");
                    assert_eq!(node.path, self.nodes[parent].path);
                    assert_eq!(self.nodes[parent].simulation_child, Some(key));
                    assert_eq!(node.seeds.len(), node.region_indices.len());
                    let parent_path = &self.nodes[parent].path;
                    for (seed, &region_index) in node.seeds.iter().zip(&node.region_indices) {
                        let region = seed.queue_entry().region(region_index);
                        assert!(region.state_count() >= parent_path.len());
                        assert!(region.matches_prefix(parent_path));
                    }
                    for (index, seed) in node.seeds.iter().enumerate() {
                        assert_eq!(seed.parent_index(), index);
                    }
                }
                colour => {
                    assert_eq!(node.path.last().copied(), Some(node.id));
                    if let Some(parent) = node.parent {
                        assert!(self.nodes[parent].children.contains(&key));
                    }
                    assert!(node.seeds.is_empty(), "seeds attach to simulation nodes only");
                    if colour == Colour::White {
                        let golden = node.simulation_child.expect("white node without simulation child");
                        assert_eq!(self.nodes[golden].colour, Colour::Golden);
                        assert!(node.children.contains(&golden));
                    }
                    let mut ids: Vec<ResponseCode> =
                        node.children.iter().map(|&c| self.nodes[c].id).collect();
                    ids.sort_unstable();
                    ids.dedup();
                    assert_eq!(ids.len(), node.children.len(), "sibling ids must be distinct");
                }
            }
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_subtree(f, self.root, 0)
    }
}

#[derive(Debug, Serialize)]
struct NodeForSerialization {
    id: ResponseCode,
    colour: Colour,
    selected: u32,
    discovered: u32,
    fully_explored: bool,
    seeds: usize,
    children: Vec<Box<NodeForSerialization>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tree_has_white_root_with_simulation_child() {
        let tree = Tree::new();
        let root = tree.node(tree.root());
        assert_eq!(root.id(), ROOT_CODE);
        assert_eq!(root.colour(), Colour::White);
        assert_eq!(root.path(), &[ROOT_CODE]);
        assert_eq!(root.selected(), 0);
        assert_eq!(root.discovered(), 0);
        assert!(!root.fully_explored());

        let golden = tree.simulation_child(tree.root()).unwrap();
        let golden_node = tree.node(golden);
        assert_eq!(golden_node.id(), SIMULATION_CODE);
        assert_eq!(golden_node.colour(), Colour::Golden);
        assert_eq!(golden_node.path(), &[ROOT_CODE]);
        assert_eq!(golden_node.parent(), Some(tree.root()));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_white_child_gets_simulation_child_black_does_not() {
        let mut tree = Tree::new();
        let white = tree.append_child(tree.root(), 220, Colour::White);
        let black = tree.append_child(tree.root(), 500, Colour::Black);

        assert!(tree.simulation_child(white).is_some());
        assert!(tree.simulation_child(black).is_none());
        assert_eq!(tree.node(white).path(), &[0, 220]);
        assert_eq!(tree.node(black).path(), &[0, 500]);
        tree.check_invariants();
    }

    #[test]
    fn test_flip_to_white_attaches_simulation_child() {
        let mut tree = Tree::new();
        let black = tree.append_child(tree.root(), 500, Colour::Black);
        let golden = tree.flip_to_white(black);

        assert_eq!(tree.node(black).colour(), Colour::White);
        assert_eq!(tree.simulation_child(black), Some(golden));
        assert_eq!(tree.node(golden).path(), &[0, 500]);
        tree.check_invariants();
    }

    #[test]
    fn test_exists_child_scans_siblings_by_id() {
        let mut tree = Tree::new();
        let a = tree.append_child(tree.root(), 220, Colour::White);
        let b = tree.append_child(tree.root(), 500, Colour::Black);

        assert_eq!(tree.exists_child(tree.root(), 220), Some(a));
        assert_eq!(tree.exists_child(tree.root(), 500), Some(b));
        assert_eq!(tree.exists_child(tree.root(), 404), None);
    }

    #[test]
    #[should_panic(expected = "sibling ids must be distinct")]
    fn test_append_child_rejects_duplicate_sibling_id() {
        let mut tree = Tree::new();
        tree.append_child(tree.root(), 220, Colour::White);
        tree.append_child(tree.root(), 220, Colour::Black);
    }

    #[test]
    fn test_collect_node_path_agrees_with_cached_path() {
        let mut tree = Tree::new();
        let a = tree.append_child(tree.root(), 220, Colour::White);
        let b = tree.append_child(a, 331, Colour::White);
        let golden = tree.simulation_child(b).unwrap();

        assert_eq!(tree.collect_node_path(b), tree.node(b).path());
        assert_eq!(tree.collect_node_path(b), vec![0, 220, 331]);
        assert_eq!(tree.collect_node_path(golden), vec![0, 220, 331]);
    }

    #[test]
    fn test_is_leaf_counts_simulation_children_only() {
        let mut tree = Tree::new();
        let white = tree.append_child(tree.root(), 220, Colour::White);
        let black = tree.append_child(tree.root(), 500, Colour::Black);

        // root has a real child, so it is no leaf
        assert!(!tree.is_leaf(tree.root()));
        // white leaf: only its simulation child
        assert!(tree.is_leaf(white));
        // black leaf: no children at all
        assert!(tree.is_leaf(black));

        let grandchild = tree.append_child(white, 331, Colour::White);
        assert!(!tree.is_leaf(white));
        assert!(tree.is_leaf(grandchild));
    }

    #[test]
    fn test_add_seed_tracks_pool_and_region_indices() {
        let mut tree = Tree::new();
        let white = tree.append_child(tree.root(), 220, Colour::White);
        let golden = tree.simulation_child(white).unwrap();
        let q = Rc::new(QueueEntry::from_response_trace("login", &[0, 220, 331]).unwrap());

        assert_eq!(tree.add_seed(golden, &q, 0), 0);
        assert_eq!(tree.add_seed(golden, &q, 0), 1);

        let node = tree.node(golden);
        assert_eq!(node.seeds().len(), 2);
        assert_eq!(node.region_indices(), &[0, 0]);
        assert_eq!(node.seeds()[1].parent_index(), 1);
        tree.check_invariants();
    }

    #[test]
    #[should_panic(expected = "seeds attach to simulation nodes only")]
    fn test_add_seed_rejects_real_nodes() {
        let mut tree = Tree::new();
        let white = tree.append_child(tree.root(), 220, Colour::White);
        let q = Rc::new(QueueEntry::from_response_trace("login", &[0, 220, 331]).unwrap());
        tree.add_seed(white, &q, 0);
    }

    #[test]
    fn test_colour_serde_round_trip_covers_reserved_colours() {
        for colour in [Colour::White, Colour::Black, Colour::Golden, Colour::Red, Colour::Purple] {
            let json = serde_json::to_string(&colour).unwrap();
            let back: Colour = serde_json::from_str(&json).unwrap();
            assert_eq!(colour, back);
        }
    }

    #[test]
    fn test_colour_ansi_codes() {
        assert_eq!(Colour::White.ansi_code(), 37);
        assert_eq!(Colour::Red.ansi_code(), 31);
        assert_eq!(Colour::Golden.ansi_code(), 33);
        assert_eq!(Colour::Purple.ansi_code(), 35);
        assert_eq!(Colour::Black.ansi_code(), 30);
    }

    #[test]
    fn test_to_json_orders_children_by_selected() {
        let mut tree = Tree::new();
        let a = tree.append_child(tree.root(), 220, Colour::White);
        let b = tree.append_child(tree.root(), 500, Colour::Black);
        tree.node_mut(a).selected = 1;
        tree.node_mut(b).selected = 5;

        let json = tree.to_json();
        let busy = json.find("\"id\": 500").unwrap();
        let quiet = json.find("\"id\": 220").unwrap();
        assert!(busy < quiet, "busiest child should serialize first");
    }

    #[test]
    fn test_display_renders_one_line_per_node() {
        let mut tree = Tree::new();
        tree.append_child(tree.root(), 220, Colour::White);
        let rendered = format!("{}", tree);
        assert_eq!(rendered.lines().count(), tree.len());
        assert!(rendered.contains("res_code: 220"));
        assert!(rendered.contains("|-- "));
    }
}
