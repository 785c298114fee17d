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

//! The search engine: selection, simulation hand-off, expansion and
//! propagation over the coloured tree.
//!
//! One round: `selection` descends by best child to a simulation node and
//! picks a seed; the host mutates and replays that seed against the server;
//! `expansion` records the observed reply sequence, growing and recolouring
//! the tree and registering new seeds; `propagation` books the outcome on
//! the simulation node and seed. The engine is single-threaded and
//! non-reentrant; a round runs to completion before the next begins.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};
use queue_model::{QueueEntry, ResponseCode, ROOT_CODE};
use rand::Rng as _;

use crate::config::{ScoreFunction, SearchConfig};
use crate::logging;
use crate::score;
use crate::tree::{Colour, NodeKey, Tree};
use crate::{Float, Rng};

/// Outcome of one selection pass: the simulation node to fuzz from and the
/// chosen seed's pool index. The index is `None` until an expansion has
/// registered a seed on the node (the dry run runs expansion first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected {
    /// The Golden simulation node the round fuzzes from.
    pub golden: NodeKey,
    /// Pool index of the chosen seed on that node.
    pub seed: Option<usize>,
}

/// What the host needs to run one replay: the recorded entry, the region
/// whose end to mutate from, and the state path the prefix exercises.
#[derive(Debug, Clone)]
pub struct ReplayTarget {
    /// The recorded queue entry to mutate.
    pub queue_entry: Rc<QueueEntry>,
    /// Region of the entry whose state sequence matches `path`.
    pub region_index: usize,
    /// Reply codes the replayed prefix must reproduce.
    pub path: Vec<ResponseCode>,
}

struct RegionMatch {
    index: usize,
    ends_at_code: bool,
}

/// Monte Carlo tree search over protocol state sequences.
pub struct Mcts {
    tree: Tree,
    config: SearchConfig,
    rng: Rc<RefCell<Rng>>,
}

impl Mcts {
    /// Initialisation: builds the root and its simulation child, and
    /// installs the file log sink from `AFLNET_LEGION_LOG` (best effort).
    pub fn new(config: SearchConfig, rng: Rc<RefCell<Rng>>) -> Self {
        logging::try_init_from_env();
        let mcts = Self {
            tree: Tree::new(),
            config,
            rng,
        };
        debug!("[INIT] search tree initialised (rho: {})", mcts.config.rho);
        mcts
    }

    /// The search tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// The active configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Key of the root node.
    pub fn root(&self) -> NodeKey {
        self.tree.root()
    }

    /// Serializes the tree to pretty JSON for offline inspection.
    pub fn serialize_tree(&self) -> String {
        self.tree.to_json()
    }

    fn random_score(&self) -> Float {
        Float::from(self.rng.borrow_mut().gen::<u32>())
    }

    /// Score of a node under the active policy.
    pub fn node_score(&self, key: NodeKey) -> Float {
        if self.config.score_function == ScoreFunction::Random {
            return self.random_score();
        }
        if self.is_fully_explored(key) {
            return Float::NEG_INFINITY;
        }
        let node = self.tree.node(key);
        let parent = match node.parent() {
            Some(parent) => parent,
            None => return Float::INFINITY,
        };
        if self.fits_fish_bone_optimisation(key) {
            return Float::NEG_INFINITY;
        }
        if node.selected() == 0 {
            return Float::INFINITY;
        }
        let parent_selected = self.tree.node(parent).selected();
        score::uct(node.discovered(), node.selected(), parent_selected, self.config.rho)
    }

    /// Score of the `seed_index`-th seed of a simulation node.
    pub fn seed_score(&self, key: NodeKey, seed_index: usize) -> Float {
        if self.config.score_function == ScoreFunction::Random {
            return self.random_score();
        }
        let node = self.tree.node(key);
        let seed = &node.seeds()[seed_index];
        score::uct(seed.discovered(), seed.selected(), node.selected(), self.config.rho)
    }

    /// A node is fully explored when flagged, or when it is a Black node
    /// whose only child is itself dead. White nodes can always sprout a new
    /// sibling through a future extension, so the recursion never applies
    /// to them.
    pub fn is_fully_explored(&self, key: NodeKey) -> bool {
        let node = self.tree.node(key);
        if node.fully_explored() {
            return true;
        }
        if node.colour() != Colour::Black {
            return false;
        }
        let children = node.children();
        children.len() == 1 && self.node_score(children[0]) == Float::NEG_INFINITY
    }

    // Planned: skip a simulation node whose only not-fully-explored sibling
    // is non-White, since every new path must come through that sibling.
    fn fits_fish_bone_optimisation(&self, _key: NodeKey) -> bool {
        false
    }

    /// Highest-scoring child, ties broken uniformly through the shared RNG.
    /// `None` when the node has no children.
    pub fn best_child(&self, key: NodeKey) -> Option<NodeKey> {
        let children = self.tree.node(key).children();
        if children.is_empty() {
            return None;
        }
        if children.len() == 1 {
            return Some(children[0]);
        }

        let mut max_score = Float::NEG_INFINITY;
        let mut ties: Vec<NodeKey> = Vec::new();
        for &child in children {
            let score = self.node_score(child);
            if score < max_score {
                continue;
            }
            if score > max_score {
                ties.clear();
            }
            max_score = score;
            ties.push(child);
        }
        trace!(
            "[BEST_CHILD] node {:?}: max score {}, {} candidate(s)",
            self.tree.node(key).path(),
            max_score,
            ties.len()
        );

        if ties.len() == 1 {
            return Some(ties[0]);
        }
        let winner = ties[self.rng.borrow_mut().gen_range(0..ties.len())];
        Some(winner)
    }

    /// Highest-scoring seed of a simulation node, ties broken uniformly.
    /// `None` when the pool is empty.
    pub fn best_seed(&self, key: NodeKey) -> Option<usize> {
        let node = self.tree.node(key);
        assert_eq!(node.colour(), Colour::Golden, "seeds live on simulation nodes");
        let count = node.seeds().len();
        if count == 0 {
            return None;
        }
        if count == 1 {
            return Some(0);
        }

        let mut max_score = Float::NEG_INFINITY;
        let mut ties: Vec<usize> = Vec::new();
        for seed_index in 0..count {
            let score = self.seed_score(key, seed_index);
            if score < max_score {
                continue;
            }
            if score > max_score {
                ties.clear();
            }
            max_score = score;
            ties.push(seed_index);
        }
        trace!(
            "[BEST_SEED] node {:?}: max score {}, {} candidate(s)",
            node.path(),
            max_score,
            ties.len()
        );

        if ties.len() == 1 {
            return Some(ties[0]);
        }
        let winner = ties[self.rng.borrow_mut().gen_range(0..ties.len())];
        Some(winner)
    }

    /// Selection: descends from the root by best child, bumping `selected`
    /// along the way, until a simulation node is reached; then picks a seed.
    ///
    /// Returns `None` when the root scores `-∞` — the search space is
    /// exhausted and the host must stop fuzzing.
    pub fn selection(&mut self) -> Option<Selected> {
        if self.node_score(self.tree.root()) == Float::NEG_INFINITY {
            debug!("[SELECTION] root exhausted, nothing left to fuzz");
            return None;
        }
        let root = self.tree.root();
        self.tree.node_mut(root).mark_selected();

        let mut current = root;
        let golden = loop {
            if self.tree.node(current).colour() == Colour::Golden {
                // the parent may have been written off between steps
                let parent = self
                    .tree
                    .node(current)
                    .parent()
                    .expect("simulation node without parent");
                if self.node_score(parent) == Float::NEG_INFINITY {
                    current = root;
                    continue;
                }
                break current;
            }

            let next = match self.best_child(current) {
                Some(next) if self.node_score(next) > Float::NEG_INFINITY => next,
                _ => {
                    // every path beneath `current` is exhausted
                    current = match self.write_off(current) {
                        Some(ancestor) => ancestor,
                        None => {
                            debug!("[SELECTION] root exhausted, nothing left to fuzz");
                            return None;
                        }
                    };
                    continue;
                }
            };
            self.tree.node_mut(next).mark_selected();
            current = next;
        };

        let seed = self.best_seed(golden);
        if let Some(index) = seed {
            self.tree.node_mut(golden).seed_mut(index).mark_selected();
        }
        debug!(
            "[SELECTION] node {:?} (selected: {}), seed {:?}",
            self.tree.node(golden).path(),
            self.tree.node(golden).selected(),
            seed
        );
        Some(Selected { golden, seed })
    }

    /// Marks a node whose children have all died and resumes from its
    /// parent. `None` means the root itself is exhausted.
    fn write_off(&mut self, key: NodeKey) -> Option<NodeKey> {
        let node = self.tree.node_mut(key);
        node.fully_explored = true;
        node.exhausted = true;
        debug!(
            "[SELECTION] subtree at {:?} exhausted, resuming above",
            self.tree.node(key).path()
        );
        self.tree.node(key).parent()
    }

    /// Simulation: asserts the selection landed on a simulation node and
    /// hands the host the concrete mutation target. The core performs no
    /// replay itself. `None` when the node's pool is still empty.
    pub fn simulation(&self, selected: &Selected) -> Option<ReplayTarget> {
        let node = self.tree.node(selected.golden);
        assert_eq!(
            node.colour(),
            Colour::Golden,
            "simulation targets must be simulation nodes"
        );
        let index = selected.seed?;
        let seed = &node.seeds()[index];
        let region_index = node.region_indices()[index];
        Some(ReplayTarget {
            queue_entry: Rc::clone(seed.queue_entry()),
            region_index,
            path: node.path().to_vec(),
        })
    }

    /// Expansion: records one observed execution.
    ///
    /// Walks `codes` from `node` (the root in normal rounds), creating
    /// missing children, flipping Black nodes that proved extensible,
    /// registering seeds where a region ends on the path with recorded
    /// bytes beyond it, and booking `discovered` along the execution path.
    /// Returns the deepest node reached and whether any node was created.
    pub fn expansion(
        &mut self,
        node: NodeKey,
        q: &Rc<QueueEntry>,
        codes: &[ResponseCode],
    ) -> (NodeKey, bool) {
        assert!(!codes.is_empty(), "empty response-code sequence");
        assert_eq!(codes[0], ROOT_CODE, "executions start at the root state");
        let start = self.tree.node(node);
        assert_ne!(start.colour(), Colour::Golden, "cannot expand a simulation node");
        assert_eq!(start.id(), codes[0], "expansion must start where the codes do");
        debug!("[MCTS-EXPANSION] entry {}: codes {:?}", q.fname(), codes);

        let mut is_new = false;
        let mut current = node;
        if codes.len() > 1 && self.tree.node(current).fully_explored() {
            // new evidence invalidates prior exhaustion
            self.tree.node_mut(current).fully_explored = false;
        }

        let mut region_cursor = 0usize;
        for i in 1..codes.len() {
            let code = codes[i];
            let exec_prefix = &codes[..=i];

            let matched = Self::match_region(q, region_cursor, exec_prefix);
            let (matched_last, matching_region) = match &matched {
                Some(m) => {
                    region_cursor = if m.ends_at_code { m.index + 1 } else { m.index };
                    (m.ends_at_code, Some(m.index))
                }
                None => (false, None),
            };

            let child = match self.tree.exists_child(current, code) {
                Some(child) => {
                    if matched_last
                        && self.tree.node(child).colour() == Colour::Black
                        && i + 1 < codes.len()
                    {
                        // the execution extends past it: the node is extensible
                        self.tree.flip_to_white(child);
                        debug!(
                            "[MCTS-EXPANSION] node {:?} flipped to White",
                            self.tree.node(child).path()
                        );
                    }
                    child
                }
                None => {
                    is_new = true;
                    let colour = if matched_last { Colour::White } else { Colour::Black };
                    self.tree.append_child(current, code, colour)
                }
            };

            if i + 1 < codes.len() && self.tree.node(child).fully_explored() {
                self.tree.node_mut(child).fully_explored = false;
            }

            if matched_last && self.tree.node(child).colour() == Colour::White {
                if let Some(region_index) = matching_region {
                    if !q.is_last_region(region_index) {
                        let golden = self
                            .tree
                            .simulation_child(child)
                            .expect("white node without simulation child");
                        assert!(q.region(region_index).matches_prefix(self.tree.node(child).path()));
                        let seed_index = self.tree.add_seed(golden, q, region_index);
                        trace!(
                            "[MCTS-EXPANSION] seed {} of {} registered at {:?} (region {})",
                            seed_index,
                            q.fname(),
                            self.tree.node(child).path(),
                            region_index
                        );
                    }
                }
            }

            assert_eq!(self.tree.node(child).path(), exec_prefix);
            assert_eq!(self.tree.collect_node_path(child), exec_prefix);
            current = child;
        }

        if self.tree.is_leaf(current) && self.tree.node(current).colour() != Colour::Golden {
            self.tree.node_mut(current).fully_explored = true;
        }

        // discovery bookkeeping along the execution path, root included
        let mut walker = Some(current);
        while let Some(key) = walker {
            self.tree.node_mut(key).record_discovery(is_new);
            walker = self.tree.node(key).parent();
        }

        debug!(
            "[MCTS-EXPANSION] leaf {:?}, is_new: {}",
            self.tree.node(current).path(),
            is_new
        );
        self.tree.log(Some(current));
        (current, is_new)
    }

    /// Scans regions from `cursor` for the first one covering `exec_prefix`,
    /// noting whether its recorded sequence ends exactly on the last code.
    fn match_region(q: &QueueEntry, cursor: usize, exec_prefix: &[ResponseCode]) -> Option<RegionMatch> {
        let code = exec_prefix[exec_prefix.len() - 1];
        for (offset, region) in q.regions()[cursor.min(q.regions().len())..].iter().enumerate() {
            if region.state_count() >= exec_prefix.len() && region.matches_prefix(exec_prefix) {
                return Some(RegionMatch {
                    index: cursor + offset,
                    ends_at_code: region.ends_with(code),
                });
            }
        }
        None
    }

    /// Propagation: books the round's outcome on the simulation node and
    /// the chosen seed. `selected` counters were already bumped during
    /// selection; the dry-run round skips this step entirely.
    pub fn propagation(&mut self, selected: &Selected, is_new: bool) {
        debug!(
            "[PROPAGATION] node {:?}, is_new: {}",
            self.tree.node(selected.golden).path(),
            is_new
        );
        self.tree.node_mut(selected.golden).record_discovery(is_new);
        if let Some(index) = selected.seed {
            self.tree
                .node_mut(selected.golden)
                .seed_mut(index)
                .record_discovery(is_new);
        }
        if self.config.propagate_selection_path {
            let mut walker = self.tree.node(selected.golden).parent();
            while let Some(key) = walker {
                self.tree.node_mut(key).record_discovery(is_new);
                walker = self.tree.node(key).parent();
            }
        }
    }
}
