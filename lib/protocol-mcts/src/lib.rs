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

//! Monte Carlo tree search over protocol state sequences.
//!
//! Each path from the root of the search tree to a leaf is a sequence of
//! server reply codes observed while replaying a recorded message stream.
//! Every real node carries a synthetic Golden simulation child through which
//! the host obtains a concrete seed (a recorded queue entry plus the region
//! to mutate from). The host drives rounds of
//! selection → replay → expansion → propagation through [`Mcts`]; the tree
//! grows monotonically and is never pruned during a session.

pub mod config;
pub mod logging;
pub mod score;
pub mod search;
pub mod seed;
pub mod tree;

pub type Float = f64;
pub type Rng = rand_pcg::Pcg64;
pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;

pub use config::{ScoreFunction, SearchConfig};
pub use queue_model::{QueueEntry, Region, ResponseCode, ROOT_CODE, SIMULATION_CODE};
pub use search::{Mcts, ReplayTarget, Selected};
pub use seed::Seed;
pub use tree::{Colour, NodeKey, Tree, TreeNode};
