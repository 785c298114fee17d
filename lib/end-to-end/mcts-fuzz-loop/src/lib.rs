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

//! Full fuzzing rounds over a scripted protocol target.
//!
//! The search core only picks seeds and records observations; the host owns
//! the corpus, the mutation and the server. This crate supplies a minimal
//! host: a deterministic protocol automaton standing in for mutator plus
//! server, and a campaign loop wiring it to the core. It exists to exercise
//! the whole round protocol end to end, and as the template a real fuzzer
//! host would follow.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use log::{debug, info};
use protocol_mcts::{HashMap, Mcts, Rng, SearchConfig};
use queue_model::{QueueEntry, QueueModelError, ResponseCode};
use rand::Rng as _;
use serde::Serialize;

/// Campaign-level failures.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    /// The initial corpus is empty.
    #[error("campaign requires at least one corpus entry")]
    EmptyCorpus,

    /// A recorded trace could not be turned into a queue entry.
    #[error("invalid corpus entry: {0}")]
    InvalidEntry(#[from] QueueModelError),
}

/// A deterministic protocol automaton standing in for the mutation engine
/// and the server under test.
///
/// The table maps a full reply-code path to the candidate replies a mutated
/// message at that point can elicit. A path with no entry is terminal.
pub struct ScriptedTarget {
    transitions: HashMap<Vec<ResponseCode>, Vec<ResponseCode>>,
}

impl ScriptedTarget {
    /// Builds the automaton from `(path, candidate replies)` rows.
    pub fn new(transitions: &[(&[ResponseCode], &[ResponseCode])]) -> Self {
        let transitions = transitions
            .iter()
            .map(|(path, nexts)| (path.to_vec(), nexts.to_vec()))
            .collect();
        Self { transitions }
    }

    /// "Replays" a mutated stream whose prefix reproduces `path`: extends
    /// the path one randomly chosen reply at a time until a terminal state.
    pub fn replay(&self, path: &[ResponseCode], rng: &mut Rng) -> Vec<ResponseCode> {
        let mut codes = path.to_vec();
        loop {
            let nexts = match self.transitions.get(&codes) {
                Some(nexts) if !nexts.is_empty() => nexts,
                _ => break,
            };
            let next = nexts[rng.gen_range(0..nexts.len())];
            codes.push(next);
        }
        codes
    }
}

/// Knobs of one campaign.
pub struct CampaignConfig {
    /// Full rounds to run after the dry run.
    pub rounds: u32,
    /// Parameters handed to the search core.
    pub search: SearchConfig,
    /// When set, a JSON dump of the tree is written here after every round.
    pub tree_dump_dir: Option<PathBuf>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            rounds: 100,
            search: SearchConfig::default(),
            tree_dump_dir: None,
        }
    }
}

/// What a campaign did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    /// Rounds that replayed a seed.
    pub rounds: u32,
    /// Rounds whose replay uncovered a new path.
    pub discoveries: u32,
    /// Rounds skipped because the chosen simulation node had no seed yet.
    pub skipped: u32,
}

/// One fuzzing campaign: the search core, the corpus and the target.
pub struct Campaign {
    mcts: Mcts,
    target: ScriptedTarget,
    corpus: Vec<Rc<QueueEntry>>,
    rng: Rc<RefCell<Rng>>,
    config: CampaignConfig,
    next_entry: u32,
}

impl Campaign {
    /// Builds a campaign over an initial corpus of recorded entries.
    pub fn new(
        config: CampaignConfig,
        target: ScriptedTarget,
        corpus: Vec<Rc<QueueEntry>>,
        rng: Rc<RefCell<Rng>>,
    ) -> Result<Self, CampaignError> {
        if corpus.is_empty() {
            return Err(CampaignError::EmptyCorpus);
        }
        let mcts = Mcts::new(config.search.clone(), Rc::clone(&rng));
        Ok(Self {
            mcts,
            target,
            corpus,
            rng,
            config,
            next_entry: 0,
        })
    }

    /// The search core, for inspection.
    pub fn mcts(&self) -> &Mcts {
        &self.mcts
    }

    /// Current corpus size, replayed entries included.
    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    /// Replays every corpus entry once, growing the tree and registering
    /// seeds. The dry run performs no selection and no propagation.
    pub fn dry_run(&mut self) {
        for q in self.corpus.clone() {
            let codes = full_trace(&q);
            let root = self.mcts.root();
            let (_, is_new) = self.mcts.expansion(root, &q, &codes);
            debug!("dry run expanded {} (new: {})", q.fname(), is_new);
        }
    }

    /// Runs up to the configured number of full rounds, stopping early when
    /// the search space is exhausted.
    pub fn run(&mut self) -> CampaignStats {
        let mut stats = CampaignStats::default();
        for round in 0..self.config.rounds {
            let selected = match self.mcts.selection() {
                Some(selected) => selected,
                None => {
                    info!("search space exhausted after {} rounds", round);
                    break;
                }
            };
            let replay_target = match self.mcts.simulation(&selected) {
                Some(replay_target) => replay_target,
                None => {
                    stats.skipped += 1;
                    continue;
                }
            };

            // the host replays each chosen seed at least min_samples times
            let samples = self.config.search.min_samples.max(1);
            let mut any_new = false;
            for _ in 0..samples {
                let codes = {
                    let mut rng = self.rng.borrow_mut();
                    self.target.replay(&replay_target.path, &mut rng)
                };
                if codes.len() < 2 {
                    continue;
                }
                let entry = self.record_entry(&codes);
                let root = self.mcts.root();
                let (_, is_new) = self.mcts.expansion(root, &entry, &codes);
                any_new = any_new || is_new;
            }
            self.mcts.propagation(&selected, any_new);

            stats.rounds += 1;
            stats.discoveries += u32::from(any_new);
            self.dump_tree(round);
        }
        stats
    }

    fn record_entry(&mut self, codes: &[ResponseCode]) -> Rc<QueueEntry> {
        let fname = format!("id:{:06}", self.next_entry);
        self.next_entry += 1;
        let entry = Rc::new(
            QueueEntry::from_response_trace(fname, codes)
                .expect("scripted replay produced an invalid trace"),
        );
        self.corpus.push(Rc::clone(&entry));
        entry
    }

    fn dump_tree(&self, round: u32) {
        if let Some(dir) = &self.config.tree_dump_dir {
            let path = dir.join(format!("tree-{:05}.json", round));
            let _ = std::fs::write(path, self.mcts.serialize_tree());
        }
    }
}

fn full_trace(q: &QueueEntry) -> Vec<ResponseCode> {
    q.regions()
        .last()
        .map(|region| region.state_sequence().to_vec())
        .unwrap_or_default()
}
