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

//! Demo driver: MCTS-guided fuzzing rounds against a scripted FTP-like
//! target. Prints the coloured search tree and campaign statistics.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, ValueEnum};
use mcts_fuzz_loop::{Campaign, CampaignConfig, ScriptedTarget};
use protocol_mcts::{logging, Rng, ScoreFunction, SearchConfig};
use queue_model::QueueEntry;
use rand::SeedableRng;

#[derive(Parser)]
#[command(author, version, about = "MCTS-guided fuzzing rounds against a scripted protocol target", long_about = None)]
struct Args {
    /// Full search rounds to run after the dry run.
    #[arg(long, default_value_t = 200)]
    rounds: u32,

    /// UCT exploration weight.
    #[arg(long, default_value_t = std::f64::consts::SQRT_2)]
    rho: f64,

    /// Seed for the shared RNG.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Scoring policy.
    #[arg(long, value_enum, default_value = "uct")]
    score: Score,

    /// Log file for the search core; exported as AFLNET_LEGION_LOG.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Directory receiving a JSON dump of the tree after every round.
    #[arg(long)]
    tree_dump_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Score {
    Uct,
    Random,
}

impl From<Score> for ScoreFunction {
    fn from(score: Score) -> Self {
        match score {
            Score::Uct => ScoreFunction::Uct,
            Score::Random => ScoreFunction::Random,
        }
    }
}

// A small FTP-like session graph: greeting, login, one directory command,
// and the ways a session can be refused or closed.
fn ftp_target() -> ScriptedTarget {
    ScriptedTarget::new(&[
        (&[0], &[220]),
        (&[0, 220], &[331, 530]),
        (&[0, 220, 331], &[230, 530]),
        (&[0, 220, 331, 230], &[257, 550, 221]),
        (&[0, 220, 331, 230, 257], &[250, 221]),
        (&[0, 220, 331, 230, 550], &[221]),
        (&[0, 220, 331, 530], &[221]),
        (&[0, 220, 530], &[221]),
    ])
}

fn corpus() -> Vec<Rc<QueueEntry>> {
    vec![
        Rc::new(
            QueueEntry::from_response_trace("ftp-login", &[0, 220, 331, 230])
                .expect("valid recorded trace"),
        ),
        Rc::new(
            QueueEntry::from_response_trace("ftp-reject", &[0, 220, 530, 221])
                .expect("valid recorded trace"),
        ),
    ]
}

fn main() {
    let args = Args::parse();

    if let Some(path) = &args.log_file {
        std::env::set_var(logging::LOG_PATH_ENV, path);
    } else {
        env_logger::init();
    }
    if let Some(dir) = &args.tree_dump_dir {
        std::fs::create_dir_all(dir).expect("create tree dump directory");
    }

    let rng = Rc::new(RefCell::new(Rng::seed_from_u64(args.seed)));
    let config = CampaignConfig {
        rounds: args.rounds,
        search: SearchConfig {
            rho: args.rho,
            score_function: args.score.into(),
            ..SearchConfig::default()
        },
        tree_dump_dir: args.tree_dump_dir.clone(),
    };

    let mut campaign =
        Campaign::new(config, ftp_target(), corpus(), rng).expect("non-empty corpus");
    campaign.dry_run();
    let stats = campaign.run();

    println!("{}", campaign.mcts().tree());
    println!(
        "rounds: {}, discoveries: {}, skipped: {}, corpus: {}, nodes: {}",
        stats.rounds,
        stats.discoveries,
        stats.skipped,
        campaign.corpus_len(),
        campaign.mcts().tree().len()
    );
}
