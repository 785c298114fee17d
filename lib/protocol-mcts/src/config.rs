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

//! Search parameters, fixed at startup and threaded through the core by
//! value. No process-wide mutable state.

use serde::{Deserialize, Serialize};

use crate::Float;

/// Scoring policy for nodes and seeds.
///
/// `Random` replaces every score with a uniformly distributed integer from
/// the shared RNG. It bypasses the exploration-exhaustion machinery and is a
/// testing aid, not a production policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreFunction {
    /// UCT1: exploitation plus rho-weighted exploration.
    Uct,
    /// Uniformly random scores.
    Random,
}

/// Tunables of one search session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// UCT exploration weight.
    pub rho: Float,

    /// Host-side minimum replays per chosen seed.
    pub min_samples: u32,

    /// Host-side upper bound on replays per chosen seed.
    pub max_samples: u32,

    /// Host-side network timeout in seconds; zero disables it.
    pub conex_timeout: u32,

    /// Reserved: alters an older exploration-exhaustion rule. Round-trips
    /// but is never consulted by the current update protocol.
    pub persistent: bool,

    /// Host-side feedback selector: coverage bitmap only.
    pub coverage_only: bool,

    /// Scoring policy.
    pub score_function: ScoreFunction,

    /// When set, propagation also walks `discovered` up the ancestor chain
    /// of the simulation node instead of touching the node and seed alone.
    pub propagate_selection_path: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rho: std::f64::consts::SQRT_2,
            min_samples: 1,
            max_samples: 100,
            conex_timeout: 0,
            persistent: false,
            coverage_only: true,
            score_function: ScoreFunction::Uct,
            propagate_selection_path: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_session_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.rho, std::f64::consts::SQRT_2);
        assert_eq!(config.min_samples, 1);
        assert_eq!(config.max_samples, 100);
        assert_eq!(config.conex_timeout, 0);
        assert!(!config.persistent);
        assert!(config.coverage_only);
        assert_eq!(config.score_function, ScoreFunction::Uct);
        assert!(!config.propagate_selection_path);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = SearchConfig {
            score_function: ScoreFunction::Random,
            ..SearchConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SearchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.score_function, ScoreFunction::Random);
        assert_eq!(back.rho, config.rho);
    }
}
