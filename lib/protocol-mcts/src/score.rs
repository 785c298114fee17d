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

//! UCT1 scoring as pure functions over counters.
//!
//! Nodes and seeds score identically: the discovery rate plus a
//! rho-weighted exploration bonus against the parent's visit count. The
//! unvisited case returns `+∞` so every candidate is tried at least once
//! before the formula applies.

use crate::Float;

/// Exploitation term: discovery rate. `+∞` when never selected.
pub fn exploitation(discovered: u32, selected: u32) -> Float {
    if selected == 0 {
        return Float::INFINITY;
    }
    Float::from(discovered) / Float::from(selected)
}

/// Exploration term of UCT1. `+∞` when never selected.
pub fn exploration(selected: u32, parent_selected: u32, rho: Float) -> Float {
    if selected == 0 {
        return Float::INFINITY;
    }
    rho * (2.0 * Float::from(parent_selected).ln() / Float::from(selected)).sqrt()
}

/// Full UCT1 score over a `(selected, discovered)` pair under a parent's
/// visit count.
pub fn uct(discovered: u32, selected: u32, parent_selected: u32, rho: Float) -> Float {
    if selected == 0 {
        return Float::INFINITY;
    }
    exploitation(discovered, selected) + exploration(selected, parent_selected, rho)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_unselected_scores_are_infinite() {
        assert_eq!(exploitation(0, 0), Float::INFINITY);
        assert_eq!(exploration(0, 100, 1.414), Float::INFINITY);
        assert_eq!(uct(0, 0, 100, 1.414), Float::INFINITY);
    }

    #[test]
    fn test_exploitation_is_discovery_rate() {
        assert_abs_diff_eq!(exploitation(3, 4), 0.75);
        assert_abs_diff_eq!(exploitation(0, 7), 0.0);
        // a node can sit on more discoveries than selections
        assert_abs_diff_eq!(exploitation(6, 4), 1.5);
    }

    #[test]
    fn test_exploration_term() {
        assert_abs_diff_eq!(exploration(79, 100, 1.414), 0.4828, epsilon = 1e-4);
    }

    #[test]
    fn test_uct_combines_both_terms() {
        assert_abs_diff_eq!(uct(60, 79, 100, 1.414), 1.2423, epsilon = 1e-4);
        assert_abs_diff_eq!(
            uct(1, 2, 10, std::f64::consts::SQRT_2),
            2.6460,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_exploration_shrinks_with_visits() {
        let rho = std::f64::consts::SQRT_2;
        let few = exploration(2, 100, rho);
        let many = exploration(50, 100, rho);
        assert!(few > many);
    }
}
