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

//! Seeds: replayable inputs registered on simulation nodes.

use std::rc::Rc;

use queue_model::QueueEntry;

/// A replayable input attached to a simulation node: a shared reference to
/// the host's recorded queue entry plus per-seed selection statistics.
///
/// The entry itself is owned by the host and must outlive the seed; the
/// search core never mutates it.
#[derive(Debug, Clone)]
pub struct Seed {
    q: Rc<QueueEntry>,
    selected: u32,
    discovered: u32,
    parent_index: usize,
}

impl Seed {
    pub(crate) fn new(q: Rc<QueueEntry>, parent_index: usize) -> Self {
        Self {
            q,
            selected: 0,
            discovered: 0,
            parent_index,
        }
    }

    /// The recorded queue entry this seed replays.
    pub fn queue_entry(&self) -> &Rc<QueueEntry> {
        &self.q
    }

    /// Times this seed was chosen by selection.
    pub fn selected(&self) -> u32 {
        self.selected
    }

    /// Times a replay of this seed discovered a new path.
    pub fn discovered(&self) -> u32 {
        self.discovered
    }

    /// The seed's own index within its owning pool. Pools reallocate as they
    /// grow; this is the only stable positional reference.
    pub fn parent_index(&self) -> usize {
        self.parent_index
    }

    pub(crate) fn mark_selected(&mut self) {
        self.selected += 1;
    }

    pub(crate) fn record_discovery(&mut self, is_new: bool) {
        self.discovered += u32::from(is_new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_starts_with_zeroed_statistics() {
        let q = Rc::new(QueueEntry::from_response_trace("login", &[0, 220]).unwrap());
        let seed = Seed::new(Rc::clone(&q), 3);
        assert_eq!(seed.selected(), 0);
        assert_eq!(seed.discovered(), 0);
        assert_eq!(seed.parent_index(), 3);
        assert_eq!(seed.queue_entry().fname(), "login");
    }

    #[test]
    fn test_seed_counters_accumulate() {
        let q = Rc::new(QueueEntry::from_response_trace("login", &[0, 220]).unwrap());
        let mut seed = Seed::new(q, 0);
        seed.mark_selected();
        seed.mark_selected();
        seed.record_discovery(true);
        seed.record_discovery(false);
        assert_eq!(seed.selected(), 2);
        assert_eq!(seed.discovered(), 1);
    }
}
