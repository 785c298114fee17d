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

#![warn(missing_docs)]

//! Recorded message-stream model for a stateful protocol fuzzer.
//!
//! A queue entry is the recording of one client/server exchange: an ordered
//! list of regions, one per client message, each annotated with the
//! cumulative sequence of server reply codes observed up to the end of that
//! region's byte slice. The search layer reads these records to decide which
//! recorded prefix to replay and where to mutate from; it never mutates them.

use serde::{Deserialize, Serialize};

/// A server reply code as produced by the protocol parser.
pub type ResponseCode = u32;

/// Identifier of the synthetic root state. Never a real reply code.
pub const ROOT_CODE: ResponseCode = 0;

/// Identifier reserved for simulation nodes, outside the protocol code space.
pub const SIMULATION_CODE: ResponseCode = 999;

/// Queue-entry validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueModelError {
    /// The entry carries no regions.
    #[error("queue entry {0} has no regions")]
    NoRegions(String),

    /// A region carries no state sequence.
    #[error("region {0} has an empty state sequence")]
    EmptyStateSequence(usize),

    /// A region's state sequence does not begin at the root state.
    #[error("region {0} does not start at the root state")]
    MissingRootState(usize),

    /// A region's state sequence contains a reserved sentinel code.
    #[error("region {0} contains reserved code {1}")]
    ReservedCode(usize, ResponseCode),
}

/// A byte range of a recorded message stream, annotated with the cumulative
/// reply codes observed up to the end of that range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    state_sequence: Vec<ResponseCode>,
}

impl Region {
    /// Builds a region from the cumulative reply codes covering it.
    pub fn new(state_sequence: Vec<ResponseCode>) -> Self {
        Self { state_sequence }
    }

    /// Number of states recorded for this region.
    pub fn state_count(&self) -> usize {
        self.state_sequence.len()
    }

    /// The cumulative reply codes, root state first.
    pub fn state_sequence(&self) -> &[ResponseCode] {
        &self.state_sequence
    }

    /// True if this region's state sequence starts with `prefix`.
    pub fn matches_prefix(&self, prefix: &[ResponseCode]) -> bool {
        self.state_sequence.len() >= prefix.len() && self.state_sequence[..prefix.len()] == *prefix
    }

    /// The last reply code recorded for this region.
    pub fn last_code(&self) -> Option<ResponseCode> {
        self.state_sequence.last().copied()
    }

    /// True if `code` is the final reply recorded for this region.
    pub fn ends_with(&self, code: ResponseCode) -> bool {
        self.last_code() == Some(code)
    }
}

/// A recorded message stream in the fuzzer's queue.
///
/// Entries are owned by the host and outlive every seed that references
/// them; the search layer holds shared read-only references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    fname: String,
    regions: Vec<Region>,
}

impl QueueEntry {
    /// Builds a queue entry, validating every region's state sequence.
    pub fn new(fname: impl Into<String>, regions: Vec<Region>) -> Result<Self, QueueModelError> {
        let fname = fname.into();
        if regions.is_empty() {
            return Err(QueueModelError::NoRegions(fname));
        }
        for (index, region) in regions.iter().enumerate() {
            let states = region.state_sequence();
            if states.is_empty() {
                return Err(QueueModelError::EmptyStateSequence(index));
            }
            if states[0] != ROOT_CODE {
                return Err(QueueModelError::MissingRootState(index));
            }
            for &code in &states[1..] {
                if code == ROOT_CODE || code == SIMULATION_CODE {
                    return Err(QueueModelError::ReservedCode(index, code));
                }
            }
        }
        Ok(Self { fname, regions })
    }

    /// Builds an entry from one full response trace, one region per reply.
    ///
    /// Region `k` covers the bytes that produced reply `codes[k + 1]` and
    /// records the cumulative prefix `codes[0..=k + 1]`.
    pub fn from_response_trace(
        fname: impl Into<String>,
        codes: &[ResponseCode],
    ) -> Result<Self, QueueModelError> {
        let regions = (1..codes.len())
            .map(|k| Region::new(codes[..=k].to_vec()))
            .collect();
        Self::new(fname, regions)
    }

    /// The on-disk name of the recorded stream.
    pub fn fname(&self) -> &str {
        &self.fname
    }

    /// The ordered regions of the stream.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The region at `index`.
    pub fn region(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    /// True if `index` names the final region — no recorded bytes extend
    /// past it, so nothing can be replayed from beyond its end.
    pub fn is_last_region(&self, index: usize) -> bool {
        index + 1 == self.regions.len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_region_prefix_matching() {
        let region = Region::new(vec![0, 220, 331]);
        assert_eq!(region.state_count(), 3);
        assert!(region.matches_prefix(&[0]));
        assert!(region.matches_prefix(&[0, 220]));
        assert!(region.matches_prefix(&[0, 220, 331]));
        assert!(!region.matches_prefix(&[0, 230]));
        assert!(!region.matches_prefix(&[0, 220, 331, 230]));
    }

    #[test]
    fn test_region_last_code() {
        let region = Region::new(vec![0, 220, 331]);
        assert_eq!(region.last_code(), Some(331));
        assert!(region.ends_with(331));
        assert!(!region.ends_with(220));
    }

    #[test]
    fn test_entry_requires_regions() {
        assert_eq!(
            QueueEntry::new("empty", vec![]),
            Err(QueueModelError::NoRegions("empty".to_string()))
        );
    }

    #[test]
    fn test_entry_rejects_empty_state_sequence() {
        let regions = vec![Region::new(vec![0, 220]), Region::new(vec![])];
        assert_eq!(
            QueueEntry::new("bad", regions),
            Err(QueueModelError::EmptyStateSequence(1))
        );
    }

    #[test]
    fn test_entry_rejects_missing_root_state() {
        let regions = vec![Region::new(vec![220, 331])];
        assert_eq!(
            QueueEntry::new("bad", regions),
            Err(QueueModelError::MissingRootState(0))
        );
    }

    #[test]
    fn test_entry_rejects_reserved_codes() {
        let regions = vec![Region::new(vec![0, 999])];
        assert_eq!(
            QueueEntry::new("bad", regions),
            Err(QueueModelError::ReservedCode(0, 999))
        );

        let regions = vec![Region::new(vec![0, 220, 0])];
        assert_eq!(
            QueueEntry::new("bad", regions),
            Err(QueueModelError::ReservedCode(0, 0))
        );
    }

    #[test]
    fn test_from_response_trace_builds_cumulative_regions() {
        let entry = QueueEntry::from_response_trace("login", &[0, 220, 331, 230]).unwrap();
        assert_eq!(entry.regions().len(), 3);
        assert_eq!(entry.region(0).state_sequence(), &[0, 220]);
        assert_eq!(entry.region(1).state_sequence(), &[0, 220, 331]);
        assert_eq!(entry.region(2).state_sequence(), &[0, 220, 331, 230]);
        assert!(!entry.is_last_region(0));
        assert!(!entry.is_last_region(1));
        assert!(entry.is_last_region(2));
    }

    #[test]
    fn test_from_response_trace_needs_at_least_one_reply() {
        assert_eq!(
            QueueEntry::from_response_trace("short", &[0]),
            Err(QueueModelError::NoRegions("short".to_string()))
        );
    }

    #[test]
    fn test_entry_serde_round_trip() {
        let entry = QueueEntry::from_response_trace("login", &[0, 220, 331]).unwrap();
        let json = serde_json::to_string(&entry).unwrap();
        let back: QueueEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }

    fn reply_codes() -> impl Strategy<Value = Vec<ResponseCode>> {
        prop::collection::vec(100..600u32, 1..8)
    }

    proptest! {
        #[test]
        fn test_trace_regions_are_cumulative_prefixes(replies in reply_codes()) {
            let mut codes = vec![ROOT_CODE];
            codes.extend(&replies);
            let entry = QueueEntry::from_response_trace("trace", &codes).unwrap();

            prop_assert_eq!(entry.regions().len(), replies.len());
            for (k, region) in entry.regions().iter().enumerate() {
                prop_assert_eq!(region.state_count(), k + 2);
                prop_assert!(region.matches_prefix(&codes[..=k + 1]));
                prop_assert!(region.ends_with(codes[k + 1]));
            }
        }

        #[test]
        fn test_only_final_region_is_last(replies in reply_codes()) {
            let mut codes = vec![ROOT_CODE];
            codes.extend(&replies);
            let entry = QueueEntry::from_response_trace("trace", &codes).unwrap();

            for index in 0..entry.regions().len() {
                prop_assert_eq!(entry.is_last_region(index), index + 1 == replies.len());
            }
        }
    }
}
