//! Windowing derived from an arbitrary window length sequence

use super::{WindowLengthSequence, Windowing};
use crate::Count;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Included, Unbounded};

/// Builds a [`Windowing`] out of any [`WindowLengthSequence`].
///
/// Window start markers (ages) are materialized lazily and only ever appended, so
/// answers computed earlier are never invalidated by later extension. Cost is
/// proportional to the number of windows materialized, which can be large for
/// very gradual decay.
#[derive(Debug)]
pub struct GenericWindowing<S: WindowLengthSequence> {
    lengths: S,
    /// Length of the window holding the newest element
    first_window_length: u64,
    /// Window length -> start marker of the first window of that length
    first_window_of_length: BTreeMap<u64, u64>,
    /// All window start markers
    window_start_markers: BTreeSet<u64>,
    last_window_start: u64,
    last_window_length: u64,
}

impl<S: WindowLengthSequence> GenericWindowing<S> {
    /// Create a windowing over the given sequence
    pub fn new(mut lengths: S) -> Self {
        let first_window_length = lengths.next_window_length();
        let mut windowing = Self {
            lengths,
            first_window_length,
            first_window_of_length: BTreeMap::new(),
            window_start_markers: BTreeSet::new(),
            last_window_start: 0,
            last_window_length: 0,
        };
        windowing.add_window(first_window_length);
        windowing
    }

    /// Number of windows materialized so far
    pub fn num_materialized_windows(&self) -> usize {
        self.window_start_markers.len()
    }

    fn add_window(&mut self, length: u64) {
        debug_assert!(length >= self.last_window_length && length > 0);
        self.last_window_start += self.last_window_length;
        if length > self.last_window_length {
            self.first_window_of_length.insert(length, self.last_window_start);
        }
        self.window_start_markers.insert(self.last_window_start);
        self.last_window_length = length;
    }

    fn add_next_window(&mut self) {
        let length = self.lengths.next_window_length();
        self.add_window(length);
    }

    /// Add windows until one has length >= target. False if the target is unreachable.
    fn add_windows_until_length(&mut self, target_length: u64) -> bool {
        if target_length > self.lengths.max_window_length() {
            return false;
        }
        while self.last_window_length < target_length {
            self.add_next_window();
        }
        true
    }

    /// Add windows until some start marker is larger than the target
    fn add_windows_past_marker(&mut self, target_marker: u64) {
        while self.last_window_start <= target_marker {
            self.add_next_window();
        }
    }
}

impl<S: WindowLengthSequence> Windowing for GenericWindowing<S> {
    fn first_containing_time(&mut self, tl: Count, tr: Count, t: Count) -> Option<Count> {
        debug_assert!(tl <= tr && tr < t);
        // ages of the two endpoints at time t
        let l = t - 1 - tr;
        let r = t - 1 - tl;
        let length = tr - tl + 1;

        if !self.add_windows_until_length(length) {
            return None;
        }
        let first_marker = self
            .first_window_of_length
            .range(length..)
            .next()
            .map(|(_, &marker)| marker)?;
        if first_marker >= l {
            // need l' == first_marker, where l' = T' - 1 - tr
            return Some(first_marker + tr + 1);
        }

        // target length already reached, so [l, r] is either in one window now
        // or will be once l moves into the next window
        self.add_windows_past_marker(l);
        let curr_window_l = self
            .window_start_markers
            .range((Unbounded, Included(l)))
            .next_back()
            .copied()?;
        let curr_window_r = self
            .window_start_markers
            .range((Excluded(l), Unbounded))
            .next()
            .copied()?
            - 1;
        if r <= curr_window_r {
            Some(t)
        } else {
            debug_assert!(curr_window_r - curr_window_l + 1 >= length);
            // need l' == curr_window_r + 1
            Some(curr_window_r + tr + 2)
        }
    }

    fn size_of_first_window(&self) -> u64 {
        self.first_window_length
    }

    fn windows_covering_upto(&mut self, n: u64) -> Vec<u64> {
        if n == 0 {
            return Vec::new();
        }
        self.add_windows_past_marker(n);
        let mut ret = Vec::new();
        let mut prev_marker = 0;
        for &marker in self.window_start_markers.range(1u64..) {
            if marker > n {
                break;
            }
            ret.push(marker - prev_marker);
            prev_marker = marker;
        }
        ret
    }
}
