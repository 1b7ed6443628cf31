//! Decay functions
//!
//! A decay function is an infinite partition of age space into contiguous windows
//! of non-decreasing length, window 0 holding the newest element. The merge
//! scheduler only needs three derived properties of that partition, captured by
//! the [`Windowing`] trait. [`GenericWindowing`] derives them from any
//! [`WindowLengthSequence`].

mod generic;
mod lengths;

pub use generic::GenericWindowing;
pub use lengths::{ExponentialWindowLengths, RationalPowerWindowLengths, WindowLengthSequence};

use crate::Count;
use std::fmt;

/// The properties of a window sequence that the merge scheduler needs
pub trait Windowing: Send + fmt::Debug {
    /// Smallest `T' >= t` such that once `T'` elements have been inserted, the
    /// absolute count positions `[l, r]` fall inside a single window.
    ///
    /// Requires `l <= r < t`. Returns `None` if no such `T'` exists, which can only
    /// happen when the window lengths are bounded.
    fn first_containing_time(&mut self, l: Count, r: Count, t: Count) -> Option<Count>;

    /// Length of window 0
    fn size_of_first_window(&self) -> u64;

    /// Lengths of the first K windows, newest first, where the first K windows
    /// cover at most `n` elements and the first K+1 cover more than `n`.
    fn windows_covering_upto(&mut self, n: u64) -> Vec<u64>;
}
