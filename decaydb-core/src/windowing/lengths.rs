//! Window length sequences

use crate::{DecayError, Result};
use std::fmt;

/// Lazily produces the non-decreasing lengths of windows 0, 1, 2, ...
pub trait WindowLengthSequence: Send + fmt::Debug {
    /// Length of the next window. Must be positive and never smaller than the previous one.
    fn next_window_length(&mut self) -> u64;

    /// Upper bound on every length this sequence will ever produce
    fn max_window_length(&self) -> u64 {
        u64::MAX
    }
}

impl<S: WindowLengthSequence + ?Sized> WindowLengthSequence for Box<S> {
    fn next_window_length(&mut self) -> u64 {
        (**self).next_window_length()
    }

    fn max_window_length(&self) -> u64 {
        (**self).max_window_length()
    }
}

/// 1, b, b^2, ..., b^k, ... (each rounded up)
#[derive(Debug, Clone)]
pub struct ExponentialWindowLengths {
    next: f64,
    base: f64,
}

impl ExponentialWindowLengths {
    /// Create a sequence with the given growth base
    pub fn new(base: f64) -> Result<Self> {
        if !base.is_finite() || base < 1.0 {
            return Err(DecayError::Config(format!(
                "exponential base must be finite and >= 1, got {}",
                base
            )));
        }
        Ok(Self { next: 1.0, base })
    }
}

impl WindowLengthSequence for ExponentialWindowLengths {
    fn next_window_length(&mut self) -> u64 {
        let prev = self.next;
        self.next *= self.base;
        prev.ceil() as u64
    }

    fn max_window_length(&self) -> u64 {
        if self.base == 1.0 {
            1
        } else {
            u64::MAX
        }
    }
}

/// Length `s * k^q` repeated `r * k^(p-1)` times, for k = 1, 2, 3, ...
///
/// `q = 0` gives fixed-size windows of length `s`; `p = q = 1` gives 1, 2, 3, ...
#[derive(Debug, Clone)]
pub struct RationalPowerWindowLengths {
    p: u32,
    q: u32,
    r: u64,
    s: u64,
    k: u64,
    curr_length: u64,
    num_left: u64,
}

impl RationalPowerWindowLengths {
    /// Create a sequence with the given exponents and scale factors
    pub fn new(p: u32, q: u32, r: u64, s: u64) -> Result<Self> {
        if p < 1 || r < 1 || s < 1 {
            return Err(DecayError::Config(format!(
                "invalid rational power parameters p = {}, q = {}, r = {}, s = {}",
                p, q, r, s
            )));
        }
        Ok(Self {
            p,
            q,
            r,
            s,
            k: 0,
            curr_length: 0,
            num_left: 0,
        })
    }
}

impl WindowLengthSequence for RationalPowerWindowLengths {
    fn next_window_length(&mut self) -> u64 {
        if self.num_left == 0 {
            self.k += 1;
            self.curr_length = self.s * self.k.pow(self.q);
            self.num_left = self.r * self.k.pow(self.p - 1);
        }
        self.num_left -= 1;
        self.curr_length
    }

    fn max_window_length(&self) -> u64 {
        if self.q == 0 {
            self.s
        } else {
            u64::MAX
        }
    }
}
