//! QPSK phase and mirror ambiguity handling for soft symbols.
//!
//! A soft symbol is a pair of bytes, in-phase then quadrature, each holding a signed soft
//! value offset by [SOFT_ZERO]. A locked carrier loop can settle on any of the 4 constellation
//! rotations, and the receiver front-end may additionally swap the spectrum (I/Q mirror), giving
//! 8 possible interpretations of the same symbol stream.
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Soft value representing "no information", i.e., 0.0.
pub const SOFT_ZERO: u8 = 127;

/// Number of distinct [Rotation]s.
pub const NUM_ROTATIONS: usize = 8;

fn to_soft(v: i32) -> u8 {
    // clamping makes the cast lossless
    (v + i32::from(SOFT_ZERO)).clamp(0, 255) as u8
}

/// Rotate each soft symbol in `buf` by `quarter_turns` * 90 degrees counter-clockwise, then
/// conjugate it if `conjugate` is set.
///
/// Values that fall outside the representable soft range after rotation saturate. A trailing
/// odd byte, if any, is left untouched.
pub fn rotate_soft_symbols(buf: &mut [u8], quarter_turns: u8, conjugate: bool) {
    let turns = quarter_turns % 4;
    if turns == 0 && !conjugate {
        return;
    }
    for sym in buf.chunks_exact_mut(2) {
        let mut i = i32::from(sym[0]) - i32::from(SOFT_ZERO);
        let mut q = i32::from(sym[1]) - i32::from(SOFT_ZERO);
        for _ in 0..turns {
            // (i + jq) * j
            (i, q) = (-q, i);
        }
        if conjugate {
            q = -q;
        }
        sym[0] = to_soft(i);
        sym[1] = to_soft(q);
    }
}

/// One of the 8 rotation hypotheses: 4 phase rotations times 2 conjugation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rotation(u8);

impl Rotation {
    /// All hypotheses, in the order they are tested.
    pub const ALL: [Rotation; NUM_ROTATIONS] = [
        Rotation(0),
        Rotation(1),
        Rotation(2),
        Rotation(3),
        Rotation(4),
        Rotation(5),
        Rotation(6),
        Rotation(7),
    ];

    /// Create the hypothesis with the given index, or `None` if `idx` is not in `0..8`.
    #[must_use]
    pub fn new(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Number of 90 degree turns applied.
    #[must_use]
    pub fn quarter_turns(self) -> u8 {
        self.0 % 4
    }

    /// True if the symbols are conjugated (I/Q mirrored) after rotation.
    #[must_use]
    pub fn is_conjugate(self) -> bool {
        self.0 >= 4
    }

    /// Apply this hypothesis to soft symbol bytes in place.
    pub fn apply(self, buf: &mut [u8]) {
        rotate_soft_symbols(buf, self.quarter_turns(), self.is_conjugate());
    }

    /// Apply the inverse of this hypothesis in place, such that `apply` after `unapply` leaves
    /// symbols unchanged (barring saturation).
    pub fn unapply(self, buf: &mut [u8]) {
        rotate_soft_symbols(buf, 0, self.is_conjugate());
        rotate_soft_symbols(buf, (4 - self.quarter_turns()) % 4, false);
    }
}

impl Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
