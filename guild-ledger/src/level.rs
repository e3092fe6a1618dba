//! Level curve
//!
//! Experience needed to climb from `level` to `level + 1` is
//! `5·level² + 50·level + 100`. Reaching `level` from zero therefore costs the
//! cumulative threshold
//!
//! ```text
//! xp_for_level(L) = Σ_{k<L} (5k² + 50k + 100)
//!                 = 5·(L-1)·L·(2L-1)/6 + 25·L·(L-1) + 100·L
//! ```
//!
//! `level_from_xp` bisects over that closed form; `level_from_xp_iterative`
//! subtracts one level at a time. Both must agree for every input.

use serde::{Deserialize, Serialize};

/// Upper bound on any level reachable with a `u64` of experience
const LEVEL_CEILING: u64 = 1 << 22;

/// Level and progress inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    /// Completed levels
    pub level: u64,
    /// Experience past the level's threshold
    pub remainder: u64,
}

/// Experience needed to go from `level` to `level + 1`
pub fn next_level_xp(level: u64) -> u64 {
    5u64.saturating_mul(level.saturating_mul(level))
        .saturating_add(50u64.saturating_mul(level))
        .saturating_add(100)
}

fn cumulative_xp(level: u64) -> u128 {
    let l = level as u128;
    if l == 0 {
        return 0;
    }
    5 * (l - 1) * l * (2 * l - 1) / 6 + 25 * l * (l - 1) + 100 * l
}

/// Total experience needed to reach `level` from zero (saturating)
pub fn xp_for_level(level: u64) -> u64 {
    u64::try_from(cumulative_xp(level)).unwrap_or(u64::MAX)
}

/// Level reached with `xp` accumulated experience
pub fn level_from_xp(xp: u64) -> LevelProgress {
    let target = xp as u128;

    // Invariant: cumulative_xp(lo) <= xp < cumulative_xp(hi)
    let (mut lo, mut hi) = (0u64, LEVEL_CEILING);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if cumulative_xp(mid) <= target {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    LevelProgress {
        level: lo,
        remainder: (target - cumulative_xp(lo)) as u64,
    }
}

/// Same as [`level_from_xp`], by repeated subtraction
pub fn level_from_xp_iterative(xp: u64) -> LevelProgress {
    let mut remainder = xp;
    let mut level = 0u64;

    loop {
        let step = next_level_xp(level);
        if remainder < step {
            break;
        }
        remainder -= step;
        level += 1;
    }

    LevelProgress { level, remainder }
}
