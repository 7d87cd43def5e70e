//! Card dealing order
//!
//! Bahar (side B) is always dealt first. Rounds 1 and 2 each add one card per
//! side; round 3 alternates until a winning card shows up.

use super::types::{Round, Side};

/// Cards each side holds once the given round has been fully dealt.
/// `None` for the continuous round, which has no ceiling.
pub fn cards_per_side_ceiling(round: Round) -> Option<usize> {
    match round {
        Round::First => Some(1),
        Round::Second => Some(2),
        Round::Continuous => None,
    }
}

/// The side the next card must go to, or `None` once a betting round is
/// fully dealt. Counts are cumulative over the session.
pub fn next_expected_side(round: Round, andar_count: usize, bahar_count: usize) -> Option<Side> {
    match cards_per_side_ceiling(round) {
        Some(ceiling) => {
            if bahar_count <= andar_count && bahar_count < ceiling {
                Some(Side::Bahar)
            } else if andar_count < ceiling {
                Some(Side::Andar)
            } else {
                None
            }
        }
        None => {
            if bahar_count <= andar_count {
                Some(Side::Bahar)
            } else {
                Some(Side::Andar)
            }
        }
    }
}

/// Whether a betting round has all its cards. The continuous round never
/// completes by count, only through a winning card.
pub fn is_round_complete(round: Round, andar_count: usize, bahar_count: usize) -> bool {
    match cards_per_side_ceiling(round) {
        Some(ceiling) => andar_count >= ceiling && bahar_count >= ceiling,
        None => false,
    }
}
