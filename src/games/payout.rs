//! Round-dependent payout table
//!
//! Andar (side A) pays stake plus equal profit in every round. Bahar (side B)
//! only refunds its stake for the round in which it wins, while an earlier
//! round-1 bahar stake keeps its full profit. From round 3 on, both sides pay
//! double the user's combined position on the winning side.

use super::types::{Amount, Round, Side, UserStakes};

/// Amount credited back to a user when `winning_side` wins during `round`
pub fn calculate_payout(round: Round, winning_side: Side, stakes: &UserStakes) -> Amount {
    let r1 = stakes.round1.get(winning_side);
    let r2 = stakes.round2.get(winning_side);
    match (round, winning_side) {
        (Round::First, Side::Andar) => 2 * r1,
        (Round::First, Side::Bahar) => r1,
        (Round::Second, Side::Andar) => 2 * (r1 + r2),
        (Round::Second, Side::Bahar) => 2 * r1 + r2,
        (Round::Continuous, _) => 2 * (r1 + r2),
    }
}

/// House result for one user: staked minus paid out (negative when the house pays profit)
pub fn house_result(round: Round, winning_side: Side, stakes: &UserStakes) -> i64 {
    stakes.total() as i64 - calculate_payout(round, winning_side, stakes) as i64
}
