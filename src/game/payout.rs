//! Head-to-head comparison of the two siblings' picks for one day.

use serde::{Deserialize, Serialize};

use crate::config::payout::{NEGATIVE_LOSER, SOLO_MULTIPLIER, TIE, WINNER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Winner,
    Loser,
    Tie,
    NoSibling,
}

impl Outcome {
    /// Outcome of `own` against the sibling's return, if the sibling picked.
    pub fn of(own: f64, sibling: Option<f64>) -> Self {
        match sibling {
            None => Outcome::NoSibling,
            Some(s) if own > s => Outcome::Winner,
            Some(s) if own < s => Outcome::Loser,
            Some(_) => Outcome::Tie,
        }
    }
}

/// Earnings for one pick.
pub fn earnings(own: f64, sibling: Option<f64>) -> (Outcome, i64) {
    let outcome = Outcome::of(own, sibling);
    let amount = match outcome {
        Outcome::Winner => WINNER,
        Outcome::Tie => TIE,
        Outcome::Loser if own < 0.0 => NEGATIVE_LOSER,
        Outcome::Loser => 0,
        Outcome::NoSibling => (own * SOLO_MULTIPLIER).round() as i64,
    };
    (outcome, amount)
}

/// Who won the day, by index into the pair. None on tie or if either is missing.
pub fn winner_index(a: Option<f64>, b: Option<f64>) -> Option<usize> {
    match (a, b) {
        (Some(ra), Some(rb)) if ra > rb => Some(0),
        (Some(ra), Some(rb)) if rb > ra => Some(1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settle_pair(a: Option<f64>, b: Option<f64>) -> (Option<(Outcome, i64)>, Option<(Outcome, i64)>) {
        (a.map(|ra| earnings(ra, b)), b.map(|rb| earnings(rb, a)))
    }

    #[test]
    fn higher_return_wins_positive_loser_gets_nothing() {
        let (infy, tcs) = settle_pair(Some(1.2), Some(0.8));
        assert_eq!(infy, Some((Outcome::Winner, 100)));
        assert_eq!(tcs, Some((Outcome::Loser, 0)));
    }

    #[test]
    fn negative_loser_pays() {
        let (a, b) = settle_pair(Some(0.5), Some(-0.3));
        assert_eq!(a, Some((Outcome::Winner, 100)));
        assert_eq!(b, Some((Outcome::Loser, -100)));
    }

    #[test]
    fn both_negative_still_has_a_winner() {
        let (a, b) = settle_pair(Some(-0.2), Some(-1.0));
        assert_eq!(a, Some((Outcome::Winner, 100)));
        assert_eq!(b, Some((Outcome::Loser, -100)));
    }

    #[test]
    fn equal_returns_tie_at_zero() {
        let (a, b) = settle_pair(Some(0.7), Some(0.7));
        assert_eq!(a, Some((Outcome::Tie, 0)));
        assert_eq!(b, Some((Outcome::Tie, 0)));
        assert_eq!(winner_index(Some(0.7), Some(0.7)), None);
    }

    #[test]
    fn solo_pick_is_proportional() {
        assert_eq!(earnings(1.26, None), (Outcome::NoSibling, 13));
        assert_eq!(earnings(-0.84, None), (Outcome::NoSibling, -8));
        assert_eq!(settle_pair(None, Some(2.0)).1, Some((Outcome::NoSibling, 20)));
    }

    #[test]
    fn exactly_one_outcome_per_pair() {
        let returns = [-2.5, -0.1, 0.0, 0.1, 1.2, 3.3];
        for &a in &returns {
            for &b in &returns {
                let (oa, ob) = (Outcome::of(a, Some(b)), Outcome::of(b, Some(a)));
                match (oa, ob) {
                    (Outcome::Winner, Outcome::Loser) | (Outcome::Loser, Outcome::Winner) => {
                        assert!(winner_index(Some(a), Some(b)).is_some())
                    }
                    (Outcome::Tie, Outcome::Tie) => assert_eq!(a, b),
                    other => panic!("inconsistent outcomes {other:?} for {a} vs {b}"),
                }
            }
        }
    }
}
