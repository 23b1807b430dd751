//! Majority trigger decision.
//!
//! Pure and backend-agnostic: both room store backends call [`evaluate`]
//! with the counts they read and persist the result themselves.

/// Number of votes needed to trigger a room with `total` participants.
///
/// `ceil(total / 2)`.
#[must_use]
pub fn threshold(total: usize) -> usize {
    total.div_ceil(2)
}

/// Decide whether a room is triggered.
///
/// - Once triggered, always triggered.
/// - An empty room never triggers, whatever the vote count.
/// - Otherwise at least one vote and `votes >= ceil(total / 2)`.
#[must_use]
pub fn evaluate(total: usize, votes: usize, already_triggered: bool) -> bool {
    if already_triggered {
        return true;
    }
    if total == 0 {
        return false;
    }
    votes > 0 && votes >= threshold(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_rounds_up() {
        assert_eq!(threshold(0), 0);
        assert_eq!(threshold(1), 1);
        assert_eq!(threshold(2), 1);
        assert_eq!(threshold(3), 2);
        assert_eq!(threshold(4), 2);
        assert_eq!(threshold(5), 3);
    }

    #[test]
    fn test_three_participants() {
        assert!(!evaluate(3, 0, false));
        assert!(!evaluate(3, 1, false));
        assert!(evaluate(3, 2, false));
        assert!(evaluate(3, 3, false));
    }

    #[test]
    fn test_single_participant_single_vote() {
        assert!(evaluate(1, 1, false));
    }

    #[test]
    fn test_empty_room_never_triggers() {
        assert!(!evaluate(0, 0, false));
        assert!(!evaluate(0, 5, false));
    }

    #[test]
    fn test_already_triggered_is_irreversible() {
        assert!(evaluate(0, 0, true));
        assert!(evaluate(3, 0, true));
        assert!(evaluate(100, 1, true));
    }

    #[test]
    fn test_even_room_needs_half() {
        assert!(!evaluate(4, 1, false));
        assert!(evaluate(4, 2, false));
    }

    /// Votes from participants who already left still count.
    #[test]
    fn test_votes_may_exceed_total() {
        assert!(evaluate(1, 3, false));
    }
}
