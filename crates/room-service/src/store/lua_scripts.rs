//! Lua scripts for atomic room operations in Redis.
//!
//! Scripts run atomically on the server, so the triggered-marker check and
//! the vote insert cannot interleave with another process's writes.

/// Lua script for casting a vote.
///
/// Arguments:
/// - KEYS[1]: Participant set (`room:{id}:participants`)
/// - KEYS[2]: Voter set (`room:{id}:votes`)
/// - KEYS[3]: Triggered marker (`room:{id}:triggered`)
/// - ARGV[1]: Participant ID
/// - ARGV[2]: TTL in seconds
///
/// Returns:
/// - 1: Vote recorded
/// - 0: Already voted, or the room has triggered (no mutation)
pub const CAST_VOTE: &str = r"
if redis.call('GET', KEYS[3]) == '1' then
    return 0
end

local added = redis.call('SADD', KEYS[2], ARGV[1])

-- Sliding expiry on all room keys
redis.call('EXPIRE', KEYS[1], ARGV[2])
redis.call('EXPIRE', KEYS[2], ARGV[2])
redis.call('EXPIRE', KEYS[3], ARGV[2])

return added
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_vote_checks_marker_before_insert() {
        let marker_check = CAST_VOTE.find("GET', KEYS[3]");
        let insert = CAST_VOTE.find("SADD");
        assert!(marker_check.is_some());
        assert!(insert.is_some());
        assert!(marker_check < insert);
    }

    #[test]
    fn test_cast_vote_refreshes_all_keys() {
        for key in ["KEYS[1]", "KEYS[2]", "KEYS[3]"] {
            assert!(
                CAST_VOTE.contains(&format!("EXPIRE', {key}, ARGV[2]")),
                "missing EXPIRE for {key}"
            );
        }
    }
}
