use chrono::Utc;

/// Current wall clock in epoch milliseconds; the unit of `createdAt`,
/// `updatedAt` and `lastUsed`.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn now_ms_does_not_go_backwards_within_a_call_pair() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
