//! Bid scoring.
//!
//! Pure functions; no clock, no state. The score is
//! `alpha * price + beta / (response_time + 1) + gamma * weight`, with
//! response time measured from session start and clamped at zero so the
//! latency term stays finite and monotone under clock skew.

use std::cmp::Ordering;

/// Seconds between session start and the bid, clamped at zero.
pub fn response_time_secs(bid_ms: i64, start_ms: i64) -> f64 {
    (bid_ms - start_ms).max(0) as f64 / 1000.0
}

pub fn bid_score(
    price: f64,
    response_time_secs: f64,
    weight: f64,
    alpha: f64,
    beta: f64,
    gamma: f64,
) -> f64 {
    alpha * price + beta / (response_time_secs + 1.0) + gamma * weight
}

/// Total order for rankings: score descending, then user id ascending.
/// Matches the sorted-set read order, so ranks agree across both paths.
pub fn ranking_order(a: &(f64, String), b: &(f64, String)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn score_matches_reference_values() {
        // One second after start, weight 1.0:
        // 1 * 300 + 100 / (1 + 1) + 1 * 1 = 351.0
        let rt = response_time_secs(1_000, 0);
        assert_eq!(bid_score(300.0, rt, 1.0, 1.0, 100.0, 1.0), 351.0);

        // Three seconds after start:
        // 500 + 100 / 4 + 1 = 526.0
        let rt = response_time_secs(3_000, 0);
        assert_eq!(bid_score(500.0, rt, 1.0, 1.0, 100.0, 1.0), 526.0);
    }

    #[test]
    fn response_time_clamps_before_start() {
        assert_eq!(response_time_secs(5_000, 10_000), 0.0);
        let score = bid_score(100.0, response_time_secs(5_000, 10_000), 1.0, 1.0, 100.0, 1.0);
        assert!(score.is_finite());
        // Full latency bonus when clamped.
        assert_eq!(score, 100.0 + 100.0 + 1.0);
    }

    #[test]
    fn ranking_order_breaks_ties_by_user_id() {
        let a = (10.0, "aaa".to_string());
        let b = (10.0, "bbb".to_string());
        let c = (12.0, "zzz".to_string());

        let mut entries = vec![b.clone(), a.clone(), c.clone()];
        entries.sort_by(ranking_order);

        assert_eq!(entries, vec![c, a, b]);
    }

    proptest! {
        #[test]
        fn higher_price_never_lowers_score(
            price in 1.0f64..1e9,
            bump in 0.001f64..1e6,
            rt in 0.0f64..1e6,
            weight in 0.0f64..1e3,
        ) {
            let low = bid_score(price, rt, weight, 1.0, 100.0, 1.0);
            let high = bid_score(price + bump, rt, weight, 1.0, 100.0, 1.0);
            prop_assert!(high > low);
        }

        #[test]
        fn slower_response_never_raises_score(
            price in 1.0f64..1e9,
            rt in 0.0f64..1e6,
            delay in 0.001f64..1e6,
        ) {
            let fast = bid_score(price, rt, 1.0, 1.0, 100.0, 1.0);
            let slow = bid_score(price, rt + delay, 1.0, 1.0, 100.0, 1.0);
            prop_assert!(slow <= fast);
        }

        #[test]
        fn ranking_order_is_total_and_antisymmetric(
            s1 in 0.0f64..1e9,
            s2 in 0.0f64..1e9,
        ) {
            let a = (s1, "user-a".to_string());
            let b = (s2, "user-b".to_string());

            let ab = ranking_order(&a, &b);
            let ba = ranking_order(&b, &a);
            prop_assert_eq!(ab, ba.reverse());
        }
    }
}
