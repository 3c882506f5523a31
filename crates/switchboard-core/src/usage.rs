//! Token usage accounting for a run
//!
//! Every agent call reports a [`TokenUsage`]; the run keeps one running total.
//! Aggregation is plain saturating addition, so the order calls are folded in
//! never changes the total.

use serde::{Deserialize, Serialize};

/// Token counts for one model call, or the sum over several
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Number of calls folded into this value
    pub calls: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self::with_total(input_tokens, output_tokens, input_tokens + output_tokens)
    }

    /// Provider-reported usage. Some providers count reasoning or cached
    /// tokens into the total, so it is taken as given.
    pub fn with_total(input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
            calls: 1,
        }
    }

    /// Fold another usage into this total
    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.calls = self.calls.saturating_add(other.calls);
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.input_tokens == 0 && self.output_tokens == 0
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(mut self, rhs: TokenUsage) -> TokenUsage {
        self.merge(&rhs);
        self
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), |acc, u| acc + u)
    }
}

impl std::fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Input={}, Output={}, Total={}",
            self.input_tokens, self.output_tokens, self.total_tokens
        )
    }
}

/// `total' = total + usage`, where a missing usage contributes nothing
pub fn accumulate(total: TokenUsage, usage: Option<&TokenUsage>) -> TokenUsage {
    match usage {
        Some(u) => total + *u,
        None => total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accumulate() {
        let mut total = TokenUsage::default();
        total = accumulate(total, Some(&TokenUsage::new(100, 50)));
        total = accumulate(total, None);
        total = accumulate(total, Some(&TokenUsage::with_total(200, 100, 320)));

        assert_eq!(total.input_tokens, 300);
        assert_eq!(total.output_tokens, 150);
        assert_eq!(total.total_tokens, 470);
        assert_eq!(total.calls, 2);
    }

    #[test]
    fn test_accumulate_saturates() {
        let big = TokenUsage::new(u64::MAX - 1, 0);
        let total = accumulate(big, Some(&TokenUsage::new(10, 0)));
        assert_eq!(total.input_tokens, u64::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            TokenUsage::new(10, 5).to_string(),
            "Input=10, Output=5, Total=15"
        );
    }

    #[test]
    fn test_default_is_empty() {
        assert!(TokenUsage::default().is_empty());
        assert!(!TokenUsage::new(1, 0).is_empty());
    }

    fn arb_usage() -> impl Strategy<Value = TokenUsage> {
        (0u64..1_000_000, 0u64..1_000_000, 0u64..3_000_000)
            .prop_map(|(i, o, t)| TokenUsage::with_total(i, o, t))
    }

    proptest! {
        #[test]
        fn prop_sum_is_order_independent(usages in prop::collection::vec(arb_usage(), 0..12)) {
            let forward: TokenUsage = usages.iter().copied().sum();
            let backward: TokenUsage = usages.iter().rev().copied().sum();
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn prop_accumulate_is_associative(a in arb_usage(), b in arb_usage(), c in arb_usage()) {
            let left = accumulate(accumulate(a, Some(&b)), Some(&c));
            let right = accumulate(a, Some(&accumulate(b, Some(&c))));
            prop_assert_eq!(left, right);
        }
    }
}
