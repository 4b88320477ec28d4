//! Per-cycle token and thought budget.

/// Soft caps on reasoner usage within one cycle.
///
/// Tokens are a soft cap: the call that crosses the limit still completes, but
/// no further reasoner work starts afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleBudget {
    max_tokens: u32,
    max_thoughts: u32,
    tokens_used: u32,
    thoughts: u32,
}

impl CycleBudget {
    pub fn new(max_tokens: u32, max_thoughts: u32) -> Self {
        Self {
            max_tokens,
            max_thoughts,
            tokens_used: 0,
            thoughts: 0,
        }
    }

    pub fn charge_tokens(&mut self, tokens: u32) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    pub fn count_thought(&mut self) {
        self.thoughts += 1;
    }

    pub fn tokens_used(&self) -> u32 {
        self.tokens_used
    }

    pub fn thoughts(&self) -> u32 {
        self.thoughts
    }

    pub fn tokens_exhausted(&self) -> bool {
        self.tokens_used >= self.max_tokens
    }

    pub fn thoughts_exhausted(&self) -> bool {
        self.thoughts >= self.max_thoughts
    }

    /// True once either cap is reached.
    pub fn exhausted(&self) -> bool {
        self.tokens_exhausted() || self.thoughts_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_on_either_cap() {
        let mut budget = CycleBudget::new(100, 2);
        assert!(!budget.exhausted());
        budget.charge_tokens(60);
        budget.count_thought();
        assert!(!budget.exhausted());
        budget.charge_tokens(40);
        assert!(budget.tokens_exhausted());

        let mut budget = CycleBudget::new(100, 2);
        budget.count_thought();
        budget.count_thought();
        assert!(budget.thoughts_exhausted());
        assert_eq!(budget.tokens_used(), 0);
    }

    #[test]
    fn token_charges_saturate() {
        let mut budget = CycleBudget::new(10, 1);
        budget.charge_tokens(u32::MAX);
        budget.charge_tokens(5);
        assert_eq!(budget.tokens_used(), u32::MAX);
    }
}
