//! Tick-size aggregation and offset-gated matching rule transitions.

use serde::{Deserialize, Serialize};

/// Price-aggregation granularity. Orders retain their individual price but
/// are bucketed for crossing purposes when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickSize {
    Disabled,
    Enabled(u64),
}

impl Default for TickSize {
    fn default() -> Self {
        TickSize::Disabled
    }
}

impl TickSize {
    /// Bucket price for a bid: `floor(price / ticks) * ticks`.
    pub fn bid_bucket(&self, price: u64) -> u64 {
        match self {
            TickSize::Disabled => price,
            TickSize::Enabled(ticks) if *ticks > 0 => (price / ticks) * ticks,
            TickSize::Enabled(_) => price,
        }
    }

    /// Bucket price for an ask: `ceil(price / ticks) * ticks`.
    pub fn ask_bucket(&self, price: u64) -> u64 {
        match self {
            TickSize::Disabled => price,
            TickSize::Enabled(ticks) if *ticks > 0 => {
                let ticks = *ticks;
                ((price + ticks - 1) / ticks) * ticks
            }
            TickSize::Enabled(_) => price,
        }
    }
}

/// Ordered, non-empty list of `(startOffset, TickSize)` rules for a pair.
/// The rule in effect for offset `o` is the one with the largest
/// `startOffset <= o`.
#[derive(Debug, Clone)]
pub struct MatchingRules {
    rules: Vec<(u64, TickSize)>,
}

impl MatchingRules {
    /// Builds a rule set, sorting by `startOffset` and always guaranteeing
    /// a rule effective from offset 0.
    pub fn new(mut rules: Vec<(u64, TickSize)>) -> Self {
        if rules.is_empty() {
            rules.push((0, TickSize::Disabled));
        }
        rules.sort_by_key(|(offset, _)| *offset);
        if rules[0].0 != 0 {
            rules.insert(0, (0, TickSize::Disabled));
        }
        Self { rules }
    }

    pub fn disabled() -> Self {
        Self::new(vec![(0, TickSize::Disabled)])
    }

    /// The underlying `(startOffset, TickSize)` list, for persistence.
    pub fn as_vec(&self) -> Vec<(u64, TickSize)> {
        self.rules.clone()
    }

    /// The tick size in effect at `offset`.
    pub fn effective_at(&self, offset: u64) -> TickSize {
        self.rules
            .iter()
            .rev()
            .find(|(start, _)| *start <= offset)
            .map(|(_, tick)| *tick)
            .unwrap_or(TickSize::Disabled)
    }

    /// True if `offset` is the first offset at which a different rule than
    /// `prev_offset` takes effect (a rule-transition boundary).
    pub fn crosses_boundary(&self, prev_offset: u64, offset: u64) -> bool {
        self.rules
            .iter()
            .any(|(start, _)| *start > prev_offset && *start <= offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bid_bucket_floors() {
        assert_eq!(TickSize::Enabled(100).bid_bucket(250), 200);
    }

    #[test]
    fn ask_bucket_ceils() {
        assert_eq!(TickSize::Enabled(100).ask_bucket(205), 300);
        assert_eq!(TickSize::Enabled(100).ask_bucket(250), 300);
        assert_eq!(TickSize::Enabled(100).ask_bucket(300), 300);
    }

    #[test]
    fn rule_selection_picks_largest_start_leq_offset() {
        let rules = MatchingRules::new(vec![(0, TickSize::Disabled), (100, TickSize::Enabled(50))]);
        assert_eq!(rules.effective_at(50), TickSize::Disabled);
        assert_eq!(rules.effective_at(100), TickSize::Enabled(50));
        assert_eq!(rules.effective_at(1000), TickSize::Enabled(50));
    }

    #[test]
    fn detects_boundary_crossing() {
        let rules = MatchingRules::new(vec![(0, TickSize::Disabled), (100, TickSize::Enabled(50))]);
        assert!(!rules.crosses_boundary(10, 99));
        assert!(rules.crosses_boundary(99, 100));
        assert!(!rules.crosses_boundary(100, 150));
    }
}
