//! Market resolution policies
//!
//! The simulation has no ground truth, so when the round limit is reached every
//! open market is settled by a pluggable policy. The default picks uniformly at
//! random; [`FixedResolution`] stands in for an external oracle feed.

use crate::market::{MarketState, MarketType, Outcome};
use std::collections::HashMap;

/// Chooses the final outcome of a market
pub trait ResolutionPolicy: Send + Sync {
    /// Outcome for an unresolved market, or `None` to leave it open
    fn choose_outcome(&mut self, market: &MarketState) -> Option<Outcome>;

    fn name(&self) -> &'static str;
}

/// Uniform choice over declared options, or a uniform value in range for scalar markets
pub struct RandomResolution {
    rng: fastrand::Rng,
}

impl RandomResolution {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    /// Reproducible resolution for tests and replays
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl Default for RandomResolution {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionPolicy for RandomResolution {
    fn choose_outcome(&mut self, market: &MarketState) -> Option<Outcome> {
        match market.market_type {
            MarketType::Scalar => {
                let min = market.range_min?;
                let max = market.range_max?;
                Some(Outcome::Value(min + self.rng.f64() * (max - min)))
            }
            MarketType::Binary | MarketType::Categorical => {
                if market.options.is_empty() {
                    return None;
                }
                let idx = self.rng.usize(..market.options.len());
                Some(Outcome::Option(market.options[idx].clone()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Externally supplied outcomes per event id; other markets use the fallback policy
pub struct FixedResolution {
    outcomes: HashMap<String, Outcome>,
    fallback: Box<dyn ResolutionPolicy>,
}

impl FixedResolution {
    pub fn new(outcomes: HashMap<String, Outcome>) -> Self {
        Self {
            outcomes,
            fallback: Box::new(RandomResolution::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn ResolutionPolicy>) -> Self {
        self.fallback = fallback;
        self
    }
}

impl ResolutionPolicy for FixedResolution {
    fn choose_outcome(&mut self, market: &MarketState) -> Option<Outcome> {
        match self.outcomes.get(&market.event_id) {
            Some(outcome) => Some(outcome.clone()),
            None => self.fallback.choose_outcome(market),
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_resolution_picks_declared_option() {
        let market = MarketState::categorical(
            "fed",
            "Decision?",
            vec!["Cut".into(), "Hold".into(), "Hike".into()],
        );
        let mut policy = RandomResolution::with_seed(7);

        for _ in 0..20 {
            match policy.choose_outcome(&market) {
                Some(Outcome::Option(name)) => assert!(market.options.contains(&name)),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_random_resolution_is_reproducible() {
        let market = MarketState::binary("event", "Question?");
        let mut a = RandomResolution::with_seed(42);
        let mut b = RandomResolution::with_seed(42);

        for _ in 0..10 {
            assert_eq!(a.choose_outcome(&market), b.choose_outcome(&market));
        }
    }

    #[test]
    fn test_random_scalar_resolution_in_range() {
        let market = MarketState::scalar("rate", "Rate?", 3.5, 5.5);
        let mut policy = RandomResolution::with_seed(1);
        match policy.choose_outcome(&market) {
            Some(Outcome::Value(v)) => assert!((3.5..=5.5).contains(&v)),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_fixed_resolution_with_fallback() {
        let mut outcomes = HashMap::new();
        outcomes.insert("known".to_string(), Outcome::option("No"));
        let mut policy =
            FixedResolution::new(outcomes).with_fallback(Box::new(RandomResolution::with_seed(3)));

        let known = MarketState::binary("known", "Known?");
        assert_eq!(policy.choose_outcome(&known), Some(Outcome::option("No")));

        let unknown = MarketState::binary("unknown", "Unknown?");
        assert!(policy.choose_outcome(&unknown).is_some());
    }
}
