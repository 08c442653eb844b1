use crate::domain::events::ArbitrageDetected;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of a binary prediction market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn complement(self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }
}

/// Read-only snapshot of a binary market on one venue, pulled per scan cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMarket {
    pub market_id: String,
    pub description: String,
    /// Price of the YES contract, 0.0 - 1.0
    pub yes_price: Decimal,
    /// Price of the NO contract, 0.0 - 1.0
    pub no_price: Decimal,
    pub platform: String,
    pub volume: Decimal,
}

impl PredictionMarket {
    pub fn new(
        market_id: impl Into<String>,
        description: impl Into<String>,
        yes_price: Decimal,
        no_price: Decimal,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            market_id: market_id.into(),
            description: description.into(),
            yes_price,
            no_price,
            platform: platform.into(),
            volume: Decimal::ZERO,
        }
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = volume;
        self
    }

    pub fn price(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Yes => self.yes_price,
            Outcome::No => self.no_price,
        }
    }

    /// Both contract prices lie in [0, 1]. Feeds are expected to drop anything else.
    pub fn has_valid_prices(&self) -> bool {
        let in_range = |p: Decimal| p >= Decimal::ZERO && p <= Decimal::ONE;
        in_range(self.yes_price) && in_range(self.no_price)
    }

    /// Order pair routed to the prediction-market adapter for one outcome.
    pub fn pair(&self, outcome: Outcome) -> String {
        format!("{}:{}:{}", self.platform, self.market_id, outcome.as_str())
    }

    /// Best complementary-outcome trade against `other`, if any costs under 1.0.
    ///
    /// Checks YES here + NO there, then NO here + YES there, and keeps the
    /// higher ROI (the first direction on a tie).
    pub fn arbitrage_against(&self, other: &PredictionMarket) -> Option<ArbitrageOpportunity> {
        let mut best: Option<ArbitrageOpportunity> = None;
        for outcome in [Outcome::Yes, Outcome::No] {
            let leg_a = ArbitrageLeg::new(self, outcome);
            let leg_b = ArbitrageLeg::new(other, outcome.complement());
            let cost = leg_a.price + leg_b.price;
            if cost <= Decimal::ZERO || cost >= Decimal::ONE {
                continue;
            }
            let profit = Decimal::ONE - cost;
            let roi = profit / cost;
            if best.as_ref().is_none_or(|b| roi > b.roi) {
                best = Some(ArbitrageOpportunity {
                    strategy_description: format!(
                        "BUY {} on {}, BUY {} on {}",
                        leg_a.outcome.as_str(),
                        leg_a.platform,
                        leg_b.outcome.as_str(),
                        leg_b.platform
                    ),
                    description: self.description.clone(),
                    leg_a,
                    leg_b,
                    cost,
                    profit,
                    roi,
                    similarity: 1.0,
                });
            }
        }
        best
    }
}

/// One side of an arbitrage: which outcome to buy on which venue, at what price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageLeg {
    pub platform: String,
    pub market_id: String,
    pub outcome: Outcome,
    pub price: Decimal,
}

impl ArbitrageLeg {
    fn new(market: &PredictionMarket, outcome: Outcome) -> Self {
        Self {
            platform: market.platform.clone(),
            market_id: market.market_id.clone(),
            outcome,
            price: market.price(outcome),
        }
    }

    pub fn pair(&self) -> String {
        format!("{}:{}:{}", self.platform, self.market_id, self.outcome.as_str())
    }
}

/// Complementary outcomes bought across two venues for a guaranteed 1.0 payout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub leg_a: ArbitrageLeg,
    pub leg_b: ArbitrageLeg,
    pub description: String,
    /// Combined price of both legs per contract pair
    pub cost: Decimal,
    /// 1.0 - cost, before fees
    pub profit: Decimal,
    pub roi: Decimal,
    pub strategy_description: String,
    /// Description similarity of the matched markets
    pub similarity: f64,
}

impl ArbitrageOpportunity {
    pub fn to_event(&self) -> ArbitrageDetected {
        ArbitrageDetected {
            platform_a: self.leg_a.platform.clone(),
            platform_b: self.leg_b.platform.clone(),
            roi: self.roi,
            cost: self.cost,
            profit: self.profit,
            strategy_description: self.strategy_description.clone(),
        }
    }
}
