use crate::application::arbitrage::similarity::description_similarity;
use crate::domain::market::prediction_market::{ArbitrageOpportunity, PredictionMarket};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Opportunities below this ROI are dropped
    pub min_roi: Decimal,
    /// Minimum description similarity for two markets to be the same event
    pub similarity_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_roi: dec!(0.01),
            similarity_threshold: 0.8,
        }
    }
}

/// Cross-venue complementary-outcome arbitrage.
///
/// Matching is purely textual and conservative: a missed match is preferred
/// to pairing two unrelated events. Each matched pair is priced on its own;
/// opportunities sharing capital are not netted against each other.
pub struct ArbitrageDetector {
    config: DetectorConfig,
}

impl ArbitrageDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Similarity score if the two markets describe the same event.
    pub fn markets_match(&self, a: &PredictionMarket, b: &PredictionMarket) -> Option<f64> {
        let score = description_similarity(&a.description, &b.description);
        (score >= self.config.similarity_threshold).then_some(score)
    }

    /// Opportunities between `venue_a` and `venue_b`, best ROI first.
    pub fn find_opportunities(
        &self,
        venue_a: &[PredictionMarket],
        venue_b: &[PredictionMarket],
    ) -> Vec<ArbitrageOpportunity> {
        let mut opportunities = Vec::new();

        for a in venue_a.iter().filter(|m| m.has_valid_prices()) {
            for b in venue_b.iter().filter(|m| m.has_valid_prices()) {
                let Some(similarity) = self.markets_match(a, b) else {
                    continue;
                };
                let Some(mut opportunity) = a.arbitrage_against(b) else {
                    debug!(
                        "Matched {} / {} ({:.2}) but no direction under 1.0",
                        a.market_id, b.market_id, similarity
                    );
                    continue;
                };
                if opportunity.roi < self.config.min_roi {
                    continue;
                }
                opportunity.similarity = similarity;
                info!(
                    "Arbitrage: {:.2}% ROI on '{}' ({})",
                    opportunity.roi * dec!(100),
                    opportunity.description,
                    opportunity.strategy_description
                );
                opportunities.push(opportunity);
            }
        }

        opportunities.sort_by(|x, y| y.roi.cmp(&x.roi));
        opportunities
    }
}

impl Default for ArbitrageDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kalshi(yes: Decimal, no: Decimal) -> PredictionMarket {
        PredictionMarket::new("FED-MAR", "Will the Fed cut rates in March?", yes, no, "kalshi")
    }

    fn polymarket(yes: Decimal, no: Decimal) -> PredictionMarket {
        PredictionMarket::new("0xfed", "Will the Fed cut rates in March?", yes, no, "polymarket")
    }

    #[test]
    fn test_reference_opportunity() {
        let detector = ArbitrageDetector::default();
        let found = detector.find_opportunities(
            &[kalshi(dec!(0.42), dec!(0.58))],
            &[polymarket(dec!(0.45), dec!(0.53))],
        );

        assert_eq!(found.len(), 1);
        let opp = &found[0];
        assert_eq!(opp.cost, dec!(0.95));
        assert_eq!(opp.profit, dec!(0.05));
        assert!((opp.roi - dec!(0.0526)).abs() < dec!(0.0001));
        assert_eq!(opp.similarity, 1.0);
    }

    #[test]
    fn test_priced_out_pairs_yield_nothing() {
        let detector = ArbitrageDetector::default();
        let found = detector.find_opportunities(
            &[kalshi(dec!(0.50), dec!(0.52))],
            &[polymarket(dec!(0.49), dec!(0.51))],
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_dissimilar_markets_never_matched() {
        let detector = ArbitrageDetector::default();
        let other = PredictionMarket::new(
            "SB",
            "Who wins the Super Bowl?",
            dec!(0.10),
            dec!(0.10),
            "polymarket",
        );
        assert!(
            detector
                .find_opportunities(&[kalshi(dec!(0.10), dec!(0.10))], &[other])
                .is_empty()
        );
    }

    #[test]
    fn test_min_roi_filters_and_sorts() {
        let detector = ArbitrageDetector::new(DetectorConfig {
            min_roi: dec!(0.03),
            ..DetectorConfig::default()
        });
        let thin = PredictionMarket::new("T", "Will BTC close above 100k?", dec!(0.49), dec!(0.50), "kalshi");
        let thin_b =
            PredictionMarket::new("T2", "Will BTC close above 100k?", dec!(0.50), dec!(0.50), "polymarket");
        let wide = kalshi(dec!(0.40), dec!(0.60));
        let wide_b = polymarket(dec!(0.30), dec!(0.50));

        let found = detector.find_opportunities(&[thin, wide], &[thin_b, wide_b]);

        // thin: 0.99 cost, roi ~1% < 3%
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].leg_a.market_id, "FED-MAR");
        assert_eq!(found[0].cost, dec!(0.90));
    }
}
