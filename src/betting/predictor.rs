use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::features::{self, FeatureVector};
use super::markets::{Market, Selection, ALL_MARKETS};
use crate::db::models::Fixture;
use crate::error::{PredictionError, PredictionResult};
use crate::model::oracle::OracleSet;

/// Probability of one selection, as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketPrediction {
    pub market_id: Market,
    pub market_name: &'static str,
    pub selection_id: Selection,
    pub selection_name: &'static str,
    pub probability: f64,
    /// e.g. "72.0%"
    pub percentage: String,
}

impl MarketPrediction {
    pub fn new(selection: Selection, probability: f64) -> Self {
        let market = selection.market();
        MarketPrediction {
            market_id: market,
            market_name: market.name(),
            selection_id: selection,
            selection_name: selection.name(),
            probability,
            percentage: format_percentage(probability),
        }
    }
}

pub fn format_percentage(probability: f64) -> String {
    format!("{:.1}%", probability * 100.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct FixturePredictions {
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    pub match_datetime: Option<DateTime<Utc>>,
    /// One entry per market, in market order
    pub predictions: Vec<MarketPrediction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// "healthy" when every market has a model, "degraded" otherwise
    pub status: &'static str,
    pub models_loaded: BTreeMap<Market, bool>,
    pub model_versions: BTreeMap<Market, String>,
}

/// Runs fixtures through the per-market oracles. Built once at startup and
/// shared read-only.
pub struct Predictor {
    oracles: OracleSet,
}

impl Predictor {
    pub fn new(oracles: OracleSet) -> Self {
        Predictor { oracles }
    }

    /// Positive-class prediction for one market.
    pub fn predict_market(
        &self,
        features: &FeatureVector,
        market: Market,
    ) -> PredictionResult<MarketPrediction> {
        let oracle = self
            .oracles
            .get(market)
            .ok_or_else(|| PredictionError::Unavailable(format!("no model loaded for {market}")))?;
        let p = oracle.predict(features);
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(PredictionError::OracleOutput {
                market: market.id().to_string(),
                value: p,
            });
        }
        Ok(MarketPrediction::new(market.positive(), p))
    }

    /// All four market predictions for a fixture.
    pub fn predict(&self, fixture: &Fixture) -> PredictionResult<FixturePredictions> {
        validate_fixture(fixture)?;
        let features = features::build(fixture);
        let predictions = ALL_MARKETS
            .into_iter()
            .map(|m| self.predict_market(&features, m))
            .collect::<PredictionResult<Vec<_>>>()?;
        Ok(FixturePredictions {
            match_id: fixture.match_id.clone(),
            home_team: fixture.home_team.clone(),
            away_team: fixture.away_team.clone(),
            match_datetime: fixture.match_datetime,
            predictions,
        })
    }

    pub fn all_available(&self) -> bool {
        ALL_MARKETS.into_iter().all(|m| self.oracles.is_available(m))
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: if self.all_available() { "healthy" } else { "degraded" },
            models_loaded: self.oracles.availability(),
            model_versions: ALL_MARKETS
                .into_iter()
                .filter_map(|m| self.oracles.version(m).map(|v| (m, v.to_string())))
                .collect(),
        }
    }
}

/// Statistics are averages and rates; reject anything negative or non-finite.
fn validate_fixture(fixture: &Fixture) -> PredictionResult<()> {
    if fixture.match_id.trim().is_empty() {
        return Err(PredictionError::invalid(
            "match_id",
            fixture.match_id.clone(),
            ["non-empty string"],
        ));
    }
    for (name, value) in fixture.present_stats() {
        if !value.is_finite() || value < 0.0 {
            return Err(PredictionError::invalid(
                name,
                value.to_string(),
                ["finite number >= 0"],
            ));
        }
        if name.contains("btts_rate") && value > 1.0 {
            return Err(PredictionError::invalid(name, value.to_string(), ["0.0 ..= 1.0"]));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::oracle::{LogisticModel, ProbabilityOracle};
    use std::sync::Arc;

    struct Broken;

    impl ProbabilityOracle for Broken {
        fn predict(&self, _features: &FeatureVector) -> f64 {
            1.4
        }
    }

    /// Goals 0.72, cards 0.38, corners 0.55, btts 0.61.
    pub(crate) fn fixed_predictor() -> Predictor {
        let set = [
            (Market::TotalGoals, 0.72),
            (Market::TotalCards, 0.38),
            (Market::TotalCorners, 0.55),
            (Market::Btts, 0.61),
        ]
        .into_iter()
        .fold(OracleSet::new(), |set, (m, p)| {
            set.with_oracle(m, Arc::new(LogisticModel::constant(p)))
        });
        Predictor::new(set)
    }

    pub(crate) fn fixture(id: &str) -> Fixture {
        Fixture {
            match_id: id.into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            home_goals_avg: Some(1.8),
            away_goals_avg: Some(1.4),
            ..Default::default()
        }
    }

    #[test]
    fn predicts_all_four_markets_in_order() {
        let out = fixed_predictor().predict(&fixture("M1")).unwrap();
        assert_eq!(out.predictions.len(), 4);
        let markets: Vec<Market> = out.predictions.iter().map(|p| p.market_id).collect();
        assert_eq!(markets, ALL_MARKETS.to_vec());
        assert!(out.predictions.iter().all(|p| (0.0..=1.0).contains(&p.probability)));
        assert_eq!(out.predictions[0].percentage, "72.0%");
        assert_eq!(out.predictions[0].selection_id, Selection::GoalsOver25);
    }

    #[test]
    fn missing_oracle_is_unavailable() {
        let p = Predictor::new(
            OracleSet::new().with_oracle(Market::TotalGoals, Arc::new(LogisticModel::constant(0.5))),
        );
        assert!(matches!(
            p.predict(&fixture("M1")),
            Err(PredictionError::Unavailable(_))
        ));
        let health = p.health();
        assert_eq!(health.status, "degraded");
        assert_eq!(health.models_loaded[&Market::TotalGoals], true);
        assert_eq!(health.models_loaded[&Market::Btts], false);
    }

    #[test]
    fn out_of_range_oracle_output_is_rejected() {
        let p = Predictor::new(OracleSet::new().with_oracle(Market::Btts, Arc::new(Broken)));
        let err = p
            .predict_market(&features::build(&fixture("M1")), Market::Btts)
            .unwrap_err();
        assert!(matches!(err, PredictionError::OracleOutput { value, .. } if value == 1.4));
    }

    #[test]
    fn negative_statistic_names_the_field() {
        let mut fx = fixture("M1");
        fx.away_corners_avg = Some(-2.0);
        match fixed_predictor().predict(&fx) {
            Err(PredictionError::InvalidArgument { field, .. }) => {
                assert_eq!(field, "away_corners_avg")
            }
            other => panic!("expected invalid argument, got {other:?}"),
        }
    }
}
