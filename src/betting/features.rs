//! Fixture → numeric feature vector.
//!
//! Training and inference both go through [`build`], so the layout below is
//! the contract between stored model artifacts and live predictions. Changing
//! the order or the names invalidates every artifact on disk (the loader
//! compares `FEATURE_NAMES` against the artifact's list).

use serde::{Deserialize, Serialize};

use crate::db::models::Fixture;

pub const FEATURE_COUNT: usize = 20;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "home_goals_avg_5",
    "away_goals_avg_5",
    "home_goals_conceded_avg_5",
    "away_goals_conceded_avg_5",
    "home_corners_avg_5",
    "away_corners_avg_5",
    "home_cards_avg_5",
    "away_cards_avg_5",
    "home_btts_rate_5",
    "away_btts_rate_5",
    "home_goals_avg_10",
    "away_goals_avg_10",
    "home_goals_conceded_avg_10",
    "away_goals_conceded_avg_10",
    "combined_goals_avg",
    "combined_corners_avg",
    "combined_cards_avg",
    "combined_btts_rate",
    "home_attack_vs_away_defense",
    "away_attack_vs_home_defense",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }
}

/// Prefer the 5-match rolling value, then the aggregate, then zero.
fn rolling(last5: Option<f64>, aggregate: Option<f64>) -> f64 {
    last5.or(aggregate).unwrap_or(0.0)
}

pub fn build(fixture: &Fixture) -> FeatureVector {
    let home_goals = rolling(fixture.home_goals_avg_5, fixture.home_goals_avg);
    let away_goals = rolling(fixture.away_goals_avg_5, fixture.away_goals_avg);
    let home_conceded = rolling(
        fixture.home_goals_conceded_avg_5,
        fixture.home_goals_conceded_avg,
    );
    let away_conceded = rolling(
        fixture.away_goals_conceded_avg_5,
        fixture.away_goals_conceded_avg,
    );
    let home_corners = rolling(fixture.home_corners_avg_5, fixture.home_corners_avg);
    let away_corners = rolling(fixture.away_corners_avg_5, fixture.away_corners_avg);
    let home_cards = rolling(fixture.home_cards_avg_5, fixture.home_cards_avg);
    let away_cards = rolling(fixture.away_cards_avg_5, fixture.away_cards_avg);
    let home_btts = rolling(fixture.home_btts_rate_5, fixture.home_btts_rate);
    let away_btts = rolling(fixture.away_btts_rate_5, fixture.away_btts_rate);

    FeatureVector([
        home_goals,
        away_goals,
        home_conceded,
        away_conceded,
        home_corners,
        away_corners,
        home_cards,
        away_cards,
        home_btts,
        away_btts,
        fixture.home_goals_avg_10.unwrap_or(home_goals),
        fixture.away_goals_avg_10.unwrap_or(away_goals),
        fixture.home_goals_conceded_avg_10.unwrap_or(home_conceded),
        fixture.away_goals_conceded_avg_10.unwrap_or(away_conceded),
        home_goals + away_goals,
        home_corners + away_corners,
        home_cards + away_cards,
        (home_btts + away_btts) / 2.0,
        home_goals - away_conceded,
        away_goals - home_conceded,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fixture() -> Fixture {
        Fixture {
            match_id: "TEST_001".into(),
            home_team: "Manchester United".into(),
            away_team: "Liverpool".into(),
            home_goals_avg: Some(1.8),
            away_goals_avg: Some(2.1),
            home_goals_conceded_avg: Some(1.0),
            away_goals_conceded_avg: Some(0.8),
            home_corners_avg: Some(6.2),
            away_corners_avg: Some(5.8),
            home_cards_avg: Some(2.1),
            away_cards_avg: Some(1.9),
            home_btts_rate: Some(0.65),
            away_btts_rate: Some(0.70),
            ..Default::default()
        }
    }

    #[test]
    fn same_fixture_gives_identical_vector() {
        let fx = fixture();
        assert_eq!(build(&fx), build(&fx));
    }

    #[test]
    fn combined_and_differential_features() {
        let v = build(&fixture());
        assert_relative_eq!(v.get("combined_goals_avg").unwrap(), 3.9, epsilon = 1e-9);
        assert_relative_eq!(v.get("combined_corners_avg").unwrap(), 12.0, epsilon = 1e-9);
        assert_relative_eq!(v.get("combined_cards_avg").unwrap(), 4.0, epsilon = 1e-9);
        assert_relative_eq!(v.get("combined_btts_rate").unwrap(), 0.675, epsilon = 1e-9);
        assert_relative_eq!(
            v.get("home_attack_vs_away_defense").unwrap(),
            1.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            v.get("away_attack_vs_home_defense").unwrap(),
            1.1,
            epsilon = 1e-9
        );
    }

    #[test]
    fn five_match_values_take_precedence_and_ten_match_falls_back() {
        let mut fx = fixture();
        fx.home_goals_avg_5 = Some(2.4);
        fx.away_goals_avg_10 = Some(1.5);
        let v = build(&fx);
        assert_relative_eq!(v.get("home_goals_avg_5").unwrap(), 2.4);
        assert_relative_eq!(v.get("home_goals_avg_10").unwrap(), 2.4);
        assert_relative_eq!(v.get("away_goals_avg_10").unwrap(), 1.5);
        assert_relative_eq!(v.get("away_goals_avg_5").unwrap(), 2.1);
    }

    #[test]
    fn missing_statistics_default_to_zero() {
        let v = build(&Fixture::default());
        assert!(v.values().iter().all(|x| *x == 0.0));
    }
}
