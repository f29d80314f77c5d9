use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::betting::markets::{Market, Selection};
use crate::error::{PredictionError, PredictionResult};

/// Pre-match snapshot of a fixture: identities plus rolling team statistics.
///
/// Every statistic is optional; the feature builder substitutes zero for
/// anything missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub match_id: String,
    pub home_team_id: Option<String>,
    pub home_team: String,
    pub away_team_id: Option<String>,
    pub away_team: String,
    pub match_datetime: Option<DateTime<Utc>>,
    pub league: Option<String>,

    // Aggregate averages
    pub home_goals_avg: Option<f64>,
    pub away_goals_avg: Option<f64>,
    pub home_goals_conceded_avg: Option<f64>,
    pub away_goals_conceded_avg: Option<f64>,
    pub home_corners_avg: Option<f64>,
    pub away_corners_avg: Option<f64>,
    pub home_cards_avg: Option<f64>,
    pub away_cards_avg: Option<f64>,
    pub home_btts_rate: Option<f64>,
    pub away_btts_rate: Option<f64>,

    // Last-5 rolling averages
    pub home_goals_avg_5: Option<f64>,
    pub away_goals_avg_5: Option<f64>,
    pub home_goals_conceded_avg_5: Option<f64>,
    pub away_goals_conceded_avg_5: Option<f64>,
    pub home_corners_avg_5: Option<f64>,
    pub away_corners_avg_5: Option<f64>,
    pub home_cards_avg_5: Option<f64>,
    pub away_cards_avg_5: Option<f64>,
    pub home_btts_rate_5: Option<f64>,
    pub away_btts_rate_5: Option<f64>,

    // Last-10 rolling averages
    pub home_goals_avg_10: Option<f64>,
    pub away_goals_avg_10: Option<f64>,
    pub home_goals_conceded_avg_10: Option<f64>,
    pub away_goals_conceded_avg_10: Option<f64>,

    /// Recent results, most recent last, e.g. "WWDLW"
    pub home_form: Option<String>,
    pub away_form: Option<String>,
}

impl Fixture {
    /// Every statistic that is present, by name. Used for input validation.
    pub fn present_stats(&self) -> Vec<(&'static str, f64)> {
        let all = [
            ("home_goals_avg", self.home_goals_avg),
            ("away_goals_avg", self.away_goals_avg),
            ("home_goals_conceded_avg", self.home_goals_conceded_avg),
            ("away_goals_conceded_avg", self.away_goals_conceded_avg),
            ("home_corners_avg", self.home_corners_avg),
            ("away_corners_avg", self.away_corners_avg),
            ("home_cards_avg", self.home_cards_avg),
            ("away_cards_avg", self.away_cards_avg),
            ("home_btts_rate", self.home_btts_rate),
            ("away_btts_rate", self.away_btts_rate),
            ("home_goals_avg_5", self.home_goals_avg_5),
            ("away_goals_avg_5", self.away_goals_avg_5),
            ("home_goals_conceded_avg_5", self.home_goals_conceded_avg_5),
            ("away_goals_conceded_avg_5", self.away_goals_conceded_avg_5),
            ("home_corners_avg_5", self.home_corners_avg_5),
            ("away_corners_avg_5", self.away_corners_avg_5),
            ("home_cards_avg_5", self.home_cards_avg_5),
            ("away_cards_avg_5", self.away_cards_avg_5),
            ("home_btts_rate_5", self.home_btts_rate_5),
            ("away_btts_rate_5", self.away_btts_rate_5),
            ("home_goals_avg_10", self.home_goals_avg_10),
            ("away_goals_avg_10", self.away_goals_avg_10),
            ("home_goals_conceded_avg_10", self.home_goals_conceded_avg_10),
            ("away_goals_conceded_avg_10", self.away_goals_conceded_avg_10),
        ];
        all.into_iter()
            .filter_map(|(name, v)| v.map(|v| (name, v)))
            .collect()
    }
}

/// Team statistics as sent by the upstream application at ingestion time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamStats {
    pub home_goals_avg: Option<f64>,
    pub away_goals_avg: Option<f64>,
    pub home_goals_conceded_avg: Option<f64>,
    pub away_goals_conceded_avg: Option<f64>,
    pub home_corners_avg: Option<f64>,
    pub away_corners_avg: Option<f64>,
    pub home_cards_avg: Option<f64>,
    pub away_cards_avg: Option<f64>,
    pub home_btts_rate: Option<f64>,
    pub away_btts_rate: Option<f64>,
    pub home_form: Option<String>,
    pub away_form: Option<String>,
}

/// Decimal bookmaker odds for the selections we model, plus 1X2 prices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketOdds {
    pub over_2_5: Option<f64>,
    pub under_2_5: Option<f64>,
    pub cards_over_3_5: Option<f64>,
    pub cards_under_3_5: Option<f64>,
    pub corners_over_9_5: Option<f64>,
    pub corners_under_9_5: Option<f64>,
    pub btts_yes: Option<f64>,
    pub btts_no: Option<f64>,
    pub home_win: Option<f64>,
    pub draw: Option<f64>,
    pub away_win: Option<f64>,
    pub bookmaker: Option<String>,
}

impl MarketOdds {
    /// Every price that is present, keyed by its field name.
    pub fn prices(&self) -> Vec<(&'static str, f64)> {
        let all = [
            ("over_2_5", self.over_2_5),
            ("under_2_5", self.under_2_5),
            ("cards_over_3_5", self.cards_over_3_5),
            ("cards_under_3_5", self.cards_under_3_5),
            ("corners_over_9_5", self.corners_over_9_5),
            ("corners_under_9_5", self.corners_under_9_5),
            ("btts_yes", self.btts_yes),
            ("btts_no", self.btts_no),
            ("home_win", self.home_win),
            ("draw", self.draw),
            ("away_win", self.away_win),
        ];
        all.into_iter()
            .filter_map(|(name, v)| v.map(|v| (name, v)))
            .collect()
    }

    /// Decimal odds must be finite and above 1.0 to pay anything out.
    pub fn validate(&self) -> PredictionResult<()> {
        for (name, price) in self.prices() {
            if !price.is_finite() || price <= 1.0 {
                return Err(PredictionError::invalid(
                    name,
                    price.to_string(),
                    ["decimal odds > 1.0"],
                ));
            }
        }
        Ok(())
    }

    pub fn for_selection(&self, selection: Selection) -> Option<f64> {
        match selection {
            Selection::GoalsOver25 => self.over_2_5,
            Selection::GoalsUnder25 => self.under_2_5,
            Selection::CardsOver35 => self.cards_over_3_5,
            Selection::CardsUnder35 => self.cards_under_3_5,
            Selection::CornersOver95 => self.corners_over_9_5,
            Selection::CornersUnder95 => self.corners_under_9_5,
            Selection::BttsYes => self.btts_yes,
            Selection::BttsNo => self.btts_no,
        }
    }
}

/// Final statistics of a completed match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub home_goals: i32,
    pub away_goals: i32,
    #[serde(default)]
    pub home_corners: Option<i32>,
    #[serde(default)]
    pub away_corners: Option<i32>,
    #[serde(default)]
    pub home_cards: Option<i32>,
    #[serde(default)]
    pub away_cards: Option<i32>,
}

impl MatchResult {
    pub fn total_goals(&self) -> i32 {
        self.home_goals + self.away_goals
    }

    pub fn total_corners(&self) -> Option<i32> {
        Some(self.home_corners? + self.away_corners?)
    }

    pub fn total_cards(&self) -> Option<i32> {
        Some(self.home_cards? + self.away_cards?)
    }

    pub fn btts(&self) -> bool {
        self.home_goals > 0 && self.away_goals > 0
    }

    /// Whether the market's positive-class selection won. `None` when the
    /// result lacks the statistic the market settles on.
    pub fn positive_outcome(&self, market: Market) -> Option<bool> {
        match market {
            Market::TotalGoals => Some(self.total_goals() > 2),
            Market::TotalCards => self.total_cards().map(|c| c > 3),
            Market::TotalCorners => self.total_corners().map(|c| c > 9),
            Market::Btts => Some(self.btts()),
        }
    }
}

fn default_status() -> String {
    "scheduled".to_string()
}

/// One match as delivered in an ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub match_datetime: DateTime<Utc>,
    #[serde(default)]
    pub league: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    /// "scheduled" | "completed"
    #[serde(default = "default_status")]
    pub status: String,
    pub home_team_id: String,
    pub home_team: String,
    pub away_team_id: String,
    pub away_team: String,
    #[serde(default)]
    pub team_stats_at_match_time: TeamStats,
    #[serde(default)]
    pub odds: Option<MarketOdds>,
    #[serde(default)]
    pub result: Option<MatchResult>,
}

impl MatchRecord {
    pub fn fixture(&self) -> Fixture {
        let s = &self.team_stats_at_match_time;
        Fixture {
            match_id: self.match_id.clone(),
            home_team_id: Some(self.home_team_id.clone()),
            home_team: self.home_team.clone(),
            away_team_id: Some(self.away_team_id.clone()),
            away_team: self.away_team.clone(),
            match_datetime: Some(self.match_datetime),
            league: self.league.clone(),
            home_goals_avg: s.home_goals_avg,
            away_goals_avg: s.away_goals_avg,
            home_goals_conceded_avg: s.home_goals_conceded_avg,
            away_goals_conceded_avg: s.away_goals_conceded_avg,
            home_corners_avg: s.home_corners_avg,
            away_corners_avg: s.away_corners_avg,
            home_cards_avg: s.home_cards_avg,
            away_cards_avg: s.away_cards_avg,
            home_btts_rate: s.home_btts_rate,
            away_btts_rate: s.away_btts_rate,
            home_form: s.home_form.clone(),
            away_form: s.away_form.clone(),
            ..Default::default()
        }
    }
}

/// A completed match with its pre-match snapshot, used for training and
/// backtesting.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedMatch {
    pub fixture: Fixture,
    pub kickoff: DateTime<Utc>,
    pub result: MatchResult,
    /// Latest odds at ingestion time, if any were recorded
    pub odds: Option<MarketOdds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSummary {
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    pub match_datetime: DateTime<Utc>,
    pub league: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub team_id: String,
    pub team_name: String,
    pub league: Option<String>,
}

/// A recommendation as persisted in the `recommendations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecommendation {
    pub id: Option<i64>,
    pub match_id: String,
    /// "smart" | "golden" | "value" | "custom"
    pub strategy: String,
    pub market_id: String,
    pub selection_id: String,
    pub probability: f64,
    pub score: f64,
    pub rank: i64,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_outcomes_per_market() {
        let r = MatchResult {
            home_goals: 2,
            away_goals: 1,
            home_corners: Some(4),
            away_corners: Some(5),
            home_cards: None,
            away_cards: Some(2),
        };
        assert_eq!(r.positive_outcome(Market::TotalGoals), Some(true));
        assert_eq!(r.positive_outcome(Market::Btts), Some(true));
        assert_eq!(r.positive_outcome(Market::TotalCorners), Some(false));
        assert_eq!(r.positive_outcome(Market::TotalCards), None);
    }

    #[test]
    fn ingestion_record_parses_with_defaults() {
        let json = r#"{
            "match_id": "M1",
            "match_datetime": "2024-03-02T15:00:00Z",
            "home_team_id": "T1", "home_team": "Arsenal",
            "away_team_id": "T2", "away_team": "Chelsea",
            "team_stats_at_match_time": {"home_goals_avg": 1.8, "home_form": "WWDLW"}
        }"#;
        let rec: MatchRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.status, "scheduled");
        assert!(rec.odds.is_none());
        let fx = rec.fixture();
        assert_eq!(fx.home_goals_avg, Some(1.8));
        assert_eq!(fx.away_goals_avg, None);
        assert_eq!(fx.home_form.as_deref(), Some("WWDLW"));
    }

    #[test]
    fn odds_validation_names_the_bad_price() {
        let ok = MarketOdds {
            over_2_5: Some(1.9),
            draw: Some(3.4),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        for bad in [-3.0, 1.0, f64::NAN] {
            let odds = MarketOdds {
                over_2_5: Some(1.9),
                corners_under_9_5: Some(bad),
                ..Default::default()
            };
            match odds.validate() {
                Err(PredictionError::InvalidArgument { field, valid, .. }) => {
                    assert_eq!(field, "corners_under_9_5");
                    assert_eq!(valid, vec!["decimal odds > 1.0"]);
                }
                other => panic!("expected invalid argument for {bad}, got {other:?}"),
            }
        }
    }

    #[test]
    fn odds_lookup_by_selection() {
        let odds = MarketOdds {
            btts_no: Some(1.95),
            ..Default::default()
        };
        assert_eq!(odds.for_selection(Selection::BttsNo), Some(1.95));
        assert_eq!(odds.for_selection(Selection::BttsYes), None);
    }
}
