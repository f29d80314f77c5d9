//! Analysis of a user-chosen market and selection.

use serde::{Deserialize, Serialize};

use super::features;
use super::markets::{Market, Selection};
use super::predictor::{format_percentage, MarketPrediction, Predictor};
use super::selector::{smart, ScoredFixture};
use crate::db::models::Fixture;
use crate::error::{PredictionError, PredictionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Moderate,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    pub fn from_probability(p: f64) -> Self {
        if p >= 0.80 {
            ConfidenceLevel::VeryHigh
        } else if p >= 0.70 {
            ConfidenceLevel::High
        } else if p >= 0.60 {
            ConfidenceLevel::Moderate
        } else if p >= 0.50 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            ConfidenceLevel::VeryHigh => "very_high",
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Moderate => "moderate",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::VeryLow => "very_low",
        }
    }

    pub fn verdict(self) -> &'static str {
        match self {
            ConfidenceLevel::VeryHigh => "Excellent",
            ConfidenceLevel::High => "Good",
            ConfidenceLevel::Moderate => "Moderate",
            ConfidenceLevel::Low => "Weak",
            ConfidenceLevel::VeryLow => "Not Recommended",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomAnalysisRequest {
    pub fixture: Fixture,
    pub market_id: String,
    pub selection_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSelection {
    pub market_id: Market,
    pub market_name: &'static str,
    pub selection_id: Selection,
    pub selection_name: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub probability: f64,
    pub percentage: String,
    pub confidence_level: ConfidenceLevel,
    pub verdict: &'static str,
    pub explanation: String,
    pub comparison: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomAnalysis {
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    pub user_selection: UserSelection,
    pub analysis: Analysis,
    /// The Smart pick, when it differs from the user's selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_bet_alternative: Option<MarketPrediction>,
}

/// Resolve and validate a (market, selection) pair given as strings.
pub fn parse_choice(market_id: &str, selection_id: &str) -> PredictionResult<Selection> {
    Market::parse(market_id)?.parse_selection(selection_id)
}

pub fn analyze(predictor: &Predictor, req: &CustomAnalysisRequest) -> PredictionResult<CustomAnalysis> {
    let selection = parse_choice(&req.market_id, &req.selection_id)?;
    let market = selection.market();
    let fixture = &req.fixture;

    let fv = features::build(fixture);
    let positive = predictor.predict_market(&fv, market)?;
    let probability = selection.probability_from(positive.probability);

    // The comparison needs every market; a missing model elsewhere only
    // removes the Smart reference.
    let smart_pick = match predictor.predict(fixture) {
        Ok(fp) => smart(&ScoredFixture {
            fixture: fixture.clone(),
            predictions: fp.predictions,
            odds: None,
        })
        .map(|r| r.pick),
        Err(PredictionError::Unavailable(_)) => None,
        Err(e) => return Err(e),
    };

    let comparison = comparison_note(probability, selection, smart_pick.as_ref());
    let alternative = smart_pick.filter(|s| s.selection_id != selection);
    let level = ConfidenceLevel::from_probability(probability);

    Ok(CustomAnalysis {
        match_id: fixture.match_id.clone(),
        home_team: fixture.home_team.clone(),
        away_team: fixture.away_team.clone(),
        user_selection: UserSelection {
            market_id: market,
            market_name: market.name(),
            selection_id: selection,
            selection_name: selection.name(),
        },
        analysis: Analysis {
            probability,
            percentage: format_percentage(probability),
            confidence_level: level,
            verdict: level.verdict(),
            explanation: explanation(fixture, selection, probability),
            comparison,
        },
        smart_bet_alternative: alternative,
    })
}

fn comparison_note(user_p: f64, selection: Selection, smart_pick: Option<&MarketPrediction>) -> String {
    match smart_pick {
        None => "We don't have a Smart Bet recommendation for this fixture to compare against."
            .to_string(),
        Some(s) if s.selection_id == selection => "Your selection matches our Smart Bet recommendation! \
             This is the highest probability option we identified for this fixture."
            .to_string(),
        Some(s) => format!(
            "Note: This confidence ({}) is lower than our Smart Bet recommendation for this \
             fixture ({} for {}). Smart Bets analyze all 4 markets to find the highest \
             probability option.",
            format_percentage(user_p),
            s.percentage,
            s.selection_name
        ),
    }
}

fn explanation(fixture: &Fixture, selection: Selection, p: f64) -> String {
    let home = if fixture.home_team.is_empty() { "Home Team" } else { &fixture.home_team };
    let away = if fixture.away_team.is_empty() { "Away Team" } else { &fixture.away_team };
    let pct = format_percentage(p);
    let pair = |h: Option<f64>, a: Option<f64>| {
        let (h, a) = (h.unwrap_or(0.0), a.unwrap_or(0.0));
        (h, a, h + a)
    };
    let f = fixture;

    match selection {
        Selection::GoalsOver25 | Selection::CardsOver35 | Selection::CornersOver95 => {
            let (unit, (h, a, total)) = match selection.market() {
                Market::TotalGoals => ("goals", pair(f.home_goals_avg, f.away_goals_avg)),
                Market::TotalCards => ("cards", pair(f.home_cards_avg, f.away_cards_avg)),
                _ => ("corners", pair(f.home_corners_avg, f.away_corners_avg)),
            };
            format!(
                "Both teams average {total:.1} {unit} combined per match. {home} averages \
                 {h:.1} {unit} at home, {away} averages {a:.1} away. AI probability for {}: {pct}.",
                selection.name()
            )
        }
        Selection::GoalsUnder25 => format!(
            "Combined goals average is {:.1} per match. AI probability for {}: {pct}.",
            pair(f.home_goals_avg, f.away_goals_avg).2,
            selection.name()
        ),
        Selection::CardsUnder35 => format!(
            "Combined cards average is {:.1} per match. AI probability for {}: {pct}.",
            pair(f.home_cards_avg, f.away_cards_avg).2,
            selection.name()
        ),
        Selection::CornersUnder95 => format!(
            "Combined corners average is {:.1} per match. AI probability for {}: {pct}.",
            pair(f.home_corners_avg, f.away_corners_avg).2,
            selection.name()
        ),
        Selection::BttsYes => format!(
            "{home} has BTTS in {} of home matches, {away} has BTTS in {} of away matches. \
             AI probability for Both Teams To Score: {pct}.",
            format_percentage(f.home_btts_rate.unwrap_or(0.0)),
            format_percentage(f.away_btts_rate.unwrap_or(0.0))
        ),
        Selection::BttsNo => format!(
            "Historical BTTS rates suggest one or both teams may not score. \
             AI probability for BTTS No: {pct}."
        ),
    }
}
