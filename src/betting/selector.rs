//! Smart, Golden and Value recommendation rules.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::features;
use super::kelly;
use super::markets::{Market, ALL_SELECTIONS};
use super::predictor::{format_percentage, MarketPrediction};
use crate::db::models::{Fixture, MarketOdds};
use crate::error::{PredictionError, PredictionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Smart,
    Golden,
    Value,
    Custom,
}

impl Strategy {
    pub fn id(self) -> &'static str {
        match self {
            Strategy::Smart => "smart",
            Strategy::Golden => "golden",
            Strategy::Value => "value",
            Strategy::Custom => "custom",
        }
    }

    pub fn parse(id: &str) -> PredictionResult<Strategy> {
        match id {
            "custom" => Ok(Strategy::Custom),
            other => Strategy::parse_batch(other).map_err(|_| {
                PredictionError::invalid("strategy", other, ["smart", "golden", "value", "custom"])
            }),
        }
    }

    /// Strategies that rank a batch of fixtures.
    pub fn parse_batch(id: &str) -> PredictionResult<Strategy> {
        match id {
            "smart" => Ok(Strategy::Smart),
            "golden" => Ok(Strategy::Golden),
            "value" => Ok(Strategy::Value),
            other => Err(PredictionError::invalid(
                "strategy",
                other,
                ["smart", "golden", "value"],
            )),
        }
    }
}

/// Thresholds and caps for the batch strategies.
#[derive(Debug, Clone, Copy)]
pub struct SelectionRules {
    pub golden_threshold: f64,
    pub golden_daily_cap: usize,
    pub value_min_pct: f64,
    pub value_min_ev: f64,
    pub value_cap: usize,
    pub kelly_fraction: f64,
}

impl Default for SelectionRules {
    fn default() -> Self {
        SelectionRules {
            golden_threshold: 0.85,
            golden_daily_cap: 3,
            value_min_pct: 10.0,
            value_min_ev: 0.05,
            value_cap: 3,
            kelly_fraction: 0.25,
        }
    }
}

/// A fixture together with its market predictions and any known odds.
#[derive(Debug, Clone)]
pub struct ScoredFixture {
    pub fixture: Fixture,
    pub predictions: Vec<MarketPrediction>,
    pub odds: Option<MarketOdds>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueAssessment {
    pub prediction: MarketPrediction,
    pub bookmaker_odds: f64,
    pub implied_probability: f64,
    /// (p / implied - 1) * 100
    pub value_pct: f64,
    /// Expected profit per unit staked
    pub expected_value: f64,
}

impl ValueAssessment {
    /// `None` when the odds cannot pay out.
    pub fn assess(prediction: MarketPrediction, odds: f64) -> Option<Self> {
        if !odds.is_finite() || odds <= 1.0 {
            return None;
        }
        let implied = 1.0 / odds;
        let p = prediction.probability;
        Some(ValueAssessment {
            value_pct: (p / implied - 1.0) * 100.0,
            expected_value: kelly::edge(p, odds),
            implied_probability: implied,
            bookmaker_odds: odds,
            prediction,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub fixture_id: String,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: Option<DateTime<Utc>>,
    pub strategy: Strategy,
    pub pick: MarketPrediction,
    /// 1-based
    pub rank: usize,
    pub score: f64,
    pub explanation: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<MarketPrediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueAssessment>,
    /// Fractional Kelly share of bankroll
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stake_fraction: Option<f64>,
}

impl Recommendation {
    fn new(fixture: &Fixture, strategy: Strategy, pick: MarketPrediction, explanation: String) -> Self {
        Recommendation {
            fixture_id: fixture.match_id.clone(),
            home_team: fixture.home_team.clone(),
            away_team: fixture.away_team.clone(),
            kickoff: fixture.match_datetime,
            strategy,
            score: pick.probability,
            pick,
            rank: 1,
            explanation,
            alternatives: Vec::new(),
            value: None,
            stake_fraction: None,
        }
    }
}

/// Market-specific reasoning behind a Smart pick.
pub fn smart_explanation(fixture: &Fixture, market: Market) -> String {
    let fv = features::build(fixture);
    let lead = "Highest probability outcome across all 4 analyzed markets for this fixture.";
    match market {
        Market::TotalGoals => format!(
            "{lead} Combined goals average of {:.1} per match.",
            fv.get("combined_goals_avg").unwrap_or_default()
        ),
        Market::TotalCards => format!(
            "{lead} Combined cards average of {:.1} per match indicates high disciplinary activity expected.",
            fv.get("combined_cards_avg").unwrap_or_default()
        ),
        Market::TotalCorners => format!(
            "{lead} Combined corners average of {:.1} per match.",
            fv.get("combined_corners_avg").unwrap_or_default()
        ),
        Market::Btts => format!(
            "{lead} Combined BTTS rate of {}.",
            format_percentage(fv.get("combined_btts_rate").unwrap_or_default())
        ),
    }
}

/// Highest-probability market; exact ties keep the earlier market. The other
/// markets are returned as alternatives, best first.
pub fn smart(scored: &ScoredFixture) -> Option<Recommendation> {
    let mut best: Option<&MarketPrediction> = None;
    for p in &scored.predictions {
        if best.map_or(true, |b| p.probability > b.probability) {
            best = Some(p);
        }
    }
    let best = best?.clone();

    let mut alternatives: Vec<MarketPrediction> = scored
        .predictions
        .iter()
        .filter(|p| p.market_id != best.market_id)
        .cloned()
        .collect();
    alternatives.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    let explanation = smart_explanation(&scored.fixture, best.market_id);
    let mut rec = Recommendation::new(&scored.fixture, Strategy::Smart, best, explanation);
    rec.alternatives = alternatives;
    Some(rec)
}

pub fn smart_batch(batch: &[ScoredFixture]) -> Vec<Recommendation> {
    batch.iter().filter_map(smart).collect()
}

/// Smart picks at or above the golden threshold. Each kickoff day keeps at
/// most `golden_daily_cap` picks and the whole list is then cut to the same
/// cap. Never padded when fewer qualify.
pub fn golden(batch: &[ScoredFixture], rules: &SelectionRules) -> Vec<Recommendation> {
    let mut by_day: BTreeMap<Option<NaiveDate>, Vec<Recommendation>> = BTreeMap::new();
    for rec in smart_batch(batch) {
        if rec.pick.probability >= rules.golden_threshold {
            by_day
                .entry(rec.kickoff.map(|k| k.date_naive()))
                .or_default()
                .push(rec);
        }
    }

    let mut picks: Vec<Recommendation> = Vec::new();
    for (_, mut day) in by_day {
        day.sort_by(|a, b| b.score.total_cmp(&a.score));
        day.truncate(rules.golden_daily_cap);
        picks.extend(day);
    }
    picks.sort_by(|a, b| b.score.total_cmp(&a.score));
    picks.truncate(rules.golden_daily_cap);

    for (i, rec) in picks.iter_mut().enumerate() {
        rec.rank = i + 1;
        rec.strategy = Strategy::Golden;
        rec.alternatives.clear();
        rec.explanation = format!(
            "Golden Bet: {} confidence, above the {} threshold. {}",
            rec.pick.percentage,
            format_percentage(rules.golden_threshold),
            rec.explanation
        );
    }
    picks
}

/// Every selection of a fixture whose odds are known, assessed for value.
pub fn assess_fixture(scored: &ScoredFixture) -> Vec<ValueAssessment> {
    let Some(odds) = &scored.odds else {
        return Vec::new();
    };
    ALL_SELECTIONS
        .into_iter()
        .filter_map(|selection| {
            let positive = scored
                .predictions
                .iter()
                .find(|p| p.market_id == selection.market())?;
            let prediction =
                MarketPrediction::new(selection, selection.probability_from(positive.probability));
            ValueAssessment::assess(prediction, odds.for_selection(selection)?)
        })
        .collect()
}

/// Best value selections across the batch, by value percentage then
/// probability.
pub fn value(batch: &[ScoredFixture], rules: &SelectionRules) -> Vec<Recommendation> {
    let mut candidates: Vec<(&Fixture, ValueAssessment)> = batch
        .iter()
        .flat_map(|sf| {
            assess_fixture(sf)
                .into_iter()
                .map(move |va| (&sf.fixture, va))
        })
        .filter(|(_, va)| {
            va.value_pct >= rules.value_min_pct && va.expected_value >= rules.value_min_ev
        })
        .collect();

    candidates.sort_by(|(_, a), (_, b)| {
        b.value_pct
            .total_cmp(&a.value_pct)
            .then(b.prediction.probability.total_cmp(&a.prediction.probability))
    });
    candidates.truncate(rules.value_cap);

    candidates
        .into_iter()
        .enumerate()
        .map(|(i, (fixture, va))| {
            let explanation = format!(
                "Model probability {} against bookmaker implied {} at odds {:.2}: {:.1}% value, expected return {:+.3} per unit staked.",
                va.prediction.percentage,
                format_percentage(va.implied_probability),
                va.bookmaker_odds,
                va.value_pct,
                va.expected_value
            );
            let stake = kelly::stake_fraction(
                va.prediction.probability,
                va.bookmaker_odds,
                rules.kelly_fraction,
            );
            let mut rec =
                Recommendation::new(fixture, Strategy::Value, va.prediction.clone(), explanation);
            rec.rank = i + 1;
            rec.score = va.value_pct;
            rec.stake_fraction = Some(stake);
            rec.value = Some(va);
            rec
        })
        .collect()
}

/// Run a batch strategy. Custom analysis works on a single user choice and
/// has no batch form.
pub fn recommend(
    strategy: Strategy,
    batch: &[ScoredFixture],
    rules: &SelectionRules,
) -> PredictionResult<Vec<Recommendation>> {
    match strategy {
        Strategy::Smart => Ok(smart_batch(batch)),
        Strategy::Golden => Ok(golden(batch, rules)),
        Strategy::Value => Ok(value(batch, rules)),
        Strategy::Custom => Err(PredictionError::invalid(
            "strategy",
            strategy.id(),
            ["smart", "golden", "value"],
        )),
    }
}
