//! The four supported markets and their two selections each.
//!
//! Every market has a positive-class selection (the outcome its oracle is
//! trained to predict) and the complementary selection.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PredictionError, PredictionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "total_goals")]
    TotalGoals,
    #[serde(rename = "total_cards")]
    TotalCards,
    #[serde(rename = "total_corners")]
    TotalCorners,
    #[serde(rename = "btts")]
    Btts,
}

/// Fixed iteration order. Smart-pick ties resolve to the earliest entry.
pub const ALL_MARKETS: [Market; 4] = [
    Market::TotalGoals,
    Market::TotalCards,
    Market::TotalCorners,
    Market::Btts,
];

impl Market {
    pub fn id(self) -> &'static str {
        match self {
            Market::TotalGoals => "total_goals",
            Market::TotalCards => "total_cards",
            Market::TotalCorners => "total_corners",
            Market::Btts => "btts",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Market::TotalGoals => "Total Goals",
            Market::TotalCards => "Total Cards",
            Market::TotalCorners => "Total Corners",
            Market::Btts => "Both Teams To Score",
        }
    }

    /// Short key used for artifact file names.
    pub fn key(self) -> &'static str {
        match self {
            Market::TotalGoals => "goals",
            Market::TotalCards => "cards",
            Market::TotalCorners => "corners",
            Market::Btts => "btts",
        }
    }

    pub fn positive(self) -> Selection {
        match self {
            Market::TotalGoals => Selection::GoalsOver25,
            Market::TotalCards => Selection::CardsOver35,
            Market::TotalCorners => Selection::CornersOver95,
            Market::Btts => Selection::BttsYes,
        }
    }

    pub fn negative(self) -> Selection {
        match self {
            Market::TotalGoals => Selection::GoalsUnder25,
            Market::TotalCards => Selection::CardsUnder35,
            Market::TotalCorners => Selection::CornersUnder95,
            Market::Btts => Selection::BttsNo,
        }
    }

    pub fn selections(self) -> [Selection; 2] {
        [self.positive(), self.negative()]
    }

    pub fn parse(id: &str) -> PredictionResult<Market> {
        ALL_MARKETS
            .into_iter()
            .find(|m| m.id() == id)
            .ok_or_else(|| {
                PredictionError::invalid("market_id", id, ALL_MARKETS.iter().map(|m| m.id()))
            })
    }

    /// Parse a selection id that must belong to this market.
    pub fn parse_selection(self, id: &str) -> PredictionResult<Selection> {
        self.selections()
            .into_iter()
            .find(|s| s.id() == id)
            .ok_or_else(|| {
                PredictionError::invalid(
                    "selection_id",
                    id,
                    self.selections().iter().map(|s| s.id()),
                )
            })
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    #[serde(rename = "over_2.5")]
    GoalsOver25,
    #[serde(rename = "under_2.5")]
    GoalsUnder25,
    #[serde(rename = "over_3.5")]
    CardsOver35,
    #[serde(rename = "under_3.5")]
    CardsUnder35,
    #[serde(rename = "over_9.5")]
    CornersOver95,
    #[serde(rename = "under_9.5")]
    CornersUnder95,
    #[serde(rename = "yes")]
    BttsYes,
    #[serde(rename = "no")]
    BttsNo,
}

/// All eight selections, grouped by market in market order.
pub const ALL_SELECTIONS: [Selection; 8] = [
    Selection::GoalsOver25,
    Selection::GoalsUnder25,
    Selection::CardsOver35,
    Selection::CardsUnder35,
    Selection::CornersOver95,
    Selection::CornersUnder95,
    Selection::BttsYes,
    Selection::BttsNo,
];

impl Selection {
    pub fn market(self) -> Market {
        match self {
            Selection::GoalsOver25 | Selection::GoalsUnder25 => Market::TotalGoals,
            Selection::CardsOver35 | Selection::CardsUnder35 => Market::TotalCards,
            Selection::CornersOver95 | Selection::CornersUnder95 => Market::TotalCorners,
            Selection::BttsYes | Selection::BttsNo => Market::Btts,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Selection::GoalsOver25 => "over_2.5",
            Selection::GoalsUnder25 => "under_2.5",
            Selection::CardsOver35 => "over_3.5",
            Selection::CardsUnder35 => "under_3.5",
            Selection::CornersOver95 => "over_9.5",
            Selection::CornersUnder95 => "under_9.5",
            Selection::BttsYes => "yes",
            Selection::BttsNo => "no",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Selection::GoalsOver25 => "Over 2.5 Goals",
            Selection::GoalsUnder25 => "Under 2.5 Goals",
            Selection::CardsOver35 => "Over 3.5 Cards",
            Selection::CardsUnder35 => "Under 3.5 Cards",
            Selection::CornersOver95 => "Over 9.5 Corners",
            Selection::CornersUnder95 => "Under 9.5 Corners",
            Selection::BttsYes => "BTTS Yes",
            Selection::BttsNo => "BTTS No",
        }
    }

    /// Whether this is the outcome the market's oracle predicts directly.
    pub fn is_positive(self) -> bool {
        self.market().positive() == self
    }

    /// Probability of this selection given the oracle's positive-class
    /// probability for its market.
    pub fn probability_from(self, positive_probability: f64) -> f64 {
        if self.is_positive() {
            positive_probability
        } else {
            1.0 - positive_probability
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
