//! Walk-forward backtesting of a single market.
//!
//! Samples are bucketed by calendar month relative to the first sample. Each
//! period trains on every month before the cutoff and bets on the following
//! `step_months`; the cutoff then advances by `step_months`, so the test
//! window of one period becomes part of the next period's training window.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::oracle::{FitOptions, LogisticModel, ProbabilityOracle};
use crate::betting::features::{self, FeatureVector};
use crate::betting::kelly;
use crate::betting::markets::Market;
use crate::db::models::CompletedMatch;
use crate::error::{PredictionError, PredictionResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Staking {
    /// Same stake on every bet
    Flat { unit: f64 },
    /// Fractional Kelly on the running bankroll
    Kelly { fraction: f64 },
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub market: Market,
    pub initial_train_months: u32,
    pub step_months: u32,
    /// Bet only when the oracle's probability reaches this value
    pub min_probability: f64,
    pub staking: Staking,
    pub initial_bankroll: f64,
    pub fit: FitOptions,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            market: Market::TotalGoals,
            initial_train_months: 12,
            step_months: 1,
            min_probability: 0.6,
            staking: Staking::Flat { unit: 1.0 },
            initial_bankroll: 1000.0,
            fit: FitOptions::default(),
        }
    }
}

/// One settled-or-skipped test case.
#[derive(Debug, Clone)]
pub struct BacktestSample {
    pub month: u32,
    pub features: FeatureVector,
    pub outcome: bool,
    pub odds: f64,
}

/// Month ranges are half-open: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthWindow {
    pub start: u32,
    pub end: u32,
}

impl MonthWindow {
    pub fn contains(&self, month: u32) -> bool {
        (self.start..self.end).contains(&month)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestPeriod {
    pub index: usize,
    pub train_window: MonthWindow,
    pub test_window: MonthWindow,
    pub train_samples: usize,
    pub test_samples: usize,
    pub bets_placed: usize,
    pub wins: usize,
    pub stake_total: f64,
    pub return_total: f64,
    pub profit: f64,
    pub win_rate: f64,
    pub roi: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestSummary {
    pub market: Market,
    /// Calendar month of month index 0, "YYYY-MM"
    pub first_month: Option<String>,
    pub total_periods: usize,
    pub total_bets: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_staked: f64,
    pub total_return: f64,
    pub profit: f64,
    pub roi: f64,
    pub sharpe_ratio: f64,
    /// Fraction, ≤ 0
    pub max_drawdown: f64,
    pub initial_bankroll: f64,
    pub final_bankroll: f64,
    pub periods: Vec<BacktestPeriod>,
}

fn month_number(ts: DateTime<Utc>) -> i64 {
    ts.year() as i64 * 12 + ts.month0() as i64
}

/// Convert completed matches into backtest samples for `market`. Matches
/// without a settled outcome or usable odds on the positive selection are
/// dropped. Month 0 is the month of the earliest retained sample.
pub fn prepare_samples(
    matches: &[CompletedMatch],
    market: Market,
) -> (Vec<BacktestSample>, Option<String>) {
    let mut retained: Vec<(DateTime<Utc>, &CompletedMatch, bool, f64)> = matches
        .iter()
        .filter_map(|m| {
            let outcome = m.result.positive_outcome(market)?;
            let odds = m.odds.as_ref()?.for_selection(market.positive())?;
            (odds > 1.0).then_some((m.kickoff, m, outcome, odds))
        })
        .collect();
    retained.sort_by_key(|(ts, ..)| *ts);

    let Some(&(first, ..)) = retained.first() else {
        return (Vec::new(), None);
    };
    let base = month_number(first);
    let samples = retained
        .into_iter()
        .map(|(ts, m, outcome, odds)| BacktestSample {
            month: (month_number(ts) - base) as u32,
            features: features::build(&m.fixture),
            outcome,
            odds,
        })
        .collect();
    let label = format!("{:04}-{:02}", first.year(), first.month());
    (samples, Some(label))
}

/// Train/test windows for the given sample months. Test windows that would
/// contain no samples are skipped.
pub fn walk_forward_windows(
    months: &[u32],
    initial_train_months: u32,
    step_months: u32,
) -> PredictionResult<Vec<(MonthWindow, MonthWindow)>> {
    if step_months == 0 {
        return Err(PredictionError::invalid("step_months", "0", ["1 or more"]));
    }
    let Some(&last) = months.iter().max() else {
        return Ok(Vec::new());
    };
    let mut windows = Vec::new();
    let mut cutoff = initial_train_months;
    while cutoff <= last {
        let train = MonthWindow { start: 0, end: cutoff };
        let test = MonthWindow {
            start: cutoff,
            end: cutoff + step_months,
        };
        if months.iter().any(|m| test.contains(*m)) {
            windows.push((train, test));
        }
        cutoff += step_months;
    }
    Ok(windows)
}

/// Mean over population standard deviation of per-bet returns. Zero with no
/// bets or no variance.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-12 {
        0.0
    } else {
        mean / std
    }
}

/// Largest relative fall from a running peak, as a non-positive fraction.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &v in equity {
        peak = peak.max(v);
        if peak > 0.0 {
            worst = worst.min((v - peak) / peak);
        }
    }
    worst
}

pub fn run(samples: &[BacktestSample], cfg: &BacktestConfig) -> PredictionResult<BacktestSummary> {
    let months: Vec<u32> = samples.iter().map(|s| s.month).collect();
    let windows = walk_forward_windows(&months, cfg.initial_train_months, cfg.step_months)?;
    info!(
        "Backtesting {} over {} walk-forward periods ({} samples)",
        cfg.market,
        windows.len(),
        samples.len()
    );

    let mut bankroll = cfg.initial_bankroll;
    let mut equity = vec![bankroll];
    let mut bet_returns = Vec::new();
    let mut periods = Vec::with_capacity(windows.len());

    for (index, (train_window, test_window)) in windows.into_iter().enumerate() {
        let train: Vec<(FeatureVector, bool)> = samples
            .iter()
            .filter(|s| train_window.contains(s.month))
            .map(|s| (s.features, s.outcome))
            .collect();
        let test: Vec<&BacktestSample> = samples
            .iter()
            .filter(|s| test_window.contains(s.month))
            .collect();

        let both_classes = train.iter().any(|(_, y)| *y) && train.iter().any(|(_, y)| !*y);
        let model = if both_classes {
            Some(LogisticModel::fit(&train, &cfg.fit)?)
        } else {
            debug!("Period {}: training window lacks both outcomes, no bets", index + 1);
            None
        };

        let mut period = BacktestPeriod {
            index,
            train_window,
            test_window,
            train_samples: train.len(),
            test_samples: test.len(),
            bets_placed: 0,
            wins: 0,
            stake_total: 0.0,
            return_total: 0.0,
            profit: 0.0,
            win_rate: 0.0,
            roi: 0.0,
        };

        if let Some(model) = &model {
            for sample in test {
                let p = model.predict(&sample.features);
                if p < cfg.min_probability {
                    continue;
                }
                let stake = match cfg.staking {
                    Staking::Flat { unit } => unit,
                    Staking::Kelly { fraction } => kelly::stake(p, sample.odds, bankroll, fraction),
                };
                if stake <= 0.0 {
                    continue;
                }
                let returned = if sample.outcome { stake * sample.odds } else { 0.0 };
                period.bets_placed += 1;
                period.stake_total += stake;
                period.return_total += returned;
                if sample.outcome {
                    period.wins += 1;
                }
                bankroll += returned - stake;
                equity.push(bankroll);
                bet_returns.push(if sample.outcome { sample.odds - 1.0 } else { -1.0 });
            }
        }

        period.profit = period.return_total - period.stake_total;
        if period.bets_placed > 0 {
            period.win_rate = period.wins as f64 / period.bets_placed as f64;
        }
        if period.stake_total > 0.0 {
            period.roi = period.profit / period.stake_total * 100.0;
        }
        debug!(
            "Period {}: train={} test={} bets={} roi={:.2}%",
            index + 1,
            period.train_samples,
            period.test_samples,
            period.bets_placed,
            period.roi
        );
        periods.push(period);
    }

    let total_bets: usize = periods.iter().map(|p| p.bets_placed).sum();
    let wins: usize = periods.iter().map(|p| p.wins).sum();
    let total_staked: f64 = periods.iter().map(|p| p.stake_total).sum();
    let total_return: f64 = periods.iter().map(|p| p.return_total).sum();
    let profit = total_return - total_staked;

    Ok(BacktestSummary {
        market: cfg.market,
        first_month: None,
        total_periods: periods.len(),
        total_bets,
        wins,
        win_rate: if total_bets > 0 { wins as f64 / total_bets as f64 } else { 0.0 },
        total_staked,
        total_return,
        profit,
        roi: if total_staked > 0.0 { profit / total_staked * 100.0 } else { 0.0 },
        sharpe_ratio: sharpe_ratio(&bet_returns),
        max_drawdown: max_drawdown(&equity),
        initial_bankroll: cfg.initial_bankroll,
        final_bankroll: bankroll,
        periods,
    })
}

/// Prepare samples from stored matches and run the backtest.
pub fn run_on_matches(
    matches: &[CompletedMatch],
    cfg: &BacktestConfig,
) -> PredictionResult<BacktestSummary> {
    let (samples, first_month) = prepare_samples(matches, cfg.market);
    if samples.is_empty() {
        return Err(PredictionError::InsufficientData(format!(
            "no completed {} matches with odds to backtest",
            cfg.market
        )));
    }
    let mut summary = run(&samples, cfg)?;
    summary.first_month = first_month;
    Ok(summary)
}
