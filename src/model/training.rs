//! Offline training: fit, calibrate, evaluate and promote one model per
//! market.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::calibration::{evaluate, fit_platt, Metrics, PlattCalibration};
use super::oracle::{next_version, FitOptions, LogisticModel, ModelArtifact};
use crate::betting::features::{self, FeatureVector};
use crate::betting::markets::{Market, ALL_MARKETS};
use crate::db::models::CompletedMatch;
use crate::error::{PredictionError, PredictionResult};

#[derive(Debug, Clone, Copy)]
pub struct TrainingConfig {
    pub min_samples: usize,
    /// Trailing share of the chronologically sorted samples held out for
    /// calibration and evaluation
    pub validation_fraction: f64,
    pub max_log_loss: f64,
    pub max_brier: f64,
    pub platt_l2: f64,
    pub fit: FitOptions,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            min_samples: 20,
            validation_fraction: 0.2,
            max_log_loss: 0.70,
            max_brier: 0.25,
            platt_l2: 1e-2,
            fit: FitOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    Promoted {
        version: String,
        path: PathBuf,
        metrics: Metrics,
    },
    Rejected {
        reason: String,
        metrics: Option<Metrics>,
    },
}

#[derive(Debug, Clone)]
pub struct MarketReport {
    pub market: Market,
    pub samples: usize,
    pub outcome: TrainingOutcome,
}

impl MarketReport {
    pub fn promoted(&self) -> bool {
        matches!(self.outcome, TrainingOutcome::Promoted { .. })
    }
}

/// Labelled `(features, positive_outcome)` pairs for `market`, in kickoff
/// order. Matches whose result lacks the market's statistic are skipped.
pub fn labelled_samples(matches: &[CompletedMatch], market: Market) -> Vec<(FeatureVector, bool)> {
    let mut ordered: Vec<&CompletedMatch> = matches.iter().collect();
    ordered.sort_by_key(|m| m.kickoff);
    ordered
        .into_iter()
        .filter_map(|m| {
            m.result
                .positive_outcome(market)
                .map(|y| (features::build(&m.fixture), y))
        })
        .collect()
}

/// Fit on the leading part, calibrate and score on the trailing part.
pub fn fit_calibrated(
    samples: &[(FeatureVector, bool)],
    cfg: &TrainingConfig,
) -> PredictionResult<(LogisticModel, Metrics)> {
    if samples.len() < cfg.min_samples {
        return Err(PredictionError::InsufficientData(format!(
            "{} samples, need at least {}",
            samples.len(),
            cfg.min_samples
        )));
    }
    let positives = samples.iter().filter(|(_, y)| *y).count();
    if positives == 0 || positives == samples.len() {
        return Err(PredictionError::InsufficientData(
            "only one outcome class present".into(),
        ));
    }

    let holdout = ((samples.len() as f64) * cfg.validation_fraction.clamp(0.05, 0.5)).ceil() as usize;
    let split = samples.len() - holdout.max(1);
    let (train, valid) = samples.split_at(split);

    let model = LogisticModel::fit(train, &cfg.fit)?;
    let raw: Vec<(f64, bool)> = valid
        .iter()
        .map(|(x, y)| (model.raw_probability(x), *y))
        .collect();
    let calibration = fit_platt(&raw, cfg.platt_l2).unwrap_or(PlattCalibration::IDENTITY);
    let model = model.with_calibration(calibration);

    let scored: Vec<(f64, bool)> = raw
        .iter()
        .map(|(p, y)| (calibration.apply(*p), *y))
        .collect();
    Ok((model, evaluate(&scored)))
}

/// Train one market and write its artifact if it clears the gate.
pub fn train_market(
    matches: &[CompletedMatch],
    market: Market,
    models_dir: &Path,
    cfg: &TrainingConfig,
) -> MarketReport {
    let samples = labelled_samples(matches, market);
    let n = samples.len();
    let reject = |reason: String, metrics: Option<Metrics>| {
        warn!("{} model not promoted: {}", market, reason);
        MarketReport {
            market,
            samples: n,
            outcome: TrainingOutcome::Rejected { reason, metrics },
        }
    };

    let (model, metrics) = match fit_calibrated(&samples, cfg) {
        Ok(fit) => fit,
        Err(e) => return reject(e.to_string(), None),
    };
    info!(
        "{}: acc={:.3} logloss={:.4} brier={:.4} auc={:.3} on {} held-out",
        market, metrics.accuracy, metrics.log_loss, metrics.brier, metrics.auc, metrics.samples
    );

    if metrics.log_loss > cfg.max_log_loss {
        return reject(
            format!("log loss {:.4} above {:.2}", metrics.log_loss, cfg.max_log_loss),
            Some(metrics),
        );
    }
    if metrics.brier > cfg.max_brier {
        return reject(
            format!("brier {:.4} above {:.2}", metrics.brier, cfg.max_brier),
            Some(metrics),
        );
    }

    let previous = ModelArtifact::load(&ModelArtifact::path(models_dir, market), market)
        .ok()
        .map(|a| a.version);
    let version = next_version(previous.as_deref());

    let mut artifact = ModelArtifact::new(market, version.clone(), model);
    artifact.training_samples = n;
    artifact.metrics = Some(metrics);
    match artifact.save(models_dir) {
        Ok(path) => {
            info!("Promoted {} model v{} → {}", market, version, path.display());
            MarketReport {
                market,
                samples: n,
                outcome: TrainingOutcome::Promoted {
                    version,
                    path,
                    metrics,
                },
            }
        }
        Err(e) => reject(format!("failed to write artifact: {e:#}"), Some(metrics)),
    }
}

/// Train every market. One market failing never stops the others.
pub fn train_all(
    matches: &[CompletedMatch],
    models_dir: &Path,
    cfg: &TrainingConfig,
) -> Vec<MarketReport> {
    info!("Training on {} completed matches", matches.len());
    ALL_MARKETS
        .into_iter()
        .map(|m| train_market(matches, m, models_dir, cfg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Fixture, MatchResult};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    /// Goals follow the attacking averages, so the goals market is learnable;
    /// corners are never recorded.
    fn history(n: usize) -> Vec<CompletedMatch> {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 15, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let strength = (i % 10) as f64 / 3.0;
                let goals = if i % 10 >= 5 { 2 } else { 0 };
                CompletedMatch {
                    fixture: Fixture {
                        match_id: format!("M{i}"),
                        home_goals_avg: Some(0.5 + strength),
                        away_goals_avg: Some(0.4 + strength),
                        home_cards_avg: Some(2.0),
                        away_cards_avg: Some(2.0),
                        ..Default::default()
                    },
                    kickoff: start + Duration::days(i as i64),
                    result: MatchResult {
                        home_goals: goals,
                        away_goals: goals / 2,
                        home_cards: Some((i % 3) as i32),
                        away_cards: Some(2),
                        home_corners: None,
                        away_corners: None,
                    },
                    odds: None,
                }
            })
            .collect()
    }

    #[test]
    fn samples_skip_results_without_the_statistic() {
        let h = history(30);
        assert_eq!(labelled_samples(&h, Market::TotalGoals).len(), 30);
        assert!(labelled_samples(&h, Market::TotalCorners).is_empty());
    }

    #[test]
    fn too_few_samples_are_rejected() {
        let h = history(10);
        let err = fit_calibrated(&labelled_samples(&h, Market::TotalGoals), &TrainingConfig::default())
            .unwrap_err();
        assert!(matches!(err, PredictionError::InsufficientData(_)));
    }

    #[test]
    fn learnable_market_is_promoted_and_version_bumps() {
        let dir = tempdir().unwrap();
        let h = history(200);
        let cfg = TrainingConfig::default();

        let first = train_market(&h, Market::TotalGoals, dir.path(), &cfg);
        assert!(first.promoted(), "{:?}", first.outcome);
        let second = train_market(&h, Market::TotalGoals, dir.path(), &cfg);
        match second.outcome {
            TrainingOutcome::Promoted { version, .. } => assert_eq!(version, "1.0.1"),
            other => panic!("expected promotion, got {other:?}"),
        }
    }

    #[test]
    fn failing_market_does_not_block_others() {
        let dir = tempdir().unwrap();
        let reports = train_all(&history(200), dir.path(), &TrainingConfig::default());
        assert_eq!(reports.len(), 4);
        let corners = reports.iter().find(|r| r.market == Market::TotalCorners).unwrap();
        assert!(!corners.promoted());
        assert!(!ModelArtifact::path(dir.path(), Market::TotalCorners).exists());
        let goals = reports.iter().find(|r| r.market == Market::TotalGoals).unwrap();
        assert!(goals.promoted());
    }

    #[test]
    fn gate_rejects_without_writing() {
        let dir = tempdir().unwrap();
        let cfg = TrainingConfig {
            max_log_loss: 0.0,
            ..Default::default()
        };
        let report = train_market(&history(200), Market::TotalGoals, dir.path(), &cfg);
        assert!(matches!(
            report.outcome,
            TrainingOutcome::Rejected { metrics: Some(_), .. }
        ));
        assert!(!ModelArtifact::path(dir.path(), Market::TotalGoals).exists());
    }
}
