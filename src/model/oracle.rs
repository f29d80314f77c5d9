//! Probability oracles: one binary classifier per market.
//!
//! The service only depends on [`ProbabilityOracle`]; the concrete model is a
//! standardised, L2-regularised logistic regression with an optional Platt
//! calibration layer, persisted as a versioned JSON artifact.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::calibration::{sigmoid, Metrics, PlattCalibration};
use crate::betting::features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use crate::betting::markets::{Market, ALL_MARKETS};
use crate::error::{PredictionError, PredictionResult};

/// Bump whenever the artifact layout or the feature contract changes.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Contract every market model satisfies: features in, probability of the
/// market's positive-class selection out.
pub trait ProbabilityOracle: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub iterations: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            iterations: 400,
            learning_rate: 0.3,
            l2: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub calibration: PlattCalibration,
}

impl LogisticModel {
    /// Fit by full-batch gradient descent on standardised features.
    pub fn fit(samples: &[(FeatureVector, bool)], opts: &FitOptions) -> PredictionResult<Self> {
        if samples.is_empty() {
            return Err(PredictionError::InsufficientData(
                "cannot fit a model on zero samples".into(),
            ));
        }
        let n = samples.len() as f64;

        let mut means = vec![0.0; FEATURE_COUNT];
        for (x, _) in samples {
            for (m, v) in means.iter_mut().zip(x.values()) {
                *m += v / n;
            }
        }
        let mut scales = vec![0.0; FEATURE_COUNT];
        for (x, _) in samples {
            for ((s, v), m) in scales.iter_mut().zip(x.values()).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = if *s > 1e-12 { s.sqrt() } else { 1.0 };
        }

        let standardised: Vec<([f64; FEATURE_COUNT], f64)> = samples
            .iter()
            .map(|(x, y)| {
                let mut z = [0.0; FEATURE_COUNT];
                for (i, zi) in z.iter_mut().enumerate() {
                    *zi = (x.values()[i] - means[i]) / scales[i];
                }
                (z, if *y { 1.0 } else { 0.0 })
            })
            .collect();

        let mut weights = vec![0.0; FEATURE_COUNT];
        let base_rate = standardised.iter().map(|(_, y)| y).sum::<f64>() / n;
        let mut bias = super::calibration::logit(base_rate);

        for i in 0..opts.iterations.max(1) {
            let lr = opts.learning_rate / (1.0 + 0.005 * i as f64);
            let mut grad_w = vec![0.0; FEATURE_COUNT];
            let mut grad_b = 0.0;
            for (z, y) in &standardised {
                let score = bias + z.iter().zip(&weights).map(|(a, w)| a * w).sum::<f64>();
                let err = sigmoid(score) - y;
                for (g, zi) in grad_w.iter_mut().zip(z) {
                    *g += err * zi;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= lr * (g / n + opts.l2 * *w);
            }
            bias -= lr * grad_b / n;
            if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                return Err(PredictionError::InsufficientData(
                    "gradient descent diverged".into(),
                ));
            }
        }

        Ok(LogisticModel {
            means,
            scales,
            weights,
            bias,
            calibration: PlattCalibration::IDENTITY,
        })
    }

    /// Uncalibrated model output.
    pub fn raw_probability(&self, features: &FeatureVector) -> f64 {
        let score = self.bias
            + features
                .values()
                .iter()
                .enumerate()
                .map(|(i, v)| (v - self.means[i]) / self.scales[i] * self.weights[i])
                .sum::<f64>();
        sigmoid(score)
    }

    pub fn with_calibration(mut self, calibration: PlattCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    fn check_shape(&self) -> Result<(), String> {
        for (name, len) in [
            ("means", self.means.len()),
            ("scales", self.scales.len()),
            ("weights", self.weights.len()),
        ] {
            if len != FEATURE_COUNT {
                return Err(format!("{name} has {len} entries, expected {FEATURE_COUNT}"));
            }
        }
        if self.scales.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err("scales must be finite and non-zero".into());
        }
        Ok(())
    }
}

impl ProbabilityOracle for LogisticModel {
    fn predict(&self, features: &FeatureVector) -> f64 {
        self.calibration.apply(self.raw_probability(features))
    }
}

/// On-disk form of a trained market model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema_version: u32,
    pub market: Market,
    /// Semantic version, patch bumped on every promotion
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub training_samples: usize,
    pub metrics: Option<Metrics>,
    pub model: LogisticModel,
}

impl ModelArtifact {
    pub fn new(market: Market, version: String, model: LogisticModel) -> Self {
        ModelArtifact {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            market,
            version,
            trained_at: Utc::now(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            training_samples: 0,
            metrics: None,
            model,
        }
    }

    pub fn path(dir: &Path, market: Market) -> PathBuf {
        dir.join(format!("{}_model.json", market.key()))
    }

    /// Read an artifact and verify it can serve `market` with the current
    /// feature layout.
    pub fn load(path: &Path, market: Market) -> PredictionResult<Self> {
        let artifact_err = |reason: String| PredictionError::Artifact {
            path: path.display().to_string(),
            reason,
        };
        let raw = fs::read_to_string(path).map_err(|e| artifact_err(e.to_string()))?;
        let artifact: ModelArtifact =
            serde_json::from_str(&raw).map_err(|e| artifact_err(format!("unreadable: {e}")))?;
        artifact.check_compatible(market).map_err(artifact_err)?;
        Ok(artifact)
    }

    pub fn check_compatible(&self, market: Market) -> Result<(), String> {
        if self.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(format!(
                "schema version {} is not supported (expected {})",
                self.schema_version, ARTIFACT_SCHEMA_VERSION
            ));
        }
        if self.market != market {
            return Err(format!(
                "artifact is for market {}, expected {}",
                self.market, market
            ));
        }
        if self.feature_names.len() != FEATURE_COUNT
            || self
                .feature_names
                .iter()
                .zip(FEATURE_NAMES.iter())
                .any(|(a, b)| a != b)
        {
            return Err("feature layout does not match the current feature builder".into());
        }
        self.model.check_shape()
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating models directory {}", dir.display()))?;
        let path = Self::path(dir, self.market);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("promoting {}", path.display()))?;
        Ok(path)
    }
}

/// Bump the patch component: "1.0.3" → "1.0.4". Unparseable input restarts
/// at "1.0.0".
pub fn next_version(current: Option<&str>) -> String {
    let Some(current) = current else {
        return "1.0.0".to_string();
    };
    let parts: Vec<u64> = current
        .split('.')
        .map(|p| p.parse::<u64>())
        .collect::<Result<_, _>>()
        .unwrap_or_default();
    match parts.as_slice() {
        [major, minor, patch] => format!("{major}.{minor}.{}", patch + 1),
        _ => "1.0.0".to_string(),
    }
}

/// The loaded oracles, keyed by market. Built once at startup and shared
/// read-only afterwards.
#[derive(Clone, Default)]
pub struct OracleSet {
    oracles: BTreeMap<Market, Arc<dyn ProbabilityOracle>>,
    versions: BTreeMap<Market, String>,
}

impl OracleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_oracle(mut self, market: Market, oracle: Arc<dyn ProbabilityOracle>) -> Self {
        self.oracles.insert(market, oracle);
        self
    }

    /// Load every market artifact found in `dir`. A missing artifact leaves
    /// that market unavailable; an incompatible one is an error.
    pub fn load_dir(dir: &Path) -> PredictionResult<Self> {
        let mut set = OracleSet::new();
        for market in ALL_MARKETS {
            let path = ModelArtifact::path(dir, market);
            if !path.exists() {
                warn!(
                    "No model artifact for {} at {} – market unavailable",
                    market,
                    path.display()
                );
                continue;
            }
            let artifact = ModelArtifact::load(&path, market)?;
            info!(
                "Loaded {} model v{} (trained {}, {} samples)",
                market, artifact.version, artifact.trained_at, artifact.training_samples
            );
            set.versions.insert(market, artifact.version.clone());
            set = set.with_oracle(market, Arc::new(artifact.model));
        }
        Ok(set)
    }

    pub fn get(&self, market: Market) -> Option<&Arc<dyn ProbabilityOracle>> {
        self.oracles.get(&market)
    }

    pub fn is_available(&self, market: Market) -> bool {
        self.oracles.contains_key(&market)
    }

    pub fn availability(&self) -> BTreeMap<Market, bool> {
        ALL_MARKETS
            .into_iter()
            .map(|m| (m, self.is_available(m)))
            .collect()
    }

    pub fn version(&self, market: Market) -> Option<&str> {
        self.versions.get(&market).map(String::as_str)
    }
}

#[cfg(test)]
impl LogisticModel {
    /// A model that ignores its inputs and always answers `probability`.
    pub fn constant(probability: f64) -> Self {
        LogisticModel {
            means: vec![0.0; FEATURE_COUNT],
            scales: vec![1.0; FEATURE_COUNT],
            weights: vec![0.0; FEATURE_COUNT],
            bias: super::calibration::logit(probability),
            calibration: PlattCalibration::IDENTITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::betting::features;
    use crate::db::models::Fixture;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn sample(goals: f64, y: bool) -> (FeatureVector, bool) {
        let fx = Fixture {
            home_goals_avg: Some(goals),
            away_goals_avg: Some(goals),
            ..Default::default()
        };
        (features::build(&fx), y)
    }

    #[test]
    fn fitted_model_orders_by_signal() {
        let mut samples = Vec::new();
        for i in 0..60 {
            let g = 0.5 + i as f64 * 0.05;
            samples.push(sample(g, g > 1.7));
        }
        let model = LogisticModel::fit(&samples, &FitOptions::default()).unwrap();
        let low = model.predict(&sample(0.6, false).0);
        let high = model.predict(&sample(3.2, true).0);
        assert!(high > 0.8, "high = {high}");
        assert!(low < 0.2, "low = {low}");
    }

    #[test]
    fn fit_rejects_empty_input() {
        assert!(matches!(
            LogisticModel::fit(&[], &FitOptions::default()),
            Err(PredictionError::InsufficientData(_))
        ));
    }

    #[test]
    fn constant_model_returns_its_probability() {
        let m = LogisticModel::constant(0.72);
        assert_relative_eq!(m.predict(&sample(1.0, true).0), 0.72, epsilon = 1e-9);
    }

    #[test]
    fn artifact_round_trip_and_compatibility_checks() {
        let dir = tempdir().unwrap();
        let artifact = ModelArtifact::new(Market::Btts, "1.0.0".into(), LogisticModel::constant(0.6));
        let path = artifact.save(dir.path()).unwrap();
        let loaded = ModelArtifact::load(&path, Market::Btts).unwrap();
        assert_eq!(loaded.version, "1.0.0");

        // wrong market
        assert!(matches!(
            ModelArtifact::load(&path, Market::TotalGoals),
            Err(PredictionError::Artifact { .. })
        ));

        // future schema
        let mut future = artifact.clone();
        future.schema_version = ARTIFACT_SCHEMA_VERSION + 1;
        future.save(dir.path()).unwrap();
        assert!(ModelArtifact::load(&path, Market::Btts).is_err());

        // renamed feature
        let mut renamed = artifact.clone();
        renamed.feature_names[0] = "home_xg_avg_5".into();
        renamed.save(dir.path()).unwrap();
        assert!(ModelArtifact::load(&path, Market::Btts).is_err());

    }

    #[test]
    fn load_dir_marks_missing_markets_unavailable() {
        let dir = tempdir().unwrap();
        ModelArtifact::new(Market::TotalGoals, "1.0.2".into(), LogisticModel::constant(0.7))
            .save(dir.path())
            .unwrap();
        let set = OracleSet::load_dir(dir.path()).unwrap();
        assert!(set.is_available(Market::TotalGoals));
        assert!(!set.is_available(Market::Btts));
        assert_eq!(set.version(Market::TotalGoals), Some("1.0.2"));
        assert_eq!(set.availability().values().filter(|v| **v).count(), 1);
    }

    #[test]
    fn version_bumps_patch() {
        assert_eq!(next_version(None), "1.0.0");
        assert_eq!(next_version(Some("1.0.3")), "1.0.4");
        assert_eq!(next_version(Some("garbage")), "1.0.0");
    }
}
