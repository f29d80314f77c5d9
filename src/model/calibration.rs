//! Probability calibration (Platt scaling) and scoring metrics.
//!
//! Calibrated probability: `sigmoid(a * logit(p_raw) + b)`. The identity map
//! is `a = 1, b = 0`, which is also the prior the fit is shrunk toward.

use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattCalibration {
    pub a: f64,
    pub b: f64,
}

impl PlattCalibration {
    pub const IDENTITY: PlattCalibration = PlattCalibration { a: 1.0, b: 0.0 };

    pub fn apply(&self, raw_prob: f64) -> f64 {
        sigmoid(self.a * logit(raw_prob) + self.b).clamp(0.0, 1.0)
    }
}

/// Held-out evaluation of a probabilistic classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
    /// ROC AUC; 0.5 when only one class is present
    pub auc: f64,
}

pub(crate) fn clamp_prob(p: f64) -> f64 {
    p.clamp(EPS, 1.0 - EPS)
}

pub(crate) fn logit(p: f64) -> f64 {
    let p = clamp_prob(p);
    (p / (1.0 - p)).ln()
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

fn logloss(p: f64, y: bool) -> f64 {
    let p = clamp_prob(p);
    if y {
        -p.ln()
    } else {
        -(1.0 - p).ln()
    }
}

/// Fit Platt parameters on `(raw_probability, outcome)` pairs by damped
/// Newton iterations with an L2 pull toward the identity map.
///
/// Returns `None` with fewer than 8 samples or a single outcome class.
pub fn fit_platt(samples: &[(f64, bool)], l2: f64) -> Option<PlattCalibration> {
    if samples.len() < 8 {
        return None;
    }
    let positives = samples.iter().filter(|(_, y)| *y).count();
    if positives == 0 || positives == samples.len() {
        return None;
    }

    let n = samples.len() as f64;
    let xs: Vec<(f64, f64)> = samples
        .iter()
        .map(|(p, y)| (logit(*p), if *y { 1.0 } else { 0.0 }))
        .collect();

    let mut a = 1.0f64;
    let mut b = 0.0f64;
    for _ in 0..50 {
        let (mut ga, mut gb) = (0.0, 0.0);
        let (mut haa, mut hab, mut hbb) = (0.0, 0.0, 0.0);
        for (x, y) in &xs {
            let q = sigmoid(a * x + b);
            let w = (q * (1.0 - q)).max(1e-12);
            ga += (q - y) * x;
            gb += q - y;
            haa += w * x * x;
            hab += w * x;
            hbb += w;
        }
        ga = ga / n + l2 * (a - 1.0);
        gb = gb / n + l2 * b;
        haa = haa / n + l2;
        hab /= n;
        hbb = hbb / n + l2;

        let det = haa * hbb - hab * hab;
        if det.abs() < 1e-12 {
            break;
        }
        let da = (hbb * ga - hab * gb) / det;
        let db = (haa * gb - hab * ga) / det;
        a -= da;
        b -= db;
        if !a.is_finite() || !b.is_finite() {
            return None;
        }
        if da.abs() < 1e-9 && db.abs() < 1e-9 {
            break;
        }
    }
    Some(PlattCalibration { a, b })
}

pub fn evaluate(predictions: &[(f64, bool)]) -> Metrics {
    let n = predictions.len();
    if n == 0 {
        return Metrics {
            samples: 0,
            accuracy: 0.0,
            log_loss: 0.0,
            brier: 0.0,
            auc: 0.5,
        };
    }
    let nf = n as f64;
    let mut correct = 0usize;
    let mut ll = 0.0;
    let mut brier = 0.0;
    for (p, y) in predictions {
        if (*p >= 0.5) == *y {
            correct += 1;
        }
        ll += logloss(*p, *y);
        let target = if *y { 1.0 } else { 0.0 };
        brier += (p - target).powi(2);
    }
    Metrics {
        samples: n,
        accuracy: correct as f64 / nf,
        log_loss: ll / nf,
        brier: brier / nf,
        auc: roc_auc(predictions),
    }
}

/// Rank-based AUC (Mann–Whitney U) with average ranks for ties.
fn roc_auc(predictions: &[(f64, bool)]) -> f64 {
    let pos = predictions.iter().filter(|(_, y)| *y).count();
    let neg = predictions.len() - pos;
    if pos == 0 || neg == 0 {
        return 0.5;
    }
    let mut sorted: Vec<(f64, bool)> = predictions.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].0 == sorted[i].0 {
            j += 1;
        }
        // ranks are 1-based; tied block i..=j shares the mean rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for item in &sorted[i..=j] {
            if item.1 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }
    let pos_f = pos as f64;
    (rank_sum_pos - pos_f * (pos_f + 1.0) / 2.0) / (pos_f * neg as f64)
}
