//! Pre-trained classifier that accepts or rejects a finished attempt.

use crate::calibration::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fs;

const EMBEDDED_LINEAR: &str = include_str!("../../data/svm_linear.json");

/// Feature-normalized SVM. Features are standardized as `(f − mu) / sigma`
/// before scoring; a negative score rejects the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kernel", rename_all = "snake_case")]
pub enum SvmModel {
    Linear {
        mu: Vec<f64>,
        sigma: Vec<f64>,
        beta: Vec<f64>,
        bias: f64,
    },
    Gaussian {
        mu: Vec<f64>,
        sigma: Vec<f64>,
        /// One row per support vector, in normalized feature space.
        support_vectors: Vec<Vec<f64>>,
        labels: Vec<f64>,
        alpha: Vec<f64>,
        bias: f64,
        kernel_scale: f64,
    },
}

impl SvmModel {
    /// The linear model shipped with the crate.
    ///
    /// Its coefficients are hand-set placeholders, not trained values: `mu`
    /// is zero, `sigma` only brings each feature to a comparable range, and
    /// the bias of 1.0 accepts any result without strong evidence against
    /// it. Deployments should load a model trained on recorded attempts
    /// through [`ResultParams::svm_model`](crate::params::ResultParams) or
    /// [`SvmModel::load`].
    pub fn embedded() -> Result<Self, CalibrationError> {
        Self::from_json_str(EMBEDDED_LINEAR)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, CalibrationError> {
        let model: SvmModel = serde_json::from_str(contents)?;
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: &str) -> Result<Self, CalibrationError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn feature_count(&self) -> usize {
        match self {
            SvmModel::Linear { mu, .. } | SvmModel::Gaussian { mu, .. } => mu.len(),
        }
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let invalid = |msg: String| Err(CalibrationError::InvalidParams(msg));
        let (mu, sigma) = match self {
            SvmModel::Linear { mu, sigma, .. } | SvmModel::Gaussian { mu, sigma, .. } => (mu, sigma),
        };
        if sigma.len() != mu.len() || sigma.iter().any(|&s| s == 0.0) {
            return invalid("svm sigma must match mu and be non-zero".to_string());
        }
        match self {
            SvmModel::Linear { beta, .. } if beta.len() != mu.len() => {
                invalid(format!("svm beta has {} entries, expected {}", beta.len(), mu.len()))
            }
            SvmModel::Gaussian {
                support_vectors,
                labels,
                alpha,
                kernel_scale,
                ..
            } => {
                if labels.len() != support_vectors.len() || alpha.len() != support_vectors.len() {
                    return invalid("svm labels and alpha must match the support vectors".to_string());
                }
                if support_vectors.iter().any(|sv| sv.len() != mu.len()) {
                    return invalid("svm support vector length differs from mu".to_string());
                }
                if *kernel_scale == 0.0 {
                    return invalid("svm kernel scale must be non-zero".to_string());
                }
                Ok(())
            }
            SvmModel::Linear { .. } => Ok(()),
        }
    }

    /// Decision value for one feature vector. Missing trailing features count
    /// as equal to `mu`.
    pub fn score(&self, features: &[f64]) -> f64 {
        match self {
            SvmModel::Linear { mu, sigma, beta, bias } => {
                normalized(features, mu, sigma)
                    .zip(beta)
                    .map(|(x, b)| x * b)
                    .sum::<f64>()
                    + bias
            }
            SvmModel::Gaussian {
                mu,
                sigma,
                support_vectors,
                labels,
                alpha,
                bias,
                kernel_scale,
            } => {
                let x: Vec<f64> = normalized(features, mu, sigma).collect();
                let gamma = 1.0 / (kernel_scale * kernel_scale);
                support_vectors
                    .iter()
                    .zip(labels)
                    .zip(alpha)
                    .map(|((sv, y), a)| {
                        let dist2: f64 = x.iter().zip(sv).map(|(xi, si)| (xi - si).powi(2)).sum();
                        a * y * (-gamma * dist2).exp()
                    })
                    .sum::<f64>()
                    + bias
            }
        }
    }

    pub fn accepts(&self, features: &[f64]) -> bool {
        self.score(features) >= 0.0
    }
}

fn normalized<'a>(features: &'a [f64], mu: &'a [f64], sigma: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    mu.iter()
        .zip(sigma)
        .enumerate()
        .map(move |(i, (m, s))| (features.get(i).copied().unwrap_or(*m) - m) / s)
}
