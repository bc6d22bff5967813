//! Least-squares regression with an optional Huber loss.
//!
//! Features are standardized before solving. The Huber variant runs IRLS:
//! each pass rescales residuals by `sigma = MAD / 0.6745` and weights rows by
//! `min(1, k * sigma / |r|)`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use voltwatch_core::{ModelConfig, ModelKind};

use super::{FittedModel, Regressor};
use crate::error::{ComputeError, ComputeResult};
use crate::pipeline::anomaly::population::{mad, mean_std, median};
use crate::pipeline::anomaly::MAD_SCALE;

const RIDGE: f64 = 1e-8;
const MAX_IRLS_ITERATIONS: usize = 50;
const IRLS_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    /// Coefficients on standardized features.
    pub coefficients: Vec<f64>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    /// IRLS passes run; 0 for plain least squares.
    pub iterations: usize,
}

impl LinearModel {
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .enumerate()
            .map(|(j, c)| c * (row.get(j).copied().unwrap_or(self.means[j]) - self.means[j]) / self.scales[j])
            .sum::<f64>()
            + self.intercept
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinearRegressor {
    /// Huber threshold in units of the robust residual scale.
    pub huber_k: Option<f64>,
}

impl LinearRegressor {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            huber_k: config.huber_k,
        }
    }
}

impl Regressor for LinearRegressor {
    fn kind(&self) -> ModelKind {
        ModelKind::Linear
    }

    fn fit(&self, x: &DMatrix<f64>, y: &[f64]) -> ComputeResult<FittedModel> {
        if x.nrows() != y.len() {
            return Err(ComputeError::Model(format!("{} feature rows for {} targets", x.nrows(), y.len())));
        }
        if x.nrows() == 0 {
            return Err(ComputeError::EmptyInput("no rows to fit".into()));
        }
        let (n, p) = x.shape();

        let mut means = Vec::with_capacity(p);
        let mut scales = Vec::with_capacity(p);
        for column in x.column_iter() {
            let values: Vec<f64> = column.iter().copied().collect();
            let (m, s) = mean_std(&values);
            means.push(m);
            scales.push(if s <= f64::EPSILON { 1.0 } else { s });
        }
        // design columns: [1, z_1 .. z_p]
        let design = DMatrix::from_fn(n, p + 1, |i, j| {
            if j == 0 {
                1.0
            } else {
                (x[(i, j - 1)] - means[j - 1]) / scales[j - 1]
            }
        });
        let target = DVector::from_column_slice(y);

        let mut weights = DVector::from_element(n, 1.0);
        let mut beta = weighted_least_squares(&design, &target, &weights)?;
        let mut iterations = 0;

        if let Some(k) = self.huber_k {
            while iterations < MAX_IRLS_ITERATIONS {
                let residuals = &target - &design * &beta;
                let Some(sigma) = median(residuals.as_slice())
                    .and_then(|c| mad(residuals.as_slice(), c))
                    .map(|m| m / MAD_SCALE)
                    .filter(|s| s.is_finite() && *s > 0.0)
                else {
                    break;
                };
                weights = residuals.map(|r| if r.abs() <= k * sigma { 1.0 } else { k * sigma / r.abs() });
                let next = weighted_least_squares(&design, &target, &weights)?;
                iterations += 1;
                let change = (&next - &beta).amax();
                beta = next;
                if change < IRLS_TOLERANCE {
                    break;
                }
            }
            debug!(iterations, k, "huber regression converged");
        }

        Ok(FittedModel::Linear(LinearModel {
            intercept: beta[0],
            coefficients: beta.iter().skip(1).copied().collect(),
            means,
            scales,
            iterations,
        }))
    }
}

/// Solve `(A'WA + ridge) b = A'Wy`. The intercept column is not penalised.
fn weighted_least_squares(
    design: &DMatrix<f64>,
    y: &DVector<f64>,
    weights: &DVector<f64>,
) -> ComputeResult<DVector<f64>> {
    let root = weights.map(f64::sqrt);
    let a = DMatrix::from_fn(design.nrows(), design.ncols(), |i, j| design[(i, j)] * root[i]);
    let b = y.component_mul(&root);

    let mut normal = a.transpose() * &a;
    for i in 1..normal.nrows() {
        normal[(i, i)] += RIDGE;
    }
    let rhs = a.transpose() * b;
    if let Some(cholesky) = normal.clone().cholesky() {
        return Ok(cholesky.solve(&rhs));
    }
    normal
        .lu()
        .solve(&rhs)
        .ok_or_else(|| ComputeError::Model("singular normal equations".into()))
}
