// =============================================================================
// Least squares on nalgebra matrices
// =============================================================================
//
// β = (X'WX)⁻¹ X'Wy. The inverse is kept because the ADF test needs
// coefficient standard errors. Weighted fits scale each row by √w and
// reuse the plain path.

use nalgebra::{DMatrix, DVector};

use super::AnalyticsError;

/// Smallest accepted eigenvalue of X'X relative to its largest.
const CONDITION_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    pub coefficients: DVector<f64>,
    /// (Weighted) sum of squared residuals.
    pub ssr: f64,
    /// (X'WX)⁻¹.
    pub xtx_inv: DMatrix<f64>,
    pub nobs: usize,
}

impl LeastSquaresFit {
    pub fn ncols(&self) -> usize {
        self.coefficients.len()
    }

    /// Classical t-statistic of coefficient `idx`.
    pub fn t_value(&self, idx: usize) -> Result<f64, AnalyticsError> {
        let dof = self.nobs.saturating_sub(self.ncols());
        if dof == 0 {
            return Err(AnalyticsError::InsufficientData {
                needed: self.ncols() + 1,
                got: self.nobs,
            });
        }
        let sigma2 = self.ssr / dof as f64;
        let se = (sigma2 * self.xtx_inv[(idx, idx)]).sqrt();
        if !se.is_finite() || se <= 0.0 {
            return Err(AnalyticsError::Degenerate("zero coefficient standard error"));
        }
        Ok(self.coefficients[idx] / se)
    }

    /// Gaussian log-likelihood at the ML variance estimate.
    pub fn log_likelihood(&self) -> f64 {
        let n = self.nobs as f64;
        -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0)
    }

    /// Akaike information criterion, counting every column as a parameter.
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood() + 2.0 * self.ncols() as f64
    }
}

/// Design matrix `[1, x]`.
pub fn with_intercept(x: &[f64]) -> DMatrix<f64> {
    DMatrix::from_fn(x.len(), 2, |i, j| if j == 0 { 1.0 } else { x[i] })
}

/// Ordinary least squares of `y` on the columns of `design`.
pub fn least_squares(design: &DMatrix<f64>, y: &DVector<f64>) -> Result<LeastSquaresFit, AnalyticsError> {
    let (nobs, k) = design.shape();
    if k == 0 || nobs != y.len() {
        return Err(AnalyticsError::Degenerate("design shape mismatch"));
    }
    if nobs < k {
        return Err(AnalyticsError::InsufficientData { needed: k, got: nobs });
    }

    let xt = design.transpose();
    let xtx = &xt * design;
    let xty = &xt * y;

    let eigen = xtx.clone().symmetric_eigenvalues();
    let largest = eigen.amax();
    let smallest = eigen.min();
    if !largest.is_finite() || largest == 0.0 || smallest <= CONDITION_EPS * largest {
        return Err(AnalyticsError::Singular);
    }

    let xtx_inv = xtx.try_inverse().ok_or(AnalyticsError::Singular)?;
    let coefficients = &xtx_inv * xty;
    let ssr = (y - design * &coefficients).norm_squared();

    if !ssr.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
        return Err(AnalyticsError::NonFinite("least squares solution"));
    }

    Ok(LeastSquaresFit {
        coefficients,
        ssr,
        xtx_inv,
        nobs,
    })
}

/// Weighted least squares: minimise Σ wᵢ (yᵢ − xᵢ·β)². Weights must be
/// non-negative.
pub fn weighted_least_squares(
    design: &DMatrix<f64>,
    y: &DVector<f64>,
    weights: &DVector<f64>,
) -> Result<LeastSquaresFit, AnalyticsError> {
    if weights.len() != design.nrows() || weights.iter().any(|w| !(*w >= 0.0)) {
        return Err(AnalyticsError::Degenerate("invalid regression weights"));
    }
    let root = weights.map(f64::sqrt);
    let mut scaled = design.clone();
    for (mut row, w) in scaled.row_iter_mut().zip(root.iter()) {
        row *= *w;
    }
    least_squares(&scaled, &y.component_mul(&root))
}
