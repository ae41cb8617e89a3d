//! Unscented Kalman Filter
//!
//! This module contains the generic Unscented Kalman Filter. The filter does not know anything about the system it
//! estimates: the process and measurement models are supplied on every call as [ModelFunction]s, together with the
//! matching noise covariances. Each `predict` and `update` is one sigma-point generation followed by one unscented
//! transform; `predict` adopts the transformed moments, `update` fuses them with a measurement through the Kalman
//! gain.
//!
//! All working buffers are fixed-capacity matrices owned by the filter, so a cycle runs in bounded time without
//! allocating. Results are computed into temporaries and the state estimate is only written once the whole cycle
//! has succeeded.

use crate::error::{EstimatorError, Result};
use crate::linalg::{from_row_major, matrix_square_root, psd_floor, spd_inverse, symmetrize};
use crate::models::ModelFunction;
use crate::{
    Estimator, MAX_LENGTH, MAX_MEASUREMENT_LENGTH, MAX_STATE_LENGTH, Matrix, MatrixBlock,
    SigmaMatrix, Vector, Weights,
};

use std::fmt::{self, Debug, Display};

/// Unscented Kalman Filter implementation
///
/// Sigma points are stored one per column. For a state of length $n$ the filter uses $2n+1$ points: column 0 is
/// the mean, columns $1..n$ and $n+1..2n$ are the mean plus and minus the columns of $\sqrt{cP}$.
#[derive(Clone)]
pub struct UnscentedKalmanFilter {
    mean_state: Vector,
    covariance: Matrix,
    state_size: usize,
    alpha: f64,
    beta: f64,
    ki: f64,
    lambda: f64,
    scaling: f64,
    weights_mean: Weights,
    weights_cov: Weights,
    updated: bool,
    sigma_points: SigmaMatrix,
    state_deviations: SigmaMatrix,
    propagated: SigmaMatrix,
    propagated_deviations: SigmaMatrix,
    propagated_size: usize,
}
impl Debug for UnscentedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UKF")
            .field("mean_state", &self.estimate())
            .field("covariance", &self.certainty())
            .field("lambda", &self.lambda)
            .field("state_size", &self.state_size)
            .field("updated", &self.updated)
            .finish()
    }
}
impl Display for UnscentedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.state_size;
        writeln!(
            f,
            "UnscentedKalmanFilter(n: {}, alpha: {}, beta: {}, ki: {}, lambda: {}, c: {}, updated: {})",
            n, self.alpha, self.beta, self.ki, self.lambda, self.scaling, self.updated
        )?;
        write!(f, "  x = [")?;
        for i in 0..n {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.6}", self.mean_state[i])?;
        }
        write!(f, "]")?;
        for i in 0..n {
            write!(f, "\n  {} [", if i == 0 { "P =" } else { "   " })?;
            for j in 0..n {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:.6}", self.covariance[(i, j)])?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
impl UnscentedKalmanFilter {
    /// Create a filter for a state of length `state_size`.
    ///
    /// The covariance starts as the identity; use [Self::set_covariance] or [Self::set_covariance_diagonal] to
    /// describe the initial uncertainty.
    ///
    /// # Arguments
    /// * `state_size` - number of states, `1..=MAX_STATE_LENGTH`
    /// * `initial_state` - initial state vector, zeros when `None`
    /// * `alpha` - spread of the sigma points, `> 0`
    /// * `beta` - prior knowledge correction, 2 is optimal for Gaussian distributions
    /// * `ki` - secondary scaling parameter, must keep `state_size + ki > 0`
    pub fn new(
        state_size: usize,
        initial_state: Option<&[f64]>,
        alpha: f64,
        beta: f64,
        ki: f64,
    ) -> Result<UnscentedKalmanFilter> {
        if state_size == 0 || state_size > MAX_STATE_LENGTH {
            return Err(EstimatorError::Dimension {
                what: "state length",
                expected: MAX_STATE_LENGTH,
                actual: state_size,
            });
        }
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(EstimatorError::InvalidParameter {
                name: "alpha",
                value: alpha,
            });
        }
        if !beta.is_finite() {
            return Err(EstimatorError::InvalidParameter {
                name: "beta",
                value: beta,
            });
        }
        let n = state_size as f64;
        let lambda = alpha * alpha * (n + ki) - n;
        let scaling = n + lambda;
        if !(ki.is_finite() && scaling > 0.0) {
            return Err(EstimatorError::InvalidParameter {
                name: "ki",
                value: ki,
            });
        }
        let mut mean_state = Vector::zeros();
        if let Some(x) = initial_state {
            check_length("initial state", state_size, x.len())?;
            for (i, v) in x.iter().enumerate() {
                mean_state[i] = *v;
            }
        }
        let mut covariance = Matrix::zeros();
        for i in 0..state_size {
            covariance[(i, i)] = 1.0;
        }
        let mut weights_mean = Weights::zeros();
        let mut weights_cov = Weights::zeros();
        weights_mean[0] = lambda / scaling;
        weights_cov[0] = lambda / scaling + (1.0 - alpha * alpha + beta);
        for i in 1..(2 * state_size + 1) {
            let w = 1.0 / (2.0 * scaling);
            weights_mean[i] = w;
            weights_cov[i] = w;
        }
        Ok(UnscentedKalmanFilter {
            mean_state,
            covariance,
            state_size,
            alpha,
            beta,
            ki,
            lambda,
            scaling,
            weights_mean,
            weights_cov,
            updated: false,
            sigma_points: SigmaMatrix::zeros(),
            state_deviations: SigmaMatrix::zeros(),
            propagated: SigmaMatrix::zeros(),
            propagated_deviations: SigmaMatrix::zeros(),
            propagated_size: 0,
        })
    }
    /// Replace the state vector.
    pub fn set_state(&mut self, state: &[f64]) -> Result<()> {
        check_length("state", self.state_size, state.len())?;
        check_finite(state)?;
        for (i, v) in state.iter().enumerate() {
            self.mean_state[i] = *v;
        }
        Ok(())
    }
    /// Replace the covariance with a row-major `n×n` matrix. The matrix is symmetrized on load.
    pub fn set_covariance(&mut self, covariance: &[f64]) -> Result<()> {
        let n = self.state_size;
        check_length("covariance", n * n, covariance.len())?;
        check_finite(covariance)?;
        self.covariance = symmetrize(&from_row_major(covariance, n));
        Ok(())
    }
    /// Replace the covariance with a diagonal matrix of the given variances.
    pub fn set_covariance_diagonal(&mut self, variances: &[f64]) -> Result<()> {
        check_length("covariance diagonal", self.state_size, variances.len())?;
        check_finite(variances)?;
        self.covariance = Matrix::zeros();
        for (i, v) in variances.iter().enumerate() {
            self.covariance[(i, i)] = *v;
        }
        Ok(())
    }
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
    pub fn beta(&self) -> f64 {
        self.beta
    }
    pub fn ki(&self) -> f64 {
        self.ki
    }
    pub fn lambda(&self) -> f64 {
        self.lambda
    }
    /// Scaling factor `c = n + lambda`
    pub fn scaling(&self) -> f64 {
        self.scaling
    }
    /// True once at least one measurement update has succeeded.
    pub fn is_updated(&self) -> bool {
        self.updated
    }
    /// Mean recombination weights, `2n+1` values
    pub fn weights_mean(&self) -> &[f64] {
        &self.weights_mean.as_slice()[..self.sigma_count()]
    }
    /// Covariance recombination weights, `2n+1` values
    pub fn weights_cov(&self) -> &[f64] {
        &self.weights_cov.as_slice()[..self.sigma_count()]
    }
    /// Sigma points drawn by the most recent predict or update, one per column.
    pub fn sigma_points(&self) -> MatrixBlock<'_> {
        self.sigma_points
            .view((0, 0), (self.state_size, self.sigma_count()))
    }
    /// Sigma points after the most recent model evaluation, one per column.
    ///
    /// After a predict these are the propagated state points; after an update, the predicted measurements.
    pub fn propagated_sigma_points(&self) -> MatrixBlock<'_> {
        self.propagated
            .view((0, 0), (self.propagated_size, self.sigma_count()))
    }
    fn print_level(&self) -> log::Level {
        if self.updated {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
    fn sigma_count(&self) -> usize {
        2 * self.state_size + 1
    }
    /// Draw sigma points from the current estimate into `sigma_points`.
    fn generate_sigma_points(&mut self) -> Result<()> {
        let n = self.state_size;
        let scaled = self.scaling * self.covariance;
        let root = matrix_square_root(&scaled, n)
            .ok_or(EstimatorError::Numerical("covariance has no square root"))?;
        self.sigma_points.fill(0.0);
        self.sigma_points.set_column(0, &self.mean_state);
        for i in 0..n {
            let column = root.column(i);
            self.sigma_points
                .set_column(i + 1, &(self.mean_state + &column));
            self.sigma_points
                .set_column(i + 1 + n, &(self.mean_state - &column));
        }
        Ok(())
    }
    /// Push the current sigma points through `function` and recombine them.
    ///
    /// Fills `propagated` and `propagated_deviations` and returns the transformed mean and covariance (with `noise`
    /// added) for an output of length `output_size`.
    fn unscented_transform<F: ModelFunction + ?Sized>(
        &mut self,
        function: &F,
        dt: f64,
        aux: &[f64],
        output_size: usize,
        noise: &Matrix,
    ) -> Result<(Vector, Matrix)> {
        let n = self.state_size;
        let count = self.sigma_count();
        let mut point = [0.0; MAX_LENGTH];
        let mut output = [0.0; MAX_LENGTH];
        self.propagated.fill(0.0);
        self.propagated_size = 0;
        for i in 0..count {
            for r in 0..n {
                point[r] = self.sigma_points[(r, i)];
            }
            output.fill(0.0);
            let written = function.evaluate(&point[..n], dt, aux, &mut output);
            if written != output_size {
                return Err(EstimatorError::ContractViolation {
                    expected: output_size,
                    actual: written,
                });
            }
            for r in 0..output_size {
                self.propagated[(r, i)] = output[r];
            }
        }
        self.propagated_size = output_size;
        let mut mean = Vector::zeros();
        for i in 0..count {
            mean += self.weights_mean[i] * self.propagated.column(i);
        }
        self.propagated_deviations.fill(0.0);
        let mut covariance = *noise;
        for i in 0..count {
            let diff = self.propagated.column(i) - mean;
            covariance += self.weights_cov[i] * diff * diff.transpose();
            self.propagated_deviations.set_column(i, &diff);
        }
        Ok((mean, symmetrize(&covariance)))
    }
    /// Adopt a new estimate once it is known to be usable.
    ///
    /// The covariance is symmetrized and its diagonal clamped at zero. If round-off has still left it indefinite,
    /// its negative eigenvalues are floored so the next sigma-point draw succeeds.
    fn commit(&mut self, mean: Vector, covariance: Matrix) -> Result<()> {
        if !mean.iter().chain(covariance.iter()).all(|v| v.is_finite()) {
            return Err(EstimatorError::Numerical("estimate is not finite"));
        }
        let n = self.state_size;
        let mut covariance = symmetrize(&covariance);
        for i in 0..n {
            if covariance[(i, i)] < 0.0 {
                covariance[(i, i)] = 0.0;
            }
        }
        if matrix_square_root(&covariance, n).is_none() {
            log::debug!("UKF covariance is indefinite, flooring its eigenvalues");
            covariance = psd_floor(&covariance, n)
                .ok_or(EstimatorError::Numerical("estimate is not finite"))?;
        }
        self.mean_state = mean;
        self.covariance = covariance;
        Ok(())
    }
    fn propagate<F: ModelFunction + ?Sized>(
        &mut self,
        function: &F,
        dt: f64,
        control_len: usize,
        control: &[f64],
        process_noise: &[f64],
    ) -> Result<()> {
        let n = self.state_size;
        check_length("control input", control_len, control.len())?;
        if let Some(expected) = function.aux_dimension() {
            check_length("control input", expected, control_len)?;
        }
        check_length("process noise", n * n, process_noise.len())?;
        let noise = from_row_major(process_noise, n);

        self.generate_sigma_points()?;
        let (mean, covariance) = self.unscented_transform(function, dt, control, n, &noise)?;
        self.commit(mean, covariance)
    }
    fn correct<H: ModelFunction + ?Sized>(
        &mut self,
        function: &H,
        dt: f64,
        measurement_len: usize,
        measurement: &[f64],
        measurement_noise: &[f64],
    ) -> Result<()> {
        let m = measurement_len;
        if m == 0 || m > MAX_MEASUREMENT_LENGTH {
            return Err(EstimatorError::Dimension {
                what: "measurement length",
                expected: MAX_MEASUREMENT_LENGTH,
                actual: m,
            });
        }
        check_length("measurement", m, measurement.len())?;
        check_length("measurement noise", m * m, measurement_noise.len())?;
        if let Some(expected) = function.aux_dimension() {
            check_length("measurement model input", 0, expected)?;
        }
        let noise = from_row_major(measurement_noise, m);

        self.generate_sigma_points()?;
        let count = self.sigma_count();
        self.state_deviations.fill(0.0);
        for i in 0..count {
            let diff = self.sigma_points.column(i) - self.mean_state;
            self.state_deviations.set_column(i, &diff);
        }
        let (z_hat, s) = self.unscented_transform(function, dt, &[], m, &noise)?;
        let mut cross_covariance = Matrix::zeros();
        for i in 0..count {
            cross_covariance += self.weights_cov[i]
                * self.state_deviations.column(i)
                * self.propagated_deviations.column(i).transpose();
        }
        let s_inv = spd_inverse(&s, m).ok_or(EstimatorError::Numerical(
            "innovation covariance is singular",
        ))?;
        let k = cross_covariance * s_inv;
        let mut innovation = Vector::zeros();
        for r in 0..m {
            innovation[r] = measurement[r] - z_hat[r];
        }
        let mean = self.mean_state + k * innovation;
        let covariance = self.covariance - k * s * k.transpose();
        self.commit(mean, covariance)?;
        self.updated = true;
        Ok(())
    }
}
impl Estimator for UnscentedKalmanFilter {
    fn predict<F: ModelFunction + ?Sized>(
        &mut self,
        function: &F,
        dt: f64,
        control_len: usize,
        control: &[f64],
        process_noise: &[f64],
    ) -> Result<()> {
        let result = self.propagate(function, dt, control_len, control, process_noise);
        if let Err(ref e) = result {
            log::debug!("UKF predict rejected: {e}");
        }
        result
    }
    fn update<H: ModelFunction + ?Sized>(
        &mut self,
        function: &H,
        dt: f64,
        measurement_len: usize,
        measurement: &[f64],
        measurement_noise: &[f64],
    ) -> Result<()> {
        let result = self.correct(
            function,
            dt,
            measurement_len,
            measurement,
            measurement_noise,
        );
        if let Err(ref e) = result {
            log::debug!("UKF update rejected: {e}");
        }
        result
    }
    /// Logs the filter at `info` once a measurement has been fused; before that the estimate is only the prior
    /// and goes to `debug`.
    fn print(&self) {
        log::log!(self.print_level(), "{self}");
    }
    fn state_length(&self) -> usize {
        self.state_size
    }
    fn estimate(&self) -> &[f64] {
        &self.mean_state.as_slice()[..self.state_size]
    }
    fn certainty(&self) -> MatrixBlock<'_> {
        self.covariance
            .view((0, 0), (self.state_size, self.state_size))
    }
}

fn check_length(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(EstimatorError::Dimension {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_finite(values: &[f64]) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(EstimatorError::Numerical("input is not finite"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConstantVelocity, LinearModel};
    use assert_approx_eq::assert_approx_eq;

    const ALPHA: f64 = 1e-1;
    const BETA: f64 = 2.0;
    const KI: f64 = 1.0;

    fn shift(x: &[f64], dt: f64, u: &[f64], out: &mut [f64]) -> usize {
        for i in 0..x.len() {
            out[i] = x[i] + u[i] * dt;
        }
        x.len()
    }

    fn identity(x: &[f64], _dt: f64, _u: &[f64], out: &mut [f64]) -> usize {
        out[..x.len()].copy_from_slice(x);
        x.len()
    }

    fn observe_first(x: &[f64], _dt: f64, _u: &[f64], out: &mut [f64]) -> usize {
        out[0] = x[0];
        1
    }

    fn snapshot(ukf: &UnscentedKalmanFilter) -> (Vector, Matrix) {
        (ukf.mean_state, ukf.covariance)
    }

    #[test]
    fn ukf_construction() {
        let ukf = UnscentedKalmanFilter::new(3, Some(&[1.0, 2.0, 3.0]), ALPHA, BETA, KI).unwrap();
        assert_eq!(ukf.estimate(), &[1.0, 2.0, 3.0]);
        let wms = ukf.weights_mean();
        let wcs = ukf.weights_cov();
        assert_eq!(wms.len(), 7);
        assert_eq!(wcs.len(), 7);
        let lambda = ALPHA.powi(2) * (3.0 + KI) - 3.0;
        assert_approx_eq!(ukf.lambda(), lambda, 1e-12);
        assert_approx_eq!(ukf.scaling(), 3.0 + lambda, 1e-12);
        let wm_0 = lambda / (3.0 + lambda);
        let wc_0 = wm_0 + (1.0 - ALPHA.powi(2)) + BETA;
        let w_i = 1.0 / (2.0 * (3.0 + lambda));
        assert_approx_eq!(wms[0], wm_0, 1e-9);
        assert_approx_eq!(wcs[0], wc_0, 1e-9);
        for i in 1..wms.len() {
            assert_approx_eq!(wms[i], w_i, 1e-9);
            assert_approx_eq!(wcs[i], w_i, 1e-9);
        }
        // the identity block is the starting covariance
        let p = ukf.certainty();
        assert_eq!(p.shape(), (3, 3));
        assert_eq!(p[(1, 1)], 1.0);
        assert_eq!(p[(0, 1)], 0.0);
        assert!(!ukf.is_updated());
    }

    #[test]
    fn ukf_weights_normalization() {
        for &(n, alpha, beta, ki) in &[
            (1, 1.0, 2.0, 0.0),
            (4, 1e-3, 2.0, 0.0),
            (6, 0.5, 0.0, -3.0),
            (MAX_STATE_LENGTH, 1.0, 2.0, 3.0),
        ] {
            let ukf = UnscentedKalmanFilter::new(n, None, alpha, beta, ki).unwrap();
            let sum_m: f64 = ukf.weights_mean().iter().sum();
            let sum_c: f64 = ukf.weights_cov().iter().sum();
            assert_approx_eq!(sum_m, 1.0, 1e-6);
            assert_approx_eq!(sum_c, 1.0 + (1.0 - alpha * alpha + beta), 1e-6);
            assert_approx_eq!(
                ukf.weights_cov()[0],
                ukf.lambda() / ukf.scaling() + (1.0 - alpha * alpha + beta),
                1e-9
            );
        }
    }

    #[test]
    fn ukf_default_state_is_zero() {
        let ukf = UnscentedKalmanFilter::new(4, None, 1.0, 2.0, 0.0).unwrap();
        assert_eq!(ukf.estimate(), &[0.0; 4]);
        assert_eq!(ukf.state_length(), 4);
    }

    #[test]
    fn ukf_rejects_bad_construction() {
        assert!(matches!(
            UnscentedKalmanFilter::new(0, None, 1.0, 2.0, 0.0),
            Err(EstimatorError::Dimension { .. })
        ));
        assert!(matches!(
            UnscentedKalmanFilter::new(MAX_STATE_LENGTH + 1, None, 1.0, 2.0, 0.0),
            Err(EstimatorError::Dimension { .. })
        ));
        assert!(matches!(
            UnscentedKalmanFilter::new(2, Some(&[1.0]), 1.0, 2.0, 0.0),
            Err(EstimatorError::Dimension { .. })
        ));
        assert!(matches!(
            UnscentedKalmanFilter::new(2, None, 0.0, 2.0, 0.0),
            Err(EstimatorError::InvalidParameter { name: "alpha", .. })
        ));
        assert!(matches!(
            UnscentedKalmanFilter::new(2, None, 1.0, 2.0, -2.0),
            Err(EstimatorError::InvalidParameter { name: "ki", .. })
        ));
        assert!(matches!(
            UnscentedKalmanFilter::new(2, None, 1.0, f64::NAN, 0.0),
            Err(EstimatorError::InvalidParameter { name: "beta", .. })
        ));
    }

    #[test]
    fn ukf_sigma_points_match_moments() {
        let mut ukf =
            UnscentedKalmanFilter::new(3, Some(&[1.0, -2.0, 0.5]), 0.5, BETA, KI).unwrap();
        let p = [2.0, 0.3, -0.1, 0.3, 1.0, 0.2, -0.1, 0.2, 0.5];
        ukf.set_covariance(&p).unwrap();
        ukf.generate_sigma_points().unwrap();
        let sigma_points = ukf.sigma_points();
        assert_eq!(sigma_points.shape(), (3, 7));
        for r in 0..3 {
            assert_eq!(sigma_points[(r, 0)], ukf.estimate()[r]);
        }

        let mut mean = [0.0; 3];
        for (i, w) in ukf.weights_mean().iter().enumerate() {
            for r in 0..3 {
                mean[r] += w * sigma_points[(r, i)];
            }
        }
        for r in 0..3 {
            assert_approx_eq!(mean[r], ukf.estimate()[r], 1e-12);
        }
        let mut cov = [0.0; 9];
        for (i, w) in ukf.weights_cov().iter().enumerate() {
            for r in 0..3 {
                for c in 0..3 {
                    cov[r * 3 + c] += w
                        * (sigma_points[(r, i)] - mean[r])
                        * (sigma_points[(c, i)] - mean[c]);
                }
            }
        }
        for k in 0..9 {
            assert_approx_eq!(cov[k], p[k], 1e-10);
        }
    }

    #[test]
    fn ukf_identity_predict_keeps_moments() {
        let mut ukf = UnscentedKalmanFilter::new(2, Some(&[3.0, -1.0]), 1e-3, BETA, 0.0).unwrap();
        ukf.set_covariance(&[0.5, 0.1, 0.1, 0.2]).unwrap();
        let (x0, p0) = snapshot(&ukf);
        ukf.predict(&identity, 0.1, 0, &[], &[0.0; 4]).unwrap();
        for i in 0..2 {
            assert_approx_eq!(ukf.mean_state[i], x0[i], 1e-6);
            for j in 0..2 {
                assert_approx_eq!(ukf.covariance[(i, j)], p0[(i, j)], 1e-6);
            }
        }
    }

    #[test]
    fn ukf_predict_adds_process_noise() {
        let mut ukf = UnscentedKalmanFilter::new(2, None, 1.0, BETA, 0.0).unwrap();
        ukf.predict(&identity, 1.0, 0, &[], &[0.5, 0.0, 0.0, 0.25])
            .unwrap();
        assert_approx_eq!(ukf.covariance[(0, 0)], 1.5, 1e-12);
        assert_approx_eq!(ukf.covariance[(1, 1)], 1.25, 1e-12);
        assert_approx_eq!(ukf.covariance[(0, 1)], 0.0, 1e-12);
        assert_eq!(ukf.propagated_sigma_points().shape(), (2, 5));
    }

    #[test]
    fn ukf_end_to_end_position_tracking() {
        let mut ukf = UnscentedKalmanFilter::new(1, Some(&[0.0]), 1.0, 2.0, 0.0).unwrap();
        let p_prior = ukf.covariance[(0, 0)];
        ukf.predict(&shift, 1.0, 1, &[1.0], &[0.0]).unwrap();
        assert_approx_eq!(ukf.estimate()[0], 1.0, 1e-12);
        assert_approx_eq!(ukf.covariance[(0, 0)], p_prior, 1e-12);

        ukf.update(&observe_first, 1.0, 1, &[1.2], &[0.01]).unwrap();
        let x = ukf.estimate()[0];
        assert!(x > 1.0 && x < 1.2);
        assert!((1.2 - x) < (x - 1.0));
        assert_approx_eq!(x, 1.0 + 0.2 / 1.01, 1e-12);
        assert!(ukf.is_updated());
    }

    #[test]
    fn ukf_update_converges_with_exact_measurement() {
        let mut ukf = UnscentedKalmanFilter::new(1, Some(&[0.3]), 1.0, 2.0, 0.0).unwrap();
        ukf.set_covariance(&[4.0]).unwrap();
        ukf.update(&observe_first, 0.0, 1, &[2.0], &[0.0]).unwrap();
        assert_approx_eq!(ukf.estimate()[0], 2.0, 1e-12);
        assert!(ukf.covariance[(0, 0)] >= 0.0);
        assert_approx_eq!(ukf.covariance[(0, 0)], 0.0, 1e-12);
    }

    #[test]
    fn ukf_update_shrinks_covariance_monotonically() {
        let noise = 0.05;
        let mut ukf = UnscentedKalmanFilter::new(1, Some(&[0.0]), 1.0, 2.0, 0.0).unwrap();
        let mut previous = ukf.covariance[(0, 0)];
        for _ in 0..10 {
            ukf.update(&observe_first, 0.1, 1, &[1.0], &[noise]).unwrap();
            let p = ukf.covariance[(0, 0)];
            assert!(p < previous);
            assert!(p > 0.0);
            assert!(p <= noise);
            previous = p;
        }
        assert_approx_eq!(ukf.estimate()[0], 1.0, 1e-2);
    }

    #[test]
    fn ukf_partial_measurement_corrects_observed_state() {
        let mut ukf = UnscentedKalmanFilter::new(2, None, 0.5, BETA, 1.0).unwrap();
        ukf.set_covariance(&[1.0, 0.8, 0.8, 1.0]).unwrap();
        let h = LinearModel::selection(2, &[0]).unwrap();
        ukf.update(&h, 0.0, 1, &[1.0], &[0.1]).unwrap();
        // the correlated, unobserved state follows the observed one
        assert!(ukf.estimate()[0] > 0.8);
        assert!(ukf.estimate()[1] > 0.5);
        assert!(ukf.covariance[(1, 1)] < 1.0);
    }

    #[test]
    fn ukf_singular_innovation_leaves_state_untouched() {
        let mut ukf = UnscentedKalmanFilter::new(2, Some(&[0.5, -0.75]), 1.0, 2.0, 0.0).unwrap();
        ukf.set_covariance(&[0.3, 0.05, 0.05, 0.2]).unwrap();
        let before = snapshot(&ukf);
        let constant = |_x: &[f64], _dt: f64, _u: &[f64], out: &mut [f64]| -> usize {
            out[0] = 0.0;
            1
        };
        let result = ukf.update(&constant, 0.1, 1, &[1.0], &[0.0]);
        assert!(matches!(result, Err(EstimatorError::Numerical(_))));
        assert_eq!(snapshot(&ukf), before);
        assert!(!ukf.is_updated());

        // a collapsed covariance gives no measurement spread either
        ukf.set_covariance(&[0.0; 4]).unwrap();
        let before = snapshot(&ukf);
        let result = ukf.update(&observe_first, 0.1, 1, &[1.0], &[0.0]);
        assert!(matches!(result, Err(EstimatorError::Numerical(_))));
        assert_eq!(snapshot(&ukf), before);
    }

    #[test]
    fn ukf_indefinite_covariance_is_reported() {
        let mut ukf = UnscentedKalmanFilter::new(2, None, 1.0, 2.0, 0.0).unwrap();
        ukf.set_covariance(&[1.0, 2.0, 2.0, 1.0]).unwrap();
        let before = snapshot(&ukf);
        let result = ukf.predict(&identity, 0.1, 0, &[], &[0.0; 4]);
        assert_eq!(
            result,
            Err(EstimatorError::Numerical("covariance has no square root"))
        );
        assert_eq!(snapshot(&ukf), before);
    }

    #[test]
    fn ukf_dimension_rejection() {
        let mut ukf = UnscentedKalmanFilter::new(2, Some(&[1.0, 1.0]), 1.0, 2.0, 0.0).unwrap();
        let before = snapshot(&ukf);
        let cv = ConstantVelocity::new(1).unwrap();
        // declared control length differs from the vector
        assert!(matches!(
            ukf.predict(&cv, 0.1, 2, &[1.0], &[0.0; 4]),
            Err(EstimatorError::Dimension { .. })
        ));
        // declared control length differs from what the model expects
        assert!(matches!(
            ukf.predict(&cv, 0.1, 2, &[1.0, 1.0], &[0.0; 4]),
            Err(EstimatorError::Dimension { .. })
        ));
        // process noise of the wrong size
        assert!(matches!(
            ukf.predict(&cv, 0.1, 1, &[1.0], &[0.0; 3]),
            Err(EstimatorError::Dimension { .. })
        ));
        // measurement of the wrong declared length
        assert!(matches!(
            ukf.update(&observe_first, 0.1, 2, &[1.0], &[0.1]),
            Err(EstimatorError::Dimension { .. })
        ));
        assert!(matches!(
            ukf.update(&observe_first, 0.1, 0, &[], &[]),
            Err(EstimatorError::Dimension { .. })
        ));
        let too_long = [0.0; MAX_MEASUREMENT_LENGTH + 1];
        let too_big = [0.0; (MAX_MEASUREMENT_LENGTH + 1) * (MAX_MEASUREMENT_LENGTH + 1)];
        assert!(matches!(
            ukf.update(&observe_first, 0.1, too_long.len(), &too_long, &too_big),
            Err(EstimatorError::Dimension { .. })
        ));
        // measurement noise of the wrong size
        assert!(matches!(
            ukf.update(&observe_first, 0.1, 1, &[1.0], &[0.1, 0.0]),
            Err(EstimatorError::Dimension { .. })
        ));
        // a model that wants a control input cannot serve as a measurement model
        assert!(matches!(
            ukf.update(&cv, 0.1, 2, &[1.0, 1.0], &[0.1, 0.0, 0.0, 0.1]),
            Err(EstimatorError::Dimension { .. })
        ));
        assert_eq!(snapshot(&ukf), before);
    }

    #[test]
    fn ukf_contract_violation() {
        let mut ukf = UnscentedKalmanFilter::new(2, None, 1.0, 2.0, 0.0).unwrap();
        let before = snapshot(&ukf);
        let truncated = |x: &[f64], _dt: f64, _u: &[f64], out: &mut [f64]| -> usize {
            out[0] = x[0];
            1
        };
        assert_eq!(
            ukf.predict(&truncated, 0.1, 0, &[], &[0.0; 4]),
            Err(EstimatorError::ContractViolation {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            ukf.update(&identity, 0.1, 1, &[0.0], &[1.0]),
            Err(EstimatorError::ContractViolation {
                expected: 1,
                actual: 2
            })
        );
        assert_eq!(snapshot(&ukf), before);
    }

    #[test]
    fn ukf_non_finite_model_output_is_numerical() {
        let mut ukf = UnscentedKalmanFilter::new(1, None, 1.0, 2.0, 0.0).unwrap();
        let before = snapshot(&ukf);
        let blow_up = |_x: &[f64], _dt: f64, _u: &[f64], out: &mut [f64]| -> usize {
            out[0] = f64::INFINITY;
            1
        };
        assert!(matches!(
            ukf.predict(&blow_up, 0.1, 0, &[], &[0.0]),
            Err(EstimatorError::Numerical(_))
        ));
        assert_eq!(snapshot(&ukf), before);
    }

    #[test]
    fn ukf_nonlinear_range_measurement() {
        // planar position observed through its range from the origin
        let range = |x: &[f64], _dt: f64, _u: &[f64], out: &mut [f64]| -> usize {
            out[0] = (x[0] * x[0] + x[1] * x[1]).sqrt();
            1
        };
        let mut ukf = UnscentedKalmanFilter::new(2, Some(&[3.0, 4.0]), 0.5, 2.0, 0.0).unwrap();
        ukf.set_covariance_diagonal(&[0.5, 0.5]).unwrap();
        for _ in 0..5 {
            ukf.update(&range, 0.1, 1, &[10.0], &[0.01]).unwrap();
        }
        let x = ukf.estimate();
        let r = (x[0] * x[0] + x[1] * x[1]).sqrt();
        assert_approx_eq!(r, 10.0, 0.1);
        // bearing is unobserved, so the direction is kept
        assert_approx_eq!(x[1] / x[0], 4.0 / 3.0, 0.05);
    }

    #[test]
    fn ukf_constant_velocity_cycle() {
        let cv = ConstantVelocity::new(1).unwrap();
        let position = LinearModel::selection(2, &[0]).unwrap();
        let mut ukf = UnscentedKalmanFilter::new(2, None, 1.0, 2.0, 0.0).unwrap();
        let q = [1e-4, 0.0, 0.0, 1e-4];
        let dt = 0.1;
        // target moving at 2 m/s
        for k in 1..=100 {
            ukf.predict(&cv, dt, 1, &[0.0], &q).unwrap();
            let z = 2.0 * dt * k as f64;
            ukf.update(&position, dt, 1, &[z], &[0.01]).unwrap();
        }
        assert_approx_eq!(ukf.estimate()[0], 20.0, 0.1);
        assert_approx_eq!(ukf.estimate()[1], 2.0, 0.1);
    }

    #[test]
    fn ukf_setters_validate_input() {
        let mut ukf = UnscentedKalmanFilter::new(2, None, 1.0, 2.0, 0.0).unwrap();
        assert!(ukf.set_state(&[1.0]).is_err());
        assert!(ukf.set_state(&[1.0, f64::NAN]).is_err());
        assert!(ukf.set_covariance(&[1.0, 0.0, 0.0]).is_err());
        assert!(ukf.set_covariance_diagonal(&[1.0, 2.0, 3.0]).is_err());
        ukf.set_state(&[1.0, 2.0]).unwrap();
        ukf.set_covariance(&[1.0, 0.2, 0.0, 1.0]).unwrap();
        assert_approx_eq!(ukf.covariance[(0, 1)], 0.1, 1e-15);
        assert_approx_eq!(ukf.covariance[(1, 0)], 0.1, 1e-15);
    }

    #[test]
    fn ukf_debug_display() {
        let ukf = UnscentedKalmanFilter::new(2, Some(&[1.5, -0.25]), 1.0, 2.0, 0.0).unwrap();
        let before = snapshot(&ukf);
        let debug_str = format!("{:?}", ukf);
        assert!(debug_str.contains("UKF"));
        assert!(debug_str.contains("mean_state"));
        let display_str = format!("{}", ukf);
        assert!(display_str.contains("UnscentedKalmanFilter"));
        assert!(display_str.contains("x = [1.500000, -0.250000]"));
        assert!(display_str.contains("P = [1.000000, 0.000000]"));
        ukf.print();
        assert_eq!(snapshot(&ukf), before);
    }

    #[test]
    fn ukf_mixed_scale_measurement_update() {
        // a large and a tiny state observed in their own units
        let mut ukf = UnscentedKalmanFilter::new(2, None, 1.0, 2.0, 0.0).unwrap();
        ukf.set_covariance_diagonal(&[1e6, 1e-8]).unwrap();
        let h = LinearModel::selection(2, &[0, 1]).unwrap();
        ukf.update(&h, 0.1, 2, &[1.0, 1e-4], &[1.0, 0.0, 0.0, 1e-8])
            .unwrap();
        let x = ukf.estimate();
        assert_approx_eq!(x[0], 1e6 / (1e6 + 1.0), 1e-9);
        assert_approx_eq!(x[1], 0.5e-4, 1e-12);
        assert_approx_eq!(ukf.covariance[(1, 1)], 0.5e-8, 1e-15);
        assert!(ukf.is_updated());
    }

    #[test]
    fn ukf_known_state_keeps_small_variance() {
        let mut ukf = UnscentedKalmanFilter::new(3, Some(&[1.0, 2.0, 3.0]), 1.0, 2.0, 0.0).unwrap();
        ukf.set_covariance_diagonal(&[1e6, 1e-7, 0.0]).unwrap();
        ukf.predict(&identity, 0.1, 0, &[], &[0.0; 9]).unwrap();
        assert_approx_eq!(ukf.covariance[(0, 0)], 1e6, 1e-6);
        assert_approx_eq!(ukf.covariance[(1, 1)], 1e-7, 1e-15);
        assert_approx_eq!(ukf.covariance[(2, 2)], 0.0, 1e-20);
        assert_approx_eq!(ukf.estimate()[1], 2.0, 1e-9);
    }

    #[test]
    fn ukf_small_alpha_correlated_cycles() {
        let cv = ConstantVelocity::new(1).unwrap();
        let position = LinearModel::selection(2, &[0]).unwrap();
        let mut ukf = UnscentedKalmanFilter::new(2, None, 1e-3, 2.0, 0.0).unwrap();
        ukf.set_covariance(&[1.0, 0.9, 0.9, 1.0]).unwrap();
        let q = [1e-4, 0.0, 0.0, 1e-4];
        let dt = 0.1;
        for k in 1..=200 {
            ukf.predict(&cv, dt, 1, &[0.0], &q).unwrap();
            ukf.update(&position, dt, 1, &[dt * k as f64], &[0.01])
                .unwrap();
            assert!(matrix_square_root(&ukf.covariance, 2).is_some());
        }
        assert_approx_eq!(ukf.estimate()[0], 20.0, 0.1);
        assert_approx_eq!(ukf.estimate()[1], 1.0, 0.1);
        let p = ukf.certainty();
        assert!(p[(0, 0)] * p[(1, 1)] - p[(0, 1)] * p[(0, 1)] > 0.0);
    }

    #[test]
    fn ukf_commit_repairs_indefinite_covariance() {
        let mut ukf = UnscentedKalmanFilter::new(2, None, 1.0, 2.0, 0.0).unwrap();
        let mut indefinite = Matrix::zeros();
        indefinite[(0, 0)] = 1.0;
        indefinite[(1, 1)] = 1.0;
        indefinite[(0, 1)] = 1.0 + 1e-6;
        indefinite[(1, 0)] = 1.0 + 1e-6;
        ukf.commit(Vector::zeros(), indefinite).unwrap();
        assert!(matrix_square_root(&ukf.covariance, 2).is_some());
        assert_approx_eq!(ukf.covariance[(0, 1)], 1.0, 1e-5);
        ukf.predict(&identity, 0.1, 0, &[], &[0.0; 4]).unwrap();
    }

    #[test]
    fn ukf_print_level_follows_updates() {
        let mut ukf = UnscentedKalmanFilter::new(1, None, 1.0, 2.0, 0.0).unwrap();
        assert_eq!(ukf.print_level(), log::Level::Debug);
        ukf.update(&observe_first, 0.1, 1, &[1.0], &[0.1]).unwrap();
        assert_eq!(ukf.print_level(), log::Level::Info);
    }

    #[test]
    fn ukf_instances_are_independent() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<UnscentedKalmanFilter>();

        let results: Vec<f64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|k| {
                    scope.spawn(move || {
                        let mut ukf =
                            UnscentedKalmanFilter::new(1, Some(&[0.0]), 1.0, 2.0, 0.0).unwrap();
                        let target = k as f64;
                        for _ in 0..20 {
                            ukf.predict(&identity, 0.1, 0, &[], &[1e-3]).unwrap();
                            ukf.update(&observe_first, 0.1, 1, &[target], &[0.01])
                                .unwrap();
                        }
                        ukf.estimate()[0]
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (k, x) in results.iter().enumerate() {
            assert_approx_eq!(*x, k as f64, 1e-2);
        }
    }
}
